//! Accumulates encoded segments into a single packet of at most `mtu` bytes and hands full
//!  packets to the [`PacketSink`].
//!
//! The backing buffer is pre-allocated once and reused across driver ticks: it is moved into a
//!  batch at the start of a tick and reclaimed with [`OutputBatch::into_buffer`] at its end.

use crate::segment::SegmentHeader;
use crate::sink::PacketSink;
use std::sync::Arc;
use tracing::trace;

pub struct OutputBatch {
    buf: Vec<u8>,
    len: usize,
    mtu: usize,
    sink: Arc<dyn PacketSink>,
    num_packets: usize,
}

impl OutputBatch {
    pub fn new(mut buf: Vec<u8>, mtu: usize, sink: Arc<dyn PacketSink>) -> OutputBatch {
        if buf.len() < mtu {
            buf.resize(mtu, 0);
        }

        OutputBatch {
            buf,
            len: 0,
            mtu,
            sink,
            num_packets: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// number of packets handed to the sink so far
    pub fn num_packets(&self) -> usize {
        self.num_packets
    }

    /// Appends a segment, sending the batch first if the segment would not fit into it any more
    pub fn push(&mut self, header: &SegmentHeader, payload: &[u8]) {
        debug_assert_eq!(header.payload_len as usize, payload.len());

        let segment_len = SegmentHeader::SERIALIZED_LEN + payload.len();
        if self.len + segment_len > self.mtu {
            self.flush();
        }

        // a segment encoded for a bigger MTU than the current one goes out as a packet of its own
        if self.buf.len() < self.len + segment_len {
            self.buf.resize(self.len + segment_len, 0);
        }

        trace!("adding segment {:?} to output batch at offset {}", header, self.len);

        self.len += header.encode(&mut self.buf, self.len);
        self.buf[self.len..self.len + payload.len()].copy_from_slice(payload);
        self.len += payload.len();
    }

    pub fn flush(&mut self) {
        if self.len == 0 {
            return;
        }

        trace!("sending packet of {} bytes", self.len);
        self.sink.output(&self.buf[..self.len]);
        self.num_packets += 1;
        self.len = 0;
    }

    /// Sends any remaining data and returns the backing buffer for reuse
    pub fn into_buffer(mut self) -> Vec<u8> {
        self.flush();
        self.buf
    }
}
