//! Utilities for testing code that drives connections. They are used for testing this crate
//!  itself, but they are also exported so that applications can test their wiring without a
//!  real network.

use crate::segment::SegmentHeader;
use crate::sink::PacketSink;
use std::sync::Mutex;

/// A [PacketSink] that keeps all packets handed to it
#[derive(Debug, Default)]
pub struct TrackingPacketSink {
    tracker: Mutex<Vec<Vec<u8>>>,
}

impl PacketSink for TrackingPacketSink {
    fn output(&self, packet: &[u8]) {
        self.lock().push(packet.to_vec());
    }
}

impl TrackingPacketSink {
    pub fn new() -> TrackingPacketSink {
        TrackingPacketSink::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        // a panic while holding the lock can only come from a failing test
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// returns sent packets, clearing the internal buffer
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.lock())
    }

    /// returns the headers of all segments in sent packets, clearing the internal buffer
    pub fn sent_segments(&self, conversation_id: u32) -> Vec<SegmentHeader> {
        self.sent_packets()
            .iter()
            .flat_map(|packet| decode_segments(packet, conversation_id))
            .collect()
    }

    pub fn num_sent_packets(&self) -> usize {
        self.lock().len()
    }
}

/// Decodes the headers of all segments in a packet, stopping at the first malformed one
pub fn decode_segments(packet: &[u8], conversation_id: u32) -> Vec<SegmentHeader> {
    let mut result = Vec::new();
    let mut offs = 0;
    while packet.len() - offs >= SegmentHeader::SERIALIZED_LEN {
        let Ok(header) = SegmentHeader::decode(packet, offs, conversation_id) else {
            break;
        };
        offs += SegmentHeader::SERIALIZED_LEN + header.payload_len as usize;
        result.push(header);
    }
    result
}
