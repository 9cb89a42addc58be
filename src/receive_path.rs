//! The receiver side of a connection: acking and reassembling incoming DATA segments and handing
//!  complete messages to the application.
//!
//! Out-of-order segments wait in the receive buffer, sorted by sequence number. Segments move to
//!  the receive queue strictly in sequence, and only while the queue has room (the receive
//!  window), so the number of segments in the queue is what the peer's flow control sees.

use crate::error::ReceiveError;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::segment::{Segment, SegmentHeader};
use bytes::Bytes;
use std::collections::VecDeque;
use std::vec::Drain;
use tracing::{debug, error, trace};

#[derive(Debug)]
pub struct ReceivePath {
    buffer: VecDeque<Segment>,
    queue: VecDeque<Segment>,
    /// `(sequence number, timestamp)` of DATA segments that still need to be acked
    pending_acks: Vec<(u32, u32)>,
    next_id: u32,
    window_size: u32,
    need_tell_window_size: bool,
}

impl ReceivePath {
    pub fn new(window_size: u32) -> ReceivePath {
        ReceivePath {
            buffer: VecDeque::new(),
            queue: VecDeque::new(),
            pending_acks: Vec::new(),
            next_id: 0,
            window_size,
            need_tell_window_size: false,
        }
    }

    /// The next sequence number expected in order, i.e. the cumulative ack sent to the peer
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    fn window_len(&self) -> usize {
        self.window_size.safe_cast()
    }

    pub fn set_window_size(&mut self, window_size: u32) {
        self.window_size = window_size;
        self.drain_buffer();
    }

    /// Free capacity of the receive queue in segments
    pub fn available_window(&self) -> u32 {
        let queue_len: u32 = self.queue.len().prechecked_cast();
        self.window_size.saturating_sub(queue_len)
    }

    pub fn on_data(&mut self, header: SegmentHeader, payload: &[u8]) {
        let sn = header.sequence_number;
        if sn >= self.next_id.saturating_add(self.window_size) {
            trace!("DATA #{} is beyond the receive window ending at {} - dropping", sn, self.next_id.saturating_add(self.window_size));
            return;
        }

        self.pending_acks.push((sn, header.timestamp));

        if sn < self.next_id {
            trace!("DATA #{} was delivered before - ack only", sn);
            return;
        }

        match self.buffer.binary_search_by_key(&sn, |s| s.sequence_number()) {
            Ok(_) => {
                trace!("DATA #{} is already buffered - ack only", sn);
            }
            Err(pos) => {
                trace!("buffering DATA #{}", sn);
                self.buffer.insert(pos, Segment::received(header, Bytes::copy_from_slice(payload)));
            }
        }

        self.drain_buffer();
    }

    fn drain_buffer(&mut self) {
        while self.queue.len() < self.window_len()
            && self.buffer.front().is_some_and(|s| s.sequence_number() == self.next_id)
        {
            if let Some(segment) = self.buffer.pop_front() {
                trace!("#{} is next in sequence - moving it to the receive queue", self.next_id);
                self.queue.push_back(segment);
                self.next_id += 1;
            }
        }
    }

    /// The size of the message at the head of the receive queue, or `None` if the queue is
    ///  empty or not all of the message's fragments were received yet
    pub fn readable_size(&self) -> Option<usize> {
        let front = self.queue.front()?;
        let fragment_index: usize = front.header.fragment_index.safe_cast();
        let num_fragments = fragment_index + 1;
        if self.queue.len() < num_fragments {
            return None;
        }

        let mut size = 0;
        for segment in self.queue.iter().take(num_fragments) {
            size += segment.payload.len();
            if segment.header.fragment_index == 0 {
                return Some(size);
            }
        }
        None
    }

    /// Copies the next complete message into `buf`, returning its length
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, ReceiveError> {
        if self.queue.is_empty() {
            return Err(ReceiveError::NoData);
        }
        let Some(size) = self.readable_size() else {
            return Err(ReceiveError::Incomplete);
        };
        if buf.len() < size {
            return Err(ReceiveError::BufferTooSmall {
                required: size,
                available: buf.len(),
            });
        }

        let was_full = self.queue.len() >= self.window_len();

        let mut copied = 0;
        while let Some(segment) = self.queue.pop_front() {
            let len = segment.payload.len();
            buf[copied..copied + len].copy_from_slice(&segment.payload);
            copied += len;
            if segment.header.fragment_index == 0 {
                break;
            }
        }

        self.drain_buffer();

        if was_full && self.queue.len() < self.window_len() {
            debug!("receive window reopened - telling peer");
            self.need_tell_window_size = true;
        }

        if copied != size {
            error!("this is a bug: copied {} bytes for a message of {} bytes", copied, size);
            return Err(ReceiveError::LengthMismatch {
                expected: size,
                copied,
            });
        }

        trace!("received message of {} bytes", copied);
        Ok(copied)
    }

    pub fn has_pending_acks(&self) -> bool {
        !self.pending_acks.is_empty()
    }

    pub fn drain_pending_acks(&mut self) -> Drain<'_, (u32, u32)> {
        self.pending_acks.drain(..)
    }

    pub fn request_window_tell(&mut self) {
        self.need_tell_window_size = true;
    }

    /// Returns `true` once after a window tell was requested
    pub fn take_need_tell_window_size(&mut self) -> bool {
        std::mem::take(&mut self.need_tell_window_size)
    }
}
