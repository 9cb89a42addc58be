//! The sender side of a connection: fragmenting messages, moving segments into flight as the
//!  window allows, processing acks, and deciding which segments go on the wire in a tick.
//!
//! Segments wait in the send queue without a sequence number. Sequence numbers are assigned when
//!  a segment moves to the send buffer, which holds everything that is in flight (sent at least
//!  once, or about to be sent for the first time) in ascending sequence number order. The
//!  oldest unacknowledged sequence number is therefore the send buffer's head, or the next
//!  sequence number to be assigned if the buffer is empty.

use crate::error::SendError;
use crate::output_batch::OutputBatch;
use crate::safe_converter::PrecheckedCast;
use crate::segment::{Command, Segment};
use bytes::Bytes;
use std::cmp::min;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// The fragment index is a single byte on the wire
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

/// Connection-level values that go into a flush of the send buffer
#[derive(Debug, Clone)]
pub struct FlushContext {
    pub now: u32,
    /// the connection's current retransmission timeout
    pub rto: u32,
    pub no_delay: bool,
    /// `0` disables fast retransmit
    pub fast_retransmit_threshold: u32,
    pub window_hint: u16,
    pub cumulative_ack: u32,
    pub max_transmit_count: u32,
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct FlushOutcome {
    /// at least one segment was retransmitted because its retransmission timer expired
    pub lost: bool,
    /// at least one segment was retransmitted because later segments were acked before it
    pub fast_retransmitted: bool,
    /// at least one segment reached the maximum number of transmissions
    pub reached_max_transmit: bool,
}

#[derive(Debug, Default)]
pub struct SendPath {
    queue: VecDeque<Segment>,
    buffer: VecDeque<Segment>,
    next_id: u32,
}

impl SendPath {
    pub fn new() -> SendPath {
        SendPath::default()
    }

    /// The lowest sequence number that was assigned but not acknowledged yet
    pub fn una(&self) -> u32 {
        self.buffer.front()
            .map(|s| s.sequence_number())
            .unwrap_or(self.next_id)
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn num_in_flight(&self) -> u32 {
        self.next_id - self.una()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// segments that are waiting to be sent or waiting for an ack
    pub fn pending_count(&self) -> usize {
        self.queue.len() + self.buffer.len()
    }

    /// Splits a message into fragments of at most `mss` bytes and appends them to the send queue,
    ///  returning the number of fragments
    pub fn enqueue_message(&mut self, message: &[u8], mss: usize) -> Result<usize, SendError> {
        if message.is_empty() {
            return Err(SendError::Unreadable);
        }

        let num_fragments = if mss == 0 {
            usize::MAX
        }
        else {
            message.len().div_ceil(mss)
        };
        if num_fragments > MAX_FRAGMENTS {
            return Err(SendError::TooLarge {
                len: message.len(),
                fragments: num_fragments,
                max: MAX_FRAGMENTS,
            });
        }

        let data = Bytes::copy_from_slice(message);
        for (i, offs) in (0..data.len()).step_by(mss).enumerate() {
            let end = min(offs + mss, data.len());
            let fragment_index: u8 = (num_fragments - 1 - i).prechecked_cast();
            self.queue.push_back(Segment::fragment(fragment_index, data.slice(offs..end)));
        }

        trace!("enqueued message of {} bytes as {} fragments", message.len(), num_fragments);
        Ok(num_fragments)
    }

    /// Assigns sequence numbers to queued segments and moves them to the send buffer as long
    ///  as fewer than `window` segments are in flight. Returns the number of segments moved.
    pub fn move_into_flight(&mut self, window: u32, conversation_id: u32, now: u32, cumulative_ack: u32) -> usize {
        let limit = self.una().saturating_add(window);

        let mut num_moved = 0;
        while self.next_id < limit {
            let Some(mut segment) = self.queue.pop_front() else {
                break;
            };

            segment.header.conversation_id = conversation_id;
            segment.header.command = Command::Data;
            segment.header.timestamp = now;
            segment.header.sequence_number = self.next_id;
            segment.header.cumulative_ack = cumulative_ack;
            segment.transmit_count = 0;
            segment.skip_count = 0;

            trace!("moving segment into flight: {:?}", segment);
            self.buffer.push_back(segment);
            self.next_id += 1;
            num_moved += 1;
        }
        num_moved
    }

    /// Drops all segments below the peer's cumulative ack
    pub fn ack_cumulative(&mut self, una: u32) {
        while let Some(front) = self.buffer.front() {
            if front.sequence_number() >= una {
                break;
            }
            trace!("cumulatively acked: {:?}", front);
            self.buffer.pop_front();
        }
    }

    /// Processes a selective ack: removes the acked segment from the send buffer, and counts
    ///  a skip for every segment before it that is still unacked. Returns `true` if a segment
    ///  was removed.
    pub fn ack_single(&mut self, sequence_number: u32) -> bool {
        if sequence_number < self.una() || sequence_number >= self.next_id {
            trace!("ack for #{} is outside the send window - ignoring", sequence_number);
            return false;
        }

        for i in 0..self.buffer.len() {
            let sn = self.buffer[i].sequence_number();
            if sn == sequence_number {
                self.buffer.remove(i);
                return true;
            }
            if sn > sequence_number {
                break;
            }
            self.buffer[i].skip_count += 1;
        }
        false
    }

    /// Writes all segments that are due (first transmission, expired retransmission timer, or
    ///  enough skips for a fast retransmit) into the output batch
    pub fn flush(&mut self, ctx: &FlushContext, batch: &mut OutputBatch) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();

        for segment in self.buffer.iter_mut() {
            if segment.transmit_count == 0 {
                segment.rto = ctx.rto;
                let delay = if ctx.no_delay { 0 } else { segment.rto >> 3 };
                segment.next_retransmit_at = ctx.now
                    .saturating_add(segment.rto)
                    .saturating_add(delay);
            }
            else if ctx.now >= segment.next_retransmit_at {
                let growth = if ctx.no_delay { ctx.rto / 2 } else { ctx.rto };
                segment.rto = segment.rto.saturating_add(growth);
                segment.next_retransmit_at = ctx.now.saturating_add(segment.rto);
                outcome.lost = true;
                debug!("retransmission timeout for #{}, rto is now {}ms", segment.sequence_number(), segment.rto);
            }
            else if ctx.fast_retransmit_threshold > 0 && segment.skip_count >= ctx.fast_retransmit_threshold {
                segment.skip_count = 0;
                segment.next_retransmit_at = ctx.now.saturating_add(segment.rto);
                outcome.fast_retransmitted = true;
                debug!("fast retransmit for #{}", segment.sequence_number());
            }
            else {
                continue;
            }

            segment.header.timestamp = ctx.now;
            segment.header.window_hint = ctx.window_hint;
            segment.header.cumulative_ack = ctx.cumulative_ack;
            segment.transmit_count += 1;
            if segment.transmit_count >= ctx.max_transmit_count {
                outcome.reached_max_transmit = true;
            }

            batch.push(&segment.header, &segment.payload);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MockPacketSink;
    use crate::test_util::TrackingPacketSink;
    use rstest::rstest;
    use std::sync::Arc;

    fn ctx(now: u32) -> FlushContext {
        FlushContext {
            now,
            rto: 200,
            no_delay: false,
            fast_retransmit_threshold: 0,
            window_hint: 256,
            cumulative_ack: 0,
            max_transmit_count: 20,
        }
    }

    fn path_with_in_flight(num_segments: usize) -> SendPath {
        let mut path = SendPath::new();
        for _ in 0..num_segments {
            path.enqueue_message(&[1, 2, 3], 76).unwrap();
        }
        path.move_into_flight(u32::MAX, 9, 0, 0);
        path
    }

    fn do_flush(path: &mut SendPath, ctx: &FlushContext) -> (FlushOutcome, Vec<u32>) {
        let sink = Arc::new(TrackingPacketSink::new());
        let mut batch = OutputBatch::new(Vec::new(), 1400, sink.clone());
        let outcome = path.flush(ctx, &mut batch);
        let _ = batch.into_buffer();

        let sent = sink.sent_segments(9)
            .iter()
            .map(|h| h.sequence_number)
            .collect();
        (outcome, sent)
    }

    #[test]
    fn test_enqueue_fragments() {
        let mut path = SendPath::new();
        let message = (0..200).map(|i| i as u8).collect::<Vec<_>>();

        assert_eq!(path.enqueue_message(&message, 76), Ok(3));

        let indices = path.queue.iter().map(|s| s.header.fragment_index).collect::<Vec<_>>();
        let sizes = path.queue.iter().map(|s| s.payload.len()).collect::<Vec<_>>();
        assert_eq!(indices, vec![2, 1, 0]);
        assert_eq!(sizes, vec![76, 76, 48]);
        assert_eq!(path.queue[1].payload.as_ref(), &message[76..152]);
        assert_eq!(path.pending_count(), 3);
    }

    #[rstest]
    #[case::single_byte(1, 76, Ok(1))]
    #[case::exactly_mss(76, 76, Ok(1))]
    #[case::mss_plus_one(77, 76, Ok(2))]
    #[case::max_fragments(255 * 76, 76, Ok(255))]
    #[case::too_many_fragments(255 * 76 + 1, 76, Err(SendError::TooLarge { len: 255 * 76 + 1, fragments: 256, max: 255 }))]
    #[case::empty(0, 76, Err(SendError::Unreadable))]
    #[case::zero_mss(1, 0, Err(SendError::TooLarge { len: 1, fragments: usize::MAX, max: 255 }))]
    fn test_enqueue_message(#[case] len: usize, #[case] mss: usize, #[case] expected: Result<usize, SendError>) {
        let mut path = SendPath::new();
        assert_eq!(path.enqueue_message(&vec![5; len], mss), expected);

        let expected_queued = expected.unwrap_or(0);
        assert_eq!(path.queue_len(), expected_queued);
        if expected_queued > 0 {
            assert_eq!(path.queue.front().unwrap().header.fragment_index as usize, expected_queued - 1);
            assert_eq!(path.queue.back().unwrap().header.fragment_index, 0);
        }
    }

    #[rstest]
    #[case::window_bigger(5, 10, 5)]
    #[case::window_smaller(5, 3, 3)]
    #[case::window_zero(5, 0, 0)]
    #[case::window_exact(5, 5, 5)]
    fn test_move_into_flight(#[case] num_queued: usize, #[case] window: u32, #[case] expected_moved: usize) {
        let mut path = SendPath::new();
        for _ in 0..num_queued {
            path.enqueue_message(&[1], 76).unwrap();
        }

        assert_eq!(path.move_into_flight(window, 9, 1234, 17), expected_moved);
        assert_eq!(path.buffer_len(), expected_moved);
        assert_eq!(path.queue_len(), num_queued - expected_moved);
        assert_eq!(path.next_id(), expected_moved as u32);
        assert_eq!(path.una(), 0);

        for (i, segment) in path.buffer.iter().enumerate() {
            assert_eq!(segment.sequence_number(), i as u32);
            assert_eq!(segment.header.conversation_id, 9);
            assert_eq!(segment.header.timestamp, 1234);
            assert_eq!(segment.header.cumulative_ack, 17);
            assert_eq!(segment.transmit_count, 0);
        }
    }

    #[test]
    fn test_move_into_flight_respects_unacked() {
        let mut path = path_with_in_flight(3);
        for _ in 0..5 {
            path.enqueue_message(&[1], 76).unwrap();
        }

        // 3 in flight, window 4 -> only one more
        assert_eq!(path.move_into_flight(4, 9, 0, 0), 1);
        assert_eq!(path.next_id(), 4);

        // acking the head opens the window by one
        path.ack_cumulative(1);
        assert_eq!(path.una(), 1);
        assert_eq!(path.move_into_flight(4, 9, 0, 0), 1);
        assert_eq!(path.next_id(), 5);
        assert!(path.buffer_len() <= 4);
    }

    #[rstest]
    #[case::nothing(5, 0, 0, vec![0, 1, 2, 3, 4])]
    #[case::some(5, 2, 2, vec![2, 3, 4])]
    #[case::all(5, 5, 5, vec![])]
    #[case::beyond(5, 100, 5, vec![])]
    fn test_ack_cumulative(#[case] num_in_flight: usize, #[case] una: u32, #[case] expected_una: u32, #[case] expected_remaining: Vec<u32>) {
        let mut path = path_with_in_flight(num_in_flight);
        path.ack_cumulative(una);

        assert_eq!(path.una(), expected_una);
        assert_eq!(path.buffer.iter().map(|s| s.sequence_number()).collect::<Vec<_>>(), expected_remaining);
    }

    #[rstest]
    #[case::head(0, true, vec![1, 2, 3, 4], vec![0, 0, 0, 0])]
    #[case::middle(2, true, vec![0, 1, 3, 4], vec![1, 1, 0, 0])]
    #[case::last(4, true, vec![0, 1, 2, 3], vec![1, 1, 1, 1])]
    #[case::not_yet_assigned(5, false, vec![0, 1, 2, 3, 4], vec![0, 0, 0, 0, 0])]
    #[case::far_beyond(500, false, vec![0, 1, 2, 3, 4], vec![0, 0, 0, 0, 0])]
    fn test_ack_single(#[case] sn: u32, #[case] expected_removed: bool, #[case] expected_remaining: Vec<u32>, #[case] expected_skips: Vec<u32>) {
        let mut path = path_with_in_flight(5);

        assert_eq!(path.ack_single(sn), expected_removed);
        assert_eq!(path.buffer.iter().map(|s| s.sequence_number()).collect::<Vec<_>>(), expected_remaining);
        assert_eq!(path.buffer.iter().map(|s| s.skip_count).collect::<Vec<_>>(), expected_skips);
    }

    #[test]
    fn test_ack_single_below_una_is_ignored() {
        let mut path = path_with_in_flight(5);
        path.ack_cumulative(2);

        assert!(!path.ack_single(1));
        assert_eq!(path.buffer.iter().map(|s| s.skip_count).collect::<Vec<_>>(), vec![0, 0, 0]);
    }

    #[test]
    fn test_ack_single_duplicate_counts_skips() {
        let mut path = path_with_in_flight(5);

        assert!(path.ack_single(3));
        assert!(!path.ack_single(3));
        assert_eq!(path.buffer.iter().map(|s| s.skip_count).collect::<Vec<_>>(), vec![2, 2, 2, 0]);
    }

    #[rstest]
    #[case::regular(false, 1225)]
    #[case::no_delay(true, 1200)]
    fn test_flush_first_transmission(#[case] no_delay: bool, #[case] expected_due: u32) {
        let mut path = path_with_in_flight(3);
        let ctx = FlushContext { no_delay, window_hint: 77, cumulative_ack: 5, ..ctx(1000) };

        let (outcome, sent) = do_flush(&mut path, &ctx);

        assert_eq!(outcome, FlushOutcome::default());
        assert_eq!(sent, vec![0, 1, 2]);
        for segment in path.buffer.iter() {
            assert_eq!(segment.transmit_count, 1);
            assert_eq!(segment.rto, 200);
            assert_eq!(segment.next_retransmit_at, expected_due);
            assert_eq!(segment.header.timestamp, 1000);
            assert_eq!(segment.header.window_hint, 77);
            assert_eq!(segment.header.cumulative_ack, 5);
        }
    }

    #[test]
    fn test_flush_nothing_due() {
        let mut path = path_with_in_flight(3);
        do_flush(&mut path, &ctx(1000));

        let (outcome, sent) = do_flush(&mut path, &ctx(1224));
        assert_eq!(outcome, FlushOutcome::default());
        assert!(sent.is_empty());
    }

    #[rstest]
    #[case::regular(false, 400, 1625)]
    #[case::no_delay(true, 300, 1500)]
    fn test_flush_timeout(#[case] no_delay: bool, #[case] expected_rto: u32, #[case] now: u32) {
        let mut path = path_with_in_flight(2);
        let ctx_first = FlushContext { no_delay, ..ctx(1000) };
        do_flush(&mut path, &ctx_first);

        let ctx_retransmit = FlushContext { no_delay, ..ctx(now) };
        let (outcome, sent) = do_flush(&mut path, &ctx_retransmit);

        assert!(outcome.lost);
        assert!(!outcome.fast_retransmitted);
        assert_eq!(sent, vec![0, 1]);
        for segment in path.buffer.iter() {
            assert_eq!(segment.transmit_count, 2);
            assert_eq!(segment.rto, expected_rto);
            assert_eq!(segment.next_retransmit_at, now + expected_rto);
            assert_eq!(segment.header.timestamp, now);
        }
    }

    #[rstest]
    #[case::disabled(0, 1, vec![])]
    #[case::below_threshold(3, 2, vec![])]
    #[case::at_threshold(2, 2, vec![0])]
    #[case::above_threshold(1, 2, vec![0])]
    fn test_flush_fast_retransmit(#[case] threshold: u32, #[case] num_later_acks: u32, #[case] expected_sent: Vec<u32>) {
        let mut path = path_with_in_flight(4);
        do_flush(&mut path, &ctx(1000));

        for sn in 1..=num_later_acks {
            path.ack_single(sn);
        }

        let ctx = FlushContext { fast_retransmit_threshold: threshold, ..ctx(1010) };
        let (outcome, sent) = do_flush(&mut path, &ctx);

        assert_eq!(sent, expected_sent);
        assert_eq!(outcome.fast_retransmitted, !expected_sent.is_empty());
        assert!(!outcome.lost);
        if !expected_sent.is_empty() {
            let head = path.buffer.front().unwrap();
            assert_eq!(head.skip_count, 0);
            assert_eq!(head.transmit_count, 2);
            assert_eq!(head.next_retransmit_at, 1210);
        }
    }

    #[test]
    fn test_flush_timeout_and_fast_retransmit_together() {
        let mut path = path_with_in_flight(3);
        do_flush(&mut path, &ctx(1000));
        path.buffer[1].next_retransmit_at = 2000;
        path.ack_single(2);

        let ctx = FlushContext { fast_retransmit_threshold: 1, ..ctx(1300) };
        let (outcome, sent) = do_flush(&mut path, &ctx);

        assert_eq!(sent, vec![0, 1]);
        assert_eq!(outcome, FlushOutcome { lost: true, fast_retransmitted: true, reached_max_transmit: false });
        assert_eq!(path.buffer[0].rto, 400);
        assert_eq!(path.buffer[1].skip_count, 0);
        assert_eq!(path.buffer[1].rto, 200);
    }

    #[test]
    fn test_flush_max_transmit() {
        let mut path = path_with_in_flight(1);
        let ctx_first = FlushContext { max_transmit_count: 3, ..ctx(0) };

        let (outcome, _) = do_flush(&mut path, &ctx_first);
        assert!(!outcome.reached_max_transmit);

        let mut now = 0;
        let mut num_flushes = 1;
        loop {
            now += 100;
            let (outcome, sent) = do_flush(&mut path, &FlushContext { now, ..ctx_first.clone() });
            if !sent.is_empty() {
                num_flushes += 1;
            }
            if outcome.reached_max_transmit {
                break;
            }
            assert!(now < 100_000);
        }

        assert_eq!(num_flushes, 3);
        assert_eq!(path.buffer.front().unwrap().transmit_count, 3);
    }

    #[test]
    fn test_flush_batches_into_packets() {
        let mut path = SendPath::new();
        path.enqueue_message(&[0; 250], 76).unwrap();
        path.move_into_flight(32, 9, 0, 0);

        let mut sink = MockPacketSink::new();
        // segments of 100, 100, 100 and 46 bytes with mtu 250 -> 2 packets of 2 segments each
        sink.expect_output()
            .times(2)
            .return_const(());

        let mut batch = OutputBatch::new(Vec::new(), 250, Arc::new(sink));
        path.flush(&ctx(0), &mut batch);
        assert_eq!(batch.into_buffer().len(), 250);
    }
}
