use crate::codec::{decode_u16, decode_u32, decode_u8, encode_u16, encode_u32, encode_u8};
use crate::error::InputError;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{Debug, Formatter};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum Command {
    /// selective ack for a single DATA segment, echoing that segment's timestamp
    Ack = 0,
    Data = 1,
    /// unsolicited report of the sender's free receive window, e.g. after it recovered from
    ///  being full
    TellWindowSize = 2,
    /// probe sent while the peer's receive window is known to be zero
    AskWindowSize = 3,
}

#[derive(Clone, Eq, PartialEq)]
pub struct SegmentHeader {
    pub conversation_id: u32,
    pub command: Command,
    /// Fragments of a message are numbered in descending order, the last fragment having index 0
    pub fragment_index: u8,
    /// the sender's free receive window in packets
    pub window_hint: u16,
    pub timestamp: u32,
    pub sequence_number: u32,
    /// the sender's next expected sequence number, acknowledging everything below it
    pub cumulative_ack: u32,
    pub payload_len: u32,
}

impl Debug for SegmentHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SEG{{{}:{:?}#{}/{} una={} wnd={} ts={} len={}}}",
               self.conversation_id,
               self.command,
               self.sequence_number,
               self.fragment_index,
               self.cumulative_ack,
               self.window_hint,
               self.timestamp,
               self.payload_len,
        )
    }
}

impl SegmentHeader {
    pub const SERIALIZED_LEN: usize =
        size_of::<u32>()     // conversation id
        + size_of::<u8>()    // command
        + size_of::<u8>()    // fragment index
        + size_of::<u16>()   // window hint
        + size_of::<u32>()   // timestamp
        + size_of::<u32>()   // sequence number
        + size_of::<u32>()   // cumulative ack
        + size_of::<u32>();  // payload length

    /// writes the header at `offs`, returning the number of bytes written
    pub fn encode(&self, buf: &mut [u8], offs: usize) -> usize {
        let mut loc = offs;
        loc += encode_u32(buf, loc, self.conversation_id);
        loc += encode_u8(buf, loc, self.command.into());
        loc += encode_u8(buf, loc, self.fragment_index);
        loc += encode_u16(buf, loc, self.window_hint);
        loc += encode_u32(buf, loc, self.timestamp);
        loc += encode_u32(buf, loc, self.sequence_number);
        loc += encode_u32(buf, loc, self.cumulative_ack);
        loc += encode_u32(buf, loc, self.payload_len);
        loc - offs
    }

    /// Decodes and validates the header at `offs`. The caller ensures that a full header is
    ///  available; the declared payload is checked against the rest of the buffer.
    ///
    /// Validation happens in the order conversation id, payload length, command.
    pub fn decode(buf: &[u8], offs: usize, expected_conversation_id: u32) -> Result<SegmentHeader, InputError> {
        debug_assert!(buf.len() >= offs + Self::SERIALIZED_LEN);

        let conversation_id = decode_u32(buf, offs);
        let raw_command = decode_u8(buf, offs + 4);
        let fragment_index = decode_u8(buf, offs + 5);
        let window_hint = decode_u16(buf, offs + 6);
        let timestamp = decode_u32(buf, offs + 8);
        let sequence_number = decode_u32(buf, offs + 12);
        let cumulative_ack = decode_u32(buf, offs + 16);
        let payload_len = decode_u32(buf, offs + 20);

        if conversation_id != expected_conversation_id {
            return Err(InputError::ConversationMismatch {
                expected: expected_conversation_id,
                actual: conversation_id,
            });
        }

        let available = buf.len() - offs - Self::SERIALIZED_LEN;
        let declared: usize = payload_len.safe_cast();
        if declared > available {
            return Err(InputError::Truncated {
                declared,
                available,
            });
        }

        let command = Command::try_from(raw_command)
            .map_err(|_| InputError::UnknownCommand(raw_command))?;

        Ok(SegmentHeader {
            conversation_id,
            command,
            fragment_index,
            window_hint,
            timestamp,
            sequence_number,
            cumulative_ack,
            payload_len,
        })
    }
}

/// A segment together with the sender-side bookkeeping for (re)transmitting it. The bookkeeping
///  fields are local and never go on the wire.
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Bytes,

    pub next_retransmit_at: u32,
    pub rto: u32,
    pub transmit_count: u32,
    /// number of times a higher sequence number was acked while this segment was still in flight
    pub skip_count: u32,
}

impl Debug for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[tx={} skip={} rto={} due={}]",
               self.header,
               self.transmit_count,
               self.skip_count,
               self.rto,
               self.next_retransmit_at,
        )
    }
}

impl Segment {
    /// A fragment of an outbound message that was not assigned a sequence number yet
    pub fn fragment(fragment_index: u8, payload: Bytes) -> Segment {
        Segment {
            header: SegmentHeader {
                conversation_id: 0,
                command: Command::Data,
                fragment_index,
                window_hint: 0,
                timestamp: 0,
                sequence_number: 0,
                cumulative_ack: 0,
                payload_len: payload.len().prechecked_cast(),
            },
            payload,
            next_retransmit_at: 0,
            rto: 0,
            transmit_count: 0,
            skip_count: 0,
        }
    }

    pub fn received(header: SegmentHeader, payload: Bytes) -> Segment {
        debug_assert_eq!(header.payload_len as usize, payload.len());

        Segment {
            header,
            payload,
            next_retransmit_at: 0,
            rto: 0,
            transmit_count: 0,
            skip_count: 0,
        }
    }

    pub fn sequence_number(&self) -> u32 {
        self.header.sequence_number
    }

    pub fn encoded_len(&self) -> usize {
        SegmentHeader::SERIALIZED_LEN + self.payload.len()
    }
}
