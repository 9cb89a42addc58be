//! A reliable, ordered, message-oriented transport on top of an unreliable datagram channel
//!  (typically UDP), in the style of KCP.
//!
//! The application sends and receives *messages*. A message is split into up to 255 segments
//!  that each fit into a packet of the configured MTU, and the receiver reassembles them and
//!  delivers complete messages in the order they were sent.
//!
//! ## Design goals
//!
//! * The protocol engine does no I/O and reads no clock. The application feeds it received
//!   datagrams, supplies a millisecond timestamp when driving it, and provides a [PacketSink]
//!   for outgoing packets. This keeps it deterministic and easy to test with synthetic time.
//! * Reliability through selective acks for individual segments plus a cumulative ack in every
//!   segment, with retransmission timeouts based on measured round-trip times
//! * Low latency on demand: fast retransmit when later segments are acked first, and a
//!   'no delay' mode with less conservative retransmission timing
//! * Flow control: every segment advertises the sender's free receive window. If the peer's
//!   window is closed, the connection periodically asks for it.
//! * Optional TCP-style congestion control (slow start, congestion avoidance)
//! * Several segments are combined into a single packet if they fit
//!
//! Explicitly out of scope are connection setup and teardown (both sides agree on a
//!  conversation id out of band), sequence number wrap-around, stream mode and encryption.
//!
//! ## Header
//!
//! Every segment starts with this header - all numbers in network byte order (BE):
//! ```ascii
//!  0: conversation id (u32) - both sides of a conversation must use the same id
//!  4: command (u8):
//!     * 0 ACK - selective ack for a single DATA segment
//!     * 1 DATA
//!     * 2 TELL_WINDOW_SIZE - report of the free receive window
//!     * 3 ASK_WINDOW_SIZE - request for TELL_WINDOW_SIZE
//!  5: fragment index (u8) - DATA segments of a message are numbered in descending order, the
//!      last segment having index 0
//!  6: free receive window of the sender in packets (u16)
//!  8: timestamp (u32) - time of sending for DATA, echoed from the acked DATA segment for ACK
//! 12: sequence number (u32)
//! 16: cumulative ack (u32) - the sender has received all segments below this sequence number
//! 20: payload length (u32)
//! 24: payload
//! ```
//!
//! A packet contains one or more segments back to back.

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod output_batch;
pub mod probe;
pub mod receive_path;
pub mod rtt;
pub mod segment;
pub mod send_path;
pub mod sink;
pub mod test_util;

mod codec;
mod safe_converter;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{InputError, MtuError, ReceiveError, SendError};
pub use sink::PacketSink;
