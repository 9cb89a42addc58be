use thiserror::Error;

/// Rejections of an application message handed to [`crate::Connection::send`]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum SendError {
    #[error("message is empty")]
    Unreadable,
    #[error("message of {len} bytes needs {fragments} fragments, but at most {max} are supported")]
    TooLarge { len: usize, fragments: usize, max: usize },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum ReceiveError {
    #[error("no data in the receive queue")]
    NoData,
    #[error("the next message is not completely received yet")]
    Incomplete,
    #[error("buffer of {available} bytes is too small for a message of {required} bytes")]
    BufferTooSmall { required: usize, available: usize },
    /// This is an internal consistency check and indicates a bug rather than bad input
    #[error("copied {copied} bytes, but the readable message size was {expected} bytes")]
    LengthMismatch { expected: usize, copied: usize },
}

/// Protocol violations detected while decoding incoming bytes. Segments decoded before the
///  offending one remain applied.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum InputError {
    #[error("input of {len} bytes is shorter than a segment header")]
    TooShort { len: usize },
    #[error("segment for conversation {actual}, expected {expected}")]
    ConversationMismatch { expected: u32, actual: u32 },
    #[error("segment declares {declared} payload bytes, but only {available} remain")]
    Truncated { declared: usize, available: usize },
    #[error("unknown command code {0}")]
    UnknownCommand(u8),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[error("MTU {mtu} is smaller than the segment header size {header_len}")]
pub struct MtuError {
    pub mtu: usize,
    pub header_len: usize,
}
