//! Fixed-width unsigned integers in network byte order (BE), written to and read from an
//!  explicit offset in a byte buffer.
//!
//! There is no error handling here: callers check buffer capacity before encoding or decoding,
//!  and an out-of-range offset is a bug that panics.

use bytes::{Buf, BufMut};

pub fn encode_u8(buf: &mut [u8], offs: usize, value: u8) -> usize {
    let mut target = &mut buf[offs..];
    target.put_u8(value);
    size_of::<u8>()
}

pub fn encode_u16(buf: &mut [u8], offs: usize, value: u16) -> usize {
    let mut target = &mut buf[offs..];
    target.put_u16(value);
    size_of::<u16>()
}

pub fn encode_u32(buf: &mut [u8], offs: usize, value: u32) -> usize {
    let mut target = &mut buf[offs..];
    target.put_u32(value);
    size_of::<u32>()
}

pub fn decode_u8(buf: &[u8], offs: usize) -> u8 {
    let mut source = &buf[offs..];
    source.get_u8()
}

pub fn decode_u16(buf: &[u8], offs: usize) -> u16 {
    let mut source = &buf[offs..];
    source.get_u16()
}

pub fn decode_u32(buf: &[u8], offs: usize) -> u32 {
    let mut source = &buf[offs..];
    source.get_u32()
}
