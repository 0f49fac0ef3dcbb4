//! Primitives for encoding and decoding wire structures
//!
//! EtherCAT mailbox structures are little-endian on the wire.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Error indicating that a buffer ended earlier than a structure required
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("unexpected end of buffer")]
pub struct UnexpectedEnd;

/// Decode result
pub type Result<T> = std::result::Result<T, UnexpectedEnd>;

/// Infallibly encodable, fallibly decodable wire structure
pub trait Codec: Sized {
    /// Decode a `Self` from the front of `buf`, advancing it
    fn decode<B: Buf>(buf: &mut B) -> Result<Self>;
    /// Append a `Self` to `buf`
    fn encode<B: BufMut>(&self, buf: &mut B);
}

impl Codec for u8 {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(UnexpectedEnd);
        }
        Ok(buf.get_u8())
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(*self);
    }
}

impl Codec for u16 {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(UnexpectedEnd);
        }
        Ok(buf.get_u16_le())
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(*self);
    }
}

/// Convenience for `Buf`
pub trait BufExt {
    /// Decode a `T` from the front of the buffer
    fn get<T: Codec>(&mut self) -> Result<T>;
}

impl<B: Buf> BufExt for B {
    fn get<T: Codec>(&mut self) -> Result<T> {
        T::decode(self)
    }
}

/// Convenience for `BufMut`
pub trait BufMutExt {
    /// Append an encoded `T`
    fn write<T: Codec>(&mut self, x: T);
}

impl<B: BufMut> BufMutExt for B {
    fn write<T: Codec>(&mut self, x: T) {
        x.encode(self);
    }
}
