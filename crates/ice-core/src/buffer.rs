//! Zero-copy byte buffer primitives (spec.md §2, "Buffer & byte order
//! primitives"). The encoding codec reads and writes through these thin
//! traits rather than directly against `bytes::Bytes`/`BytesMut` so that a
//! transceiver can hand the codec a borrowed chunk without a copy when the
//! whole message is already resident in memory.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Endian-normalized little-endian primitive reads over a byte slice. The
/// wire format is little-endian throughout (spec.md §4.1), independent of
/// host byte order.
pub trait LittleEndianReader {
    fn get_u8(&mut self) -> u8;
    fn get_i16_le(&mut self) -> i16;
    fn get_i32_le(&mut self) -> i32;
    fn get_i64_le(&mut self) -> i64;
    fn get_f32_le(&mut self) -> f32;
    fn get_f64_le(&mut self) -> f64;
}

impl<T: Buf> LittleEndianReader for T {
    fn get_u8(&mut self) -> u8 {
        Buf::get_u8(self)
    }
    fn get_i16_le(&mut self) -> i16 {
        Buf::get_i16_le(self)
    }
    fn get_i32_le(&mut self) -> i32 {
        Buf::get_i32_le(self)
    }
    fn get_i64_le(&mut self) -> i64 {
        Buf::get_i64_le(self)
    }
    fn get_f32_le(&mut self) -> f32 {
        Buf::get_f32_le(self)
    }
    fn get_f64_le(&mut self) -> f64 {
        Buf::get_f64_le(self)
    }
}

/// Endian-normalized little-endian primitive writes.
pub trait LittleEndianWriter {
    fn put_u8(&mut self, value: u8);
    fn put_i16_le(&mut self, value: i16);
    fn put_i32_le(&mut self, value: i32);
    fn put_i64_le(&mut self, value: i64);
    fn put_f32_le(&mut self, value: f32);
    fn put_f64_le(&mut self, value: f64);
}

impl<T: BufMut> LittleEndianWriter for T {
    fn put_u8(&mut self, value: u8) {
        BufMut::put_u8(self, value);
    }
    fn put_i16_le(&mut self, value: i16) {
        BufMut::put_i16_le(self, value);
    }
    fn put_i32_le(&mut self, value: i32) {
        BufMut::put_i32_le(self, value);
    }
    fn put_i64_le(&mut self, value: i64) {
        BufMut::put_i64_le(self, value);
    }
    fn put_f32_le(&mut self, value: f32) {
        BufMut::put_f32_le(self, value);
    }
    fn put_f64_le(&mut self, value: f64) {
        BufMut::put_f64_le(self, value);
    }
}

/// A fully-materialized wire message, ready to hand to a transceiver. Kept
/// as a distinct newtype (rather than a bare `Bytes`) so that message
/// framing code reads as domain vocabulary at call sites.
#[derive(Clone, Debug, Default)]
pub struct WireMessage(pub Bytes);

impl WireMessage {
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BytesMut> for WireMessage {
    fn from(buf: BytesMut) -> Self {
        WireMessage(buf.freeze())
    }
}

impl From<Bytes> for WireMessage {
    fn from(buf: Bytes) -> Self {
        WireMessage(buf)
    }
}
