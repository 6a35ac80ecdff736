//! Variable-length size encoding (spec.md §4.1 "Size encoding").
//!
//! One byte `< 255` encodes `0..=254` directly; a byte `== 255` is followed
//! by 4 little-endian bytes encoding `0..=2^31-1`. Every container length,
//! enum index and tag-escape sentinel on the wire uses this encoding.
//! Instance back-references in the class graph reuse the same byte layout
//! but allow negative values (spec.md §4.1 "Class instance graph"); that
//! variant lives in [`write_signed_size`]/[`read_signed_size`].

use bytes::{Buf, BufMut};

use crate::error::MarshalError;

pub const SIZE_ESCAPE: u8 = 255;

pub fn write_size(buf: &mut impl BufMut, value: i32) {
    debug_assert!(value >= 0, "write_size requires a non-negative value");
    if value < SIZE_ESCAPE as i32 {
        buf.put_u8(value as u8);
    } else {
        buf.put_u8(SIZE_ESCAPE);
        buf.put_i32_le(value);
    }
}

pub fn read_size(buf: &mut impl Buf) -> Result<i32, MarshalError> {
    require(buf, 1)?;
    let first = buf.get_u8();
    if first == SIZE_ESCAPE {
        require(buf, 4)?;
        let value = buf.get_i32_le();
        if value < 0 {
            return Err(MarshalError::NegativeSize);
        }
        Ok(value)
    } else {
        Ok(first as i32)
    }
}

/// Signed variant used only for class-instance back-references, where a
/// negative value denotes "see instance with this id" and a positive value
/// of `1` denotes "a new instance follows inline" (see
/// `encoding::slicing`).
pub fn write_signed_size(buf: &mut impl BufMut, value: i32) {
    if (0..SIZE_ESCAPE as i32).contains(&value) {
        buf.put_u8(value as u8);
    } else {
        buf.put_u8(SIZE_ESCAPE);
        buf.put_i32_le(value);
    }
}

pub fn read_signed_size(buf: &mut impl Buf) -> Result<i32, MarshalError> {
    require(buf, 1)?;
    let first = buf.get_u8();
    if first == SIZE_ESCAPE {
        require(buf, 4)?;
        Ok(buf.get_i32_le())
    } else {
        Ok(first as i32)
    }
}

pub(crate) fn require(buf: &impl Buf, needed: usize) -> Result<(), MarshalError> {
    if buf.remaining() < needed {
        Err(MarshalError::InsufficientBytes {
            needed,
            available: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    #[test]
    fn encodes_small_values_in_one_byte() {
        let mut buf = BytesMut::new();
        write_size(&mut buf, 254);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn encodes_large_values_with_escape() {
        let mut buf = BytesMut::new();
        write_size(&mut buf, 100_000);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], SIZE_ESCAPE);
    }

    proptest! {
        #[test]
        fn round_trips(value in 0i32..i32::MAX) {
            let mut buf = BytesMut::new();
            write_size(&mut buf, value);
            let mut frozen = buf.freeze();
            prop_assert_eq!(read_size(&mut frozen).unwrap(), value);
        }

        #[test]
        fn signed_round_trips(value in i32::MIN..i32::MAX) {
            let mut buf = BytesMut::new();
            write_signed_size(&mut buf, value);
            let mut frozen = buf.freeze();
            prop_assert_eq!(read_signed_size(&mut frozen).unwrap(), value);
        }
    }
}
