//! Minimal RFC 6455 binary-frame codec: only what carrying Ice messages
//! inside WebSocket frames needs (spec.md §5). Text frames, ping/pong and
//! extensions are not produced; an incoming close frame is surfaced as a
//! graceful [`ice_core::LocalError::CloseConnectionReceived`].

use bytes::{Buf, BufMut, BytesMut};
use ice_core::LocalError;

const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const FIN: u8 = 0x80;
const MASKED: u8 = 0x80;

/// Encodes `payload` as a single final binary frame. `mask` is `Some` for
/// client-to-server frames (RFC 6455 §5.1 requires masking from the
/// client) and `None` for server-to-client frames.
pub fn encode_binary_frame(out: &mut BytesMut, payload: &[u8], mask: Option<[u8; 4]>) {
    out.put_u8(FIN | OPCODE_BINARY);
    let mask_bit = if mask.is_some() { MASKED } else { 0 };
    let len = payload.len();
    if len < 126 {
        out.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(mask_bit | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(len as u64);
    }
    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            for (i, byte) in out[start..].iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }
        None => out.extend_from_slice(payload),
    }
}

/// One fully-decoded frame's payload, with its opcode interpreted for the
/// subset this codec understands.
pub enum DecodedFrame {
    Binary(Vec<u8>),
    Close,
}

/// Attempts to decode one complete frame from the front of `buf`, leaving
/// `buf` untouched (returning `None`) if the frame isn't fully buffered
/// yet. Fragmented messages (non-final frames / continuation opcode) are
/// not supported, matching this codec's minimal scope.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<DecodedFrame>, LocalError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let first = buf[0];
    let second = buf[1];
    let fin = first & FIN != 0;
    let opcode = first & 0x0f;
    let masked = second & MASKED != 0;
    let mut len = (second & 0x7f) as u64;

    let mut header_len = 2usize;
    if len == 126 {
        if buf.len() < 4 {
            return Ok(None);
        }
        len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
        header_len = 4;
    } else if len == 127 {
        if buf.len() < 10 {
            return Ok(None);
        }
        len = u64::from_be_bytes(buf[2..10].try_into().unwrap());
        header_len = 10;
    }

    let mask_key_len = if masked { 4 } else { 0 };
    let total = header_len + mask_key_len + len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let mut frame = buf.split_to(total);
    frame.advance(header_len);
    let mask_key = if masked {
        let mut key = [0u8; 4];
        key.copy_from_slice(&frame[..4]);
        frame.advance(4);
        Some(key)
    } else {
        None
    };
    let mut payload = frame.to_vec();
    if let Some(key) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    if !fin {
        return Err(LocalError::Other(
            "fragmented WebSocket messages are not supported".into(),
        ));
    }

    match opcode {
        OPCODE_BINARY => Ok(Some(DecodedFrame::Binary(payload))),
        OPCODE_CLOSE => Ok(Some(DecodedFrame::Close)),
        other => Err(LocalError::Other(format!(
            "unsupported WebSocket opcode {other}"
        ))),
    }
}
