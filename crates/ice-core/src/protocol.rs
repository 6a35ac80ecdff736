//! Message framing (spec.md §4.2): the 14-byte header common to every
//! message on the wire, independent of what the message body contains.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::buffer::WireMessage;
use crate::context::Context;
use crate::encoding::{
    ClassFactoryRegistry, Encapsulation, InputStream, OutputStream, VersionPair, ENCODING_VERSION,
    PROTOCOL_VERSION,
};
use crate::error::{LocalError, MarshalError, ReplyStatus};
use crate::identity::Identity;

/// `IceP` magic bytes that open every message (spec.md §4.2).
pub const MAGIC: [u8; 4] = *b"IceP";

/// Size of the fixed header, before the message body.
pub const HEADER_SIZE: usize = 14;

/// Message kind, carried as the fifth header byte (spec.md §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    BatchRequest = 1,
    Reply = 2,
    ValidateConnection = 3,
    CloseConnection = 4,
    Heartbeat = 5,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Request,
            1 => Self::BatchRequest,
            2 => Self::Reply,
            3 => Self::ValidateConnection,
            4 => Self::CloseConnection,
            5 => Self::Heartbeat,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Per-message compression flag (spec.md §4.2). Compression codecs
/// themselves are out of scope (spec.md Non-goals); the byte is carried
/// so a future codec can slot in without a framing change, and today is
/// always [`CompressionStatus::None`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionStatus {
    None = 0,
    Requested = 1,
    Compressed = 2,
}

impl CompressionStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::None,
            1 => Self::Requested,
            2 => Self::Compressed,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The fixed 14-byte header: magic, protocol version, encoding version,
/// message type, compression status, and the total message size including
/// this header (spec.md §4.2).
#[derive(Clone, Copy, Debug)]
pub struct MessageHeader {
    pub protocol_version: VersionPair,
    pub encoding_version: VersionPair,
    pub message_type: MessageType,
    pub compression_status: CompressionStatus,
    pub message_size: i32,
}

impl MessageHeader {
    pub fn new(message_type: MessageType, message_size: i32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            encoding_version: ENCODING_VERSION,
            message_type,
            compression_status: CompressionStatus::None,
            message_size,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&MAGIC);
        buf.put_u8(self.protocol_version.major);
        buf.put_u8(self.protocol_version.minor);
        buf.put_u8(self.encoding_version.major);
        buf.put_u8(self.encoding_version.minor);
        buf.put_u8(self.message_type.as_byte());
        buf.put_u8(self.compression_status.as_byte());
        buf.put_i32_le(self.message_size);
    }

    /// Decodes a header from exactly [`HEADER_SIZE`] bytes, validating the
    /// magic and rejecting an unrecognized protocol major version (spec.md
    /// §4.2, §8: a peer speaking an incompatible protocol major version is
    /// rejected before any body bytes are trusted).
    pub fn decode(buf: &mut Bytes) -> Result<Self, LocalError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(MarshalError::InsufficientBytes {
                needed: HEADER_SIZE,
                available: buf.remaining(),
            }
            .into());
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(LocalError::Other(format!(
                "bad magic bytes: {magic:02x?}, expected {MAGIC:02x?}"
            )));
        }
        let protocol_version = VersionPair::new(buf.get_u8(), buf.get_u8());
        if protocol_version.major != PROTOCOL_VERSION.major {
            return Err(LocalError::UnsupportedEncoding(format!(
                "unsupported protocol major version {protocol_version}"
            )));
        }
        let encoding_version = VersionPair::new(buf.get_u8(), buf.get_u8());
        let message_type = MessageType::from_byte(buf.get_u8())
            .ok_or_else(|| LocalError::Other("unrecognized message type".into()))?;
        let compression_status = CompressionStatus::from_byte(buf.get_u8())
            .ok_or_else(|| LocalError::Other("unrecognized compression status".into()))?;
        let message_size = buf.get_i32_le();
        if (message_size as usize) < HEADER_SIZE {
            return Err(LocalError::Other(
                "message size smaller than header size".into(),
            ));
        }
        Ok(Self {
            protocol_version,
            encoding_version,
            message_type,
            compression_status,
            message_size,
        })
    }
}

/// Wire sentinel for a oneway request on a batch or on a connection that
/// ignores replies entirely (spec.md §3 Connection invariant: "request-id
/// 0 is reserved").
pub const ONEWAY_REQUEST_ID: i32 = 0;

/// Legacy idempotency flag carried in a request body's mode byte (spec.md
/// §3 "Request envelope"). The original source's `Nonmutating` value is
/// deprecated in favor of `Idempotent` and decodes identically for this
/// purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationMode {
    Normal = 0,
    Idempotent = 2,
}

impl OperationMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 | 1 => Some(Self::Normal),
            2 => Some(Self::Idempotent),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_idempotent(self) -> bool {
        matches!(self, Self::Idempotent)
    }
}

/// One invocation's body (spec.md §3 "Request envelope"): everything a
/// Request or BatchRequest message carries besides the request-id, which
/// lives one level up at the message (or not at all, for batch members).
#[derive(Clone, Debug)]
pub struct RequestBody {
    pub identity: Identity,
    /// Legacy 0- or 1-element facet path (spec.md §3); `[]` means the
    /// default facet.
    pub facet: Vec<String>,
    pub operation: String,
    pub mode: OperationMode,
    pub context: Context,
    pub params: Encapsulation,
}

impl RequestBody {
    pub fn facet_name(&self) -> &str {
        self.facet.first().map(String::as_str).unwrap_or("")
    }

    pub fn encode(&self, os: &mut OutputStream) {
        self.identity.encode(os);
        os.write_sequence(&self.facet, |os, f| os.write_string(f));
        os.write_string(&self.operation);
        os.write_u8(self.mode.as_byte());
        self.context.encode(os);
        self.params.encode(os);
    }

    pub fn decode(input: &mut InputStream) -> Result<Self, LocalError> {
        let identity = Identity::decode(input)?;
        let facet_count = input.begin_sequence(1)?;
        let mut facet = Vec::with_capacity(facet_count);
        for _ in 0..facet_count {
            facet.push(input.read_string()?);
        }
        let operation = input.read_string()?;
        let mode = OperationMode::from_byte(input.read_u8()?)
            .ok_or_else(|| LocalError::Other("unrecognized operation mode byte".into()))?;
        let context = Context::decode(input)?;
        let params = input.read_encapsulation()?;
        Ok(Self {
            identity,
            facet,
            operation,
            mode,
            context,
            params,
        })
    }
}

/// Status-specific Reply payload (spec.md §3 "Reply envelope", §6 "Reply
/// statuses"). The three dispatch-failure kinds carry the identity/facet
/// (and, for `OperationNotExist`, operation name) that failed to resolve
/// rather than a free-form message, so a caller can match on them
/// structurally instead of parsing text.
#[derive(Clone, Debug)]
pub enum ReplyPayload {
    Ok(Encapsulation),
    UserException(Encapsulation),
    ObjectNotExist { identity: Identity, facet: Vec<String> },
    FacetNotExist { identity: Identity, facet: Vec<String> },
    OperationNotExist {
        identity: Identity,
        facet: Vec<String>,
        operation: String,
    },
    UnknownLocalException(String),
    UnknownUserException(String),
    UnknownException(String),
}

impl ReplyPayload {
    pub fn status(&self) -> ReplyStatus {
        match self {
            ReplyPayload::Ok(_) => ReplyStatus::Ok,
            ReplyPayload::UserException(_) => ReplyStatus::UserException,
            ReplyPayload::ObjectNotExist { .. } => ReplyStatus::ObjectNotExist,
            ReplyPayload::FacetNotExist { .. } => ReplyStatus::FacetNotExist,
            ReplyPayload::OperationNotExist { .. } => ReplyStatus::OperationNotExist,
            ReplyPayload::UnknownLocalException(_) => ReplyStatus::UnknownLocalException,
            ReplyPayload::UnknownUserException(_) => ReplyStatus::UnknownUserException,
            ReplyPayload::UnknownException(_) => ReplyStatus::UnknownException,
        }
    }

    pub fn encode(&self, os: &mut OutputStream) {
        os.write_u8(self.status().as_byte());
        match self {
            ReplyPayload::Ok(encaps) | ReplyPayload::UserException(encaps) => encaps.encode(os),
            ReplyPayload::ObjectNotExist { identity, facet } | ReplyPayload::FacetNotExist { identity, facet } => {
                identity.encode(os);
                os.write_sequence(facet, |os, f| os.write_string(f));
            }
            ReplyPayload::OperationNotExist {
                identity,
                facet,
                operation,
            } => {
                identity.encode(os);
                os.write_sequence(facet, |os, f| os.write_string(f));
                os.write_string(operation);
            }
            ReplyPayload::UnknownLocalException(msg)
            | ReplyPayload::UnknownUserException(msg)
            | ReplyPayload::UnknownException(msg) => os.write_string(msg),
        }
    }

    pub fn decode(input: &mut InputStream) -> Result<Self, LocalError> {
        let status = ReplyStatus::from_byte(input.read_u8()?)
            .ok_or_else(|| LocalError::Other("unrecognized reply status byte".into()))?;
        Ok(match status {
            ReplyStatus::Ok => ReplyPayload::Ok(input.read_encapsulation()?),
            ReplyStatus::UserException => ReplyPayload::UserException(input.read_encapsulation()?),
            ReplyStatus::ObjectNotExist => {
                let identity = Identity::decode(input)?;
                let facet = decode_facet(input)?;
                ReplyPayload::ObjectNotExist { identity, facet }
            }
            ReplyStatus::FacetNotExist => {
                let identity = Identity::decode(input)?;
                let facet = decode_facet(input)?;
                ReplyPayload::FacetNotExist { identity, facet }
            }
            ReplyStatus::OperationNotExist => {
                let identity = Identity::decode(input)?;
                let facet = decode_facet(input)?;
                let operation = input.read_string()?;
                ReplyPayload::OperationNotExist {
                    identity,
                    facet,
                    operation,
                }
            }
            ReplyStatus::UnknownLocalException => ReplyPayload::UnknownLocalException(input.read_string()?),
            ReplyStatus::UnknownUserException => ReplyPayload::UnknownUserException(input.read_string()?),
            ReplyStatus::UnknownException => ReplyPayload::UnknownException(input.read_string()?),
        })
    }
}

fn decode_facet(input: &mut InputStream) -> Result<Vec<String>, LocalError> {
    let count = input.begin_sequence(1)?;
    let mut facet = Vec::with_capacity(count);
    for _ in 0..count {
        facet.push(input.read_string()?);
    }
    Ok(facet)
}

/// A fully-decoded protocol message, independent of which [`MessageType`]
/// it arrived as (spec.md §4.2).
#[derive(Clone, Debug)]
pub enum ProtocolMessage {
    Request { request_id: i32, body: RequestBody },
    /// All batched requests are implicitly oneway (spec.md §4.2); there is
    /// no per-member request-id.
    BatchRequest { bodies: Vec<RequestBody> },
    Reply { request_id: i32, payload: ReplyPayload },
    ValidateConnection,
    CloseConnection,
    Heartbeat,
}

/// Assembles a complete header-plus-body wire message from an already
/// version-stamped [`MessageHeader`] and a pre-encoded body. Shared by
/// every `encode_*_message` helper below so the total-size patch-up
/// happens in exactly one place.
fn assemble(message_type: MessageType, body: impl FnOnce(&mut BytesMut)) -> WireMessage {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
    let header = MessageHeader::new(message_type, 0);
    header.encode(&mut buf);
    body(&mut buf);
    let total = buf.len() as i32;
    buf[10..14].copy_from_slice(&total.to_le_bytes());
    WireMessage::from(buf)
}

pub fn encode_request_message(request_id: i32, body: &RequestBody) -> WireMessage {
    assemble(MessageType::Request, |buf| {
        buf.put_i32_le(request_id);
        let mut os = OutputStream::with_default_encoding();
        body.encode(&mut os);
        buf.extend_from_slice(&os.into_bytes());
    })
}

pub fn encode_batch_request_message(bodies: &[RequestBody]) -> WireMessage {
    assemble(MessageType::BatchRequest, |buf| {
        buf.put_i32_le(bodies.len() as i32);
        let mut os = OutputStream::with_default_encoding();
        for body in bodies {
            body.encode(&mut os);
        }
        buf.extend_from_slice(&os.into_bytes());
    })
}

pub fn encode_reply_message(request_id: i32, payload: &ReplyPayload) -> WireMessage {
    assemble(MessageType::Reply, |buf| {
        buf.put_i32_le(request_id);
        let mut os = OutputStream::with_default_encoding();
        payload.encode(&mut os);
        buf.extend_from_slice(&os.into_bytes());
    })
}

pub fn encode_validate_connection_message() -> WireMessage {
    assemble(MessageType::ValidateConnection, |_| {})
}

pub fn encode_close_connection_message() -> WireMessage {
    assemble(MessageType::CloseConnection, |_| {})
}

pub fn encode_heartbeat_message() -> WireMessage {
    assemble(MessageType::Heartbeat, |_| {})
}

/// Decodes a message body given its already-parsed [`MessageHeader`] and
/// the remaining body bytes (spec.md §4.2). `body` must contain exactly
/// `header.message_size - HEADER_SIZE` bytes; the caller (the connection's
/// read loop) is responsible for having buffered that much before calling.
pub fn decode_message_body(
    header: &MessageHeader,
    mut body: Bytes,
    message_size_max: usize,
    class_factories: Arc<ClassFactoryRegistry>,
) -> Result<ProtocolMessage, LocalError> {
    match header.message_type {
        MessageType::Request => {
            if body.remaining() < 4 {
                return Err(MarshalError::InsufficientBytes {
                    needed: 4,
                    available: body.remaining(),
                }
                .into());
            }
            let request_id = body.get_i32_le();
            let mut input = InputStream::new(body, header.encoding_version, message_size_max, class_factories);
            let decoded = RequestBody::decode(&mut input)?;
            Ok(ProtocolMessage::Request {
                request_id,
                body: decoded,
            })
        }
        MessageType::BatchRequest => {
            if body.remaining() < 4 {
                return Err(MarshalError::InsufficientBytes {
                    needed: 4,
                    available: body.remaining(),
                }
                .into());
            }
            let count = body.get_i32_le();
            if count < 0 {
                return Err(MarshalError::NegativeSize.into());
            }
            let mut input = InputStream::new(body, header.encoding_version, message_size_max, class_factories);
            let mut bodies = Vec::with_capacity(count as usize);
            for _ in 0..count {
                bodies.push(RequestBody::decode(&mut input)?);
            }
            Ok(ProtocolMessage::BatchRequest { bodies })
        }
        MessageType::Reply => {
            if body.remaining() < 4 {
                return Err(MarshalError::InsufficientBytes {
                    needed: 4,
                    available: body.remaining(),
                }
                .into());
            }
            let request_id = body.get_i32_le();
            let mut input = InputStream::new(body, header.encoding_version, message_size_max, class_factories);
            let payload = ReplyPayload::decode(&mut input)?;
            Ok(ProtocolMessage::Reply { request_id, payload })
        }
        MessageType::ValidateConnection => Ok(ProtocolMessage::ValidateConnection),
        MessageType::CloseConnection => Ok(ProtocolMessage::CloseConnection),
        MessageType::Heartbeat => Ok(ProtocolMessage::Heartbeat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_header() {
        let header = MessageHeader::new(MessageType::Request, 42);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        let mut frozen = buf.freeze();
        let decoded = MessageHeader::decode(&mut frozen).unwrap();
        assert_eq!(decoded.message_type, MessageType::Request);
        assert_eq!(decoded.message_size, 42);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"XXXX");
        buf.extend_from_slice(&[0u8; 10]);
        let mut frozen = buf.freeze();
        assert!(MessageHeader::decode(&mut frozen).is_err());
    }
}
