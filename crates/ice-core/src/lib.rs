//! Wire protocol, encoding codec, identity and exception taxonomy shared by
//! every other crate in the workspace (spec.md §2 component table, row
//! "Core"). Transports, the runtime reactor and the proxy/dispatch
//! pipeline all depend on this crate; it depends on nothing else in the
//! workspace.

pub mod buffer;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod retry;

pub use buffer::WireMessage;
pub use config::{AcmClose, AcmConfig, AcmHeartbeat, CommunicatorConfig};
pub use context::Context;
pub use descriptor::{InterfaceDescriptor, OperationDescriptor};
pub use error::{
    LocalError, MemoryLimitError, OpaqueUserError, ReplyStatus, Result, SystemError,
    UnsupportedEncodingError, UserError, UserErrorFactory, UserErrorRegistry,
};
pub use identity::Identity;
pub use protocol::{
    decode_message_body, encode_batch_request_message, encode_close_connection_message,
    encode_heartbeat_message, encode_reply_message, encode_request_message,
    encode_validate_connection_message, CompressionStatus, MessageHeader, MessageType,
    OperationMode, ProtocolMessage, ReplyPayload, RequestBody, HEADER_SIZE, MAGIC,
    ONEWAY_REQUEST_ID,
};
