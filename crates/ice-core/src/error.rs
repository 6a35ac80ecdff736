//! Exception taxonomy for the core.
//!
//! The wire protocol and dispatch pipeline recognize exactly three disjoint
//! error kinds (spec.md §3, §7): [`LocalError`] (transport/dispatch
//! failures, some of which are retryable), [`UserError`] (declared in an
//! interface contract and transported end to end with slicing), and
//! [`SystemError`] (internal invariant violations that are never
//! transported). Keeping them as distinct types — rather than one flat enum
//! — lets the dispatch pipeline enforce at compile time which kinds can
//! cross the wire and which can only ever be logged.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Reply-status byte carried in a Reply message (spec.md §4.2, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReplyStatus {
    Ok = 0,
    UserException = 1,
    ObjectNotExist = 2,
    FacetNotExist = 3,
    OperationNotExist = 4,
    UnknownLocalException = 5,
    UnknownUserException = 6,
    UnknownException = 7,
}

impl ReplyStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Ok,
            1 => Self::UserException,
            2 => Self::ObjectNotExist,
            3 => Self::FacetNotExist,
            4 => Self::OperationNotExist,
            5 => Self::UnknownLocalException,
            6 => Self::UnknownUserException,
            7 => Self::UnknownException,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Local (transport/dispatch) failures. Never transported as a full value;
/// on the wire they show up only as a [`ReplyStatus`] and, for the three
/// dispatch kinds, an identity/facet/operation payload (spec.md §7).
#[derive(Clone, Debug, thiserror::Error)]
pub enum LocalError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("connection closed by peer")]
    CloseConnectionReceived,
    #[error("connection timed out")]
    ConnectionTimeout,
    #[error("invocation timed out")]
    InvocationTimeout,
    #[error("invocation canceled")]
    InvocationCanceled,
    #[error("object `{identity}` does not exist")]
    ObjectNotExist { identity: String },
    #[error("facet `{facet}` on `{identity}` does not exist")]
    FacetNotExist { identity: String, facet: String },
    #[error("operation `{operation}` does not exist on `{identity}`")]
    OperationNotExist { identity: String, operation: String },
    #[error("object adapter deactivated")]
    ObjectAdapterDeactivated,
    #[error("retry required: {0}")]
    RetryError(String),
    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),
    #[error("datagram exceeds transport limit ({size} > {limit})")]
    DatagramLimit { size: usize, limit: usize },
    #[error("TLS trust error: {0}")]
    Trust(String),
    #[error("unsupported protocol encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("{0}")]
    Other(String),
}

impl LocalError {
    /// Whether a retry is ever worth attempting for this failure, per the
    /// table in spec.md §7. Idempotency of the *operation* still gates
    /// whether a retry is attempted after bytes were sent; this only says
    /// the failure itself is the retryable kind.
    pub fn is_retryable_kind(&self) -> bool {
        matches!(
            self,
            LocalError::ConnectFailed(_)
                | LocalError::ConnectionLost(_)
                | LocalError::CloseConnectionReceived
                | LocalError::InvocationTimeout
        )
    }

    /// Whether this failure is known to have occurred before any request
    /// bytes reached the peer. A non-idempotent operation may only retry
    /// on these (spec.md §7: "Non-idempotent operations retry only on
    /// failures that definitively occurred before the request was
    /// dispatched"); an idempotent one may retry on any retryable kind.
    pub fn is_pre_send_kind(&self) -> bool {
        matches!(self, LocalError::ConnectFailed(_) | LocalError::RetryError(_))
    }

    /// Dispatch-kind local exceptions are transported verbatim as a
    /// reply-status (spec.md §7 row 2); everything else either never
    /// crosses the wire or is wrapped as `UnknownLocalException`.
    pub fn reply_status(&self) -> ReplyStatus {
        match self {
            LocalError::ObjectNotExist { .. } => ReplyStatus::ObjectNotExist,
            LocalError::FacetNotExist { .. } => ReplyStatus::FacetNotExist,
            LocalError::OperationNotExist { .. } => ReplyStatus::OperationNotExist,
            _ => ReplyStatus::UnknownLocalException,
        }
    }
}

/// Errors raised while decoding or encoding the wire format (spec.md §4.1).
#[derive(Clone, Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("insufficient bytes: needed {needed}, had {available}")]
    InsufficientBytes { needed: usize, available: usize },
    #[error("negative size encountered where only non-negative is valid")]
    NegativeSize,
    #[error("tagged member out of order: tag {tag} is not greater than the previous tag {previous}")]
    TagOutOfOrder { tag: u32, previous: u32 },
    #[error("slice size mismatch: header declared {declared}, consumed {consumed}")]
    SliceSizeMismatch { declared: i32, consumed: i32 },
    #[error("class graph nesting exceeds the configured depth limit ({limit})")]
    ClassGraphTooDeep { limit: u32 },
    #[error("unknown enumerator value {value} for enum with range 0..={max}")]
    EnumOutOfRange { value: i32, max: i32 },
    #[error("unresolved class-graph back-reference with id {0}")]
    UnresolvedInstanceId(i32),
    #[error("{0}")]
    Other(String),
}

/// Allocation would exceed the configured `messageSizeMax`; rejected before
/// any allocation proportional to the claimed size happens (spec.md §4.1,
/// §8 invariant on `MessageSizeMax`).
#[derive(Clone, Debug, thiserror::Error)]
#[error("requested allocation of {requested} bytes exceeds messageSizeMax ({limit})")]
pub struct MemoryLimitError {
    pub requested: usize,
    pub limit: usize,
}

/// Encoding major-version mismatch between reader and encapsulation.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unsupported encoding {encoding_major}.{encoding_minor}")]
pub struct UnsupportedEncodingError {
    pub encoding_major: u8,
    pub encoding_minor: u8,
}

/// A user exception declared in an interface contract (spec.md §4.1 "User
/// exception"). `encode_body`/[`UserErrorFactory::decode_body`] write and
/// read only this type's own slice — the type-id, `FSize` framing and
/// has-more flag around it are handled once by
/// [`crate::encoding::encode_user_error`]/[`crate::encoding::decode_user_error`]
/// so every declared exception doesn't reimplement that bookkeeping.
pub trait UserError: fmt::Debug + Send + Sync + Any + 'static {
    /// Most-derived Slice type-id, e.g. `"::Demo::FooError"`.
    fn type_id(&self) -> &str;

    /// Encode this exception's own members into `os`.
    fn encode_body(&self, os: &mut crate::encoding::OutputStream);

    /// Supports recovering the concrete type from the `Arc<dyn UserError>`
    /// a caller gets back out of [`crate::encoding::DecodedUserError::Known`].
    fn as_any(&self) -> &dyn Any;
}

/// Reconstructs a concrete [`UserError`] from its wire bytes, keyed by the
/// exception's type-id (spec.md §4.1 "User exception"; mirrors
/// [`crate::encoding::ClassFactory`] for values).
pub trait UserErrorFactory: Send + Sync {
    fn type_id(&self) -> &str;
    fn decode_body(&self, is: &mut crate::encoding::InputStream) -> Result<Arc<dyn UserError>, LocalError>;
}

/// Registry of known exception factories for one operation's declared
/// throws clause (or, for a generic client, every exception type it knows
/// about). A type-id with no registered factory decodes to
/// [`OpaqueUserError`] instead of failing (spec.md §4.1, §7: "readers with
/// no factory for the thrown type unwind through base slices and throw the
/// closest known base; if none are known, they surface a synthetic
/// 'unknown user exception'").
#[derive(Default)]
pub struct UserErrorRegistry {
    factories: std::collections::HashMap<String, Arc<dyn UserErrorFactory>>,
}

impl UserErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn UserErrorFactory>) {
        self.factories.insert(factory.type_id().to_string(), factory);
    }

    pub fn get(&self, type_id: &str) -> Option<&Arc<dyn UserErrorFactory>> {
        self.factories.get(type_id)
    }
}

/// Opaque handle to a user exception instance once it has crossed the
/// dispatch boundary, retaining enough information to re-marshal it even if
/// the receiving process has no factory for the concrete type (spec.md
/// §4.1: unknown most-derived types are preserved as an opaque "sliced"
/// placeholder).
#[derive(Clone, Debug)]
pub struct OpaqueUserError {
    pub type_id: Arc<str>,
    pub known_slices: Arc<[u8]>,
}

impl fmt::Display for OpaqueUserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown user exception `{}`", self.type_id)
    }
}

/// Internal invariant violation. Never transported (spec.md §7 row 6); a
/// dispatch that raises one aborts and logs fatally rather than attempting
/// to produce a reply.
#[derive(Clone, Debug, thiserror::Error)]
#[error("internal invariant violated: {0}")]
pub struct SystemError(pub String);

/// Convenience alias used throughout the workspace for transport/dispatch
/// level results.
pub type Result<T> = core::result::Result<T, LocalError>;

impl From<MemoryLimitError> for LocalError {
    fn from(err: MemoryLimitError) -> Self {
        LocalError::Marshal(MarshalError::Other(err.to_string()))
    }
}

impl From<UnsupportedEncodingError> for LocalError {
    fn from(err: UnsupportedEncodingError) -> Self {
        LocalError::UnsupportedEncoding(err.to_string())
    }
}
