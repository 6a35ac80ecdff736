//! Communicator-wide configuration (spec.md §6). Field names follow the
//! original property names (`MessageSizeMax`, `ACM.*`, ...) so that
//! operators migrating a property file can map entries directly.

use std::time::Duration;

use crate::encoding::VersionPair;

/// Active Connection Management close policy (spec.md §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AcmClose {
    Off,
    OnIdle,
    #[default]
    OnInvocation,
    OnInvocationAndIdle,
    OnIdleForceful,
}

/// Active Connection Management heartbeat policy (spec.md §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AcmHeartbeat {
    Off,
    OnDispatch,
    #[default]
    OnIdle,
    Always,
}

/// Active Connection Management settings for one side (client or server)
/// of a connection (spec.md §4.5).
#[derive(Clone, Copy, Debug)]
pub struct AcmConfig {
    pub timeout: Duration,
    pub close: AcmClose,
    pub heartbeat: AcmHeartbeat,
}

impl Default for AcmConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            close: AcmClose::default(),
            heartbeat: AcmHeartbeat::default(),
        }
    }
}

/// Communicator-wide configuration (spec.md §6). Constructed once at
/// communicator initialization and shared read-only thereafter; per-proxy
/// overrides (e.g. an explicit invocation timeout) layer on top rather than
/// mutating this value.
#[derive(Clone, Debug)]
pub struct CommunicatorConfig {
    /// Hard cap on any single message, enforced before allocating buffers
    /// proportional to a claimed size (spec.md §4.1, §6, §8).
    pub message_size_max: usize,
    /// ACM policy applied to client-initiated connections.
    pub acm_client: AcmConfig,
    /// ACM policy applied to server-accepted connections.
    pub acm_server: AcmConfig,
    /// Backoff schedule between retry attempts (spec.md §4.6).
    pub retry_intervals: Vec<Duration>,
    pub default_protocol: VersionPair,
    pub default_encoding_version: VersionPair,
    /// Prefer a secure (TLS) endpoint when a proxy offers both, per
    /// `Default.PreferSecure` (spec.md §6).
    pub prefer_secure: bool,
    /// Whether to log a warning when a oneway dispatch raises an exception
    /// that has nowhere to go (`Warn.Dispatch`, spec.md SPEC_FULL
    /// ambient-logging addendum).
    pub warn_dispatch: bool,
    /// Whether to log a warning on an otherwise-silent connection
    /// exception (`Warn.Connections`).
    pub warn_connections: bool,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            message_size_max: crate::encoding::DEFAULT_MESSAGE_SIZE_MAX,
            acm_client: AcmConfig::default(),
            acm_server: AcmConfig::default(),
            retry_intervals: crate::retry::default_retry_intervals(),
            default_protocol: crate::encoding::PROTOCOL_VERSION,
            default_encoding_version: crate::encoding::ENCODING_VERSION,
            prefer_secure: false,
            warn_dispatch: true,
            warn_connections: true,
        }
    }
}
