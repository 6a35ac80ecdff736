//! [`Reference`]: the immutable, structurally-comparable invocation target
//! underneath every [`crate::Proxy`] (spec.md §3 "Reference").
//!
//! A reference never changes once built; every proxy configuration method
//! (`ice_oneway`, `ice_secure`, `ice_context`, ...) produces a *new*
//! reference and a new proxy wrapping it, so existing proxies and the
//! connections/requests already in flight against them are unaffected
//! (spec.md §4.6 "copy-on-modify").

use std::sync::Arc;
use std::time::Duration;

use ice_core::encoding::VersionPair;
use ice_core::{Context, Identity};
use ice_transport::Endpoint;

use crate::connection::ConnectionId;

/// How a reference's invocations are sent (spec.md §3 Reference `mode`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvocationMode {
    Twoway,
    Oneway,
    BatchOneway,
    Datagram,
    BatchDatagram,
}

impl InvocationMode {
    pub fn is_twoway(self) -> bool {
        matches!(self, Self::Twoway)
    }

    pub fn is_batch(self) -> bool {
        matches!(self, Self::BatchOneway | Self::BatchDatagram)
    }

    pub fn is_datagram(self) -> bool {
        matches!(self, Self::Datagram | Self::BatchDatagram)
    }

    /// Stringified-proxy mode option letter (spec.md §6 grammar).
    pub fn option_letter(self) -> &'static str {
        match self {
            Self::Twoway => "-t",
            Self::Oneway => "-o",
            Self::BatchOneway => "-O",
            Self::Datagram => "-d",
            Self::BatchDatagram => "-D",
        }
    }

    pub fn from_option_letter(letter: &str) -> Option<Self> {
        Some(match letter {
            "-t" => Self::Twoway,
            "-o" => Self::Oneway,
            "-O" => Self::BatchOneway,
            "-d" => Self::Datagram,
            "-D" => Self::BatchDatagram,
            _ => return None,
        })
    }
}

/// Ordering policy when iterating a reference's candidate endpoints
/// (spec.md §4.6 "Endpoint selection").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointSelection {
    Random,
    Ordered,
}

/// Locator-cache lifetime for an indirect reference's resolved endpoint
/// list (spec.md §4.6 "Locator cache"): `-1` forever, `0` never cached,
/// `n` seconds otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocatorCacheTtl {
    Forever,
    Disabled,
    Ttl(Duration),
}

impl LocatorCacheTtl {
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            -1 => Self::Forever,
            0 => Self::Disabled,
            n if n > 0 => Self::Ttl(Duration::from_secs(n as u64)),
            _ => Self::Disabled,
        }
    }
}

/// Where a reference's invocations actually go (spec.md §3 Reference:
/// "either a direct endpoint list OR an adapter-id for indirect
/// resolution OR a fixed connection handle").
#[derive(Clone, Debug, PartialEq)]
pub enum ReferenceTarget {
    Direct(Arc<[Endpoint]>),
    Indirect { adapter_id: Arc<str> },
    Fixed(ConnectionId),
}

/// Identity of a remote (or locally registered) Locator/Router object,
/// itself invoked through the same Reference/Proxy machinery (spec.md
/// §4.6 "optional locator and router"). Kept as a plain reference rather
/// than `crate::Proxy<LocatorIface>` to avoid a circular type dependency
/// between this module and the typed-proxy layer; the dispatch pipeline
/// wraps it back into a typed proxy when it actually needs to invoke
/// `findAdapterById`/`findObjectById`.
pub type AuxiliaryReference = Arc<Reference>;

/// Immutable invocation target (spec.md §3 "Reference"). Two references
/// are equal iff every field compares equal; this is exactly what backs
/// `Proxy::eq` and the locator cache's key.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    pub identity: Identity,
    pub facet: Arc<str>,
    pub mode: InvocationMode,
    pub secure: bool,
    pub protocol_version: VersionPair,
    pub encoding_version: VersionPair,
    pub target: ReferenceTarget,
    pub invocation_timeout: Option<Duration>,
    pub locator_cache_ttl: LocatorCacheTtl,
    pub context: Context,
    pub prefer_secure: bool,
    pub endpoint_selection: EndpointSelection,
    pub locator: Option<AuxiliaryReference>,
    pub router: Option<AuxiliaryReference>,
}

impl Reference {
    /// A minimal direct reference: twoway, no security, default versions,
    /// no context, ordered endpoint selection, no locator/router. Callers
    /// layer further `with_*` calls on top.
    pub fn direct(identity: Identity, endpoints: Vec<Endpoint>) -> Self {
        Self {
            identity,
            facet: Arc::from(""),
            mode: InvocationMode::Twoway,
            secure: false,
            protocol_version: ice_core::encoding::PROTOCOL_VERSION,
            encoding_version: ice_core::encoding::ENCODING_VERSION,
            target: ReferenceTarget::Direct(Arc::from(endpoints)),
            invocation_timeout: None,
            locator_cache_ttl: LocatorCacheTtl::Forever,
            context: Context::new(),
            prefer_secure: false,
            endpoint_selection: EndpointSelection::Ordered,
            locator: None,
            router: None,
        }
    }

    pub fn indirect(identity: Identity, adapter_id: impl Into<Arc<str>>) -> Self {
        Self {
            target: ReferenceTarget::Indirect {
                adapter_id: adapter_id.into(),
            },
            ..Self::direct(identity, Vec::new())
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self.target, ReferenceTarget::Indirect { .. })
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.target, ReferenceTarget::Fixed(_))
    }

    // --- copy-on-modify builders (spec.md §4.6) ---

    pub fn with_mode(&self, mode: InvocationMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    pub fn with_facet(&self, facet: impl Into<Arc<str>>) -> Self {
        Self {
            facet: facet.into(),
            ..self.clone()
        }
    }

    pub fn with_secure(&self, secure: bool) -> Self {
        Self {
            secure,
            ..self.clone()
        }
    }

    pub fn with_context(&self, context: Context) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    pub fn with_invocation_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            invocation_timeout: timeout,
            ..self.clone()
        }
    }

    pub fn with_prefer_secure(&self, prefer_secure: bool) -> Self {
        Self {
            prefer_secure,
            ..self.clone()
        }
    }

    pub fn with_endpoint_selection(&self, endpoint_selection: EndpointSelection) -> Self {
        Self {
            endpoint_selection,
            ..self.clone()
        }
    }

    pub fn with_encoding_version(&self, encoding_version: VersionPair) -> Self {
        Self {
            encoding_version,
            ..self.clone()
        }
    }

    pub fn with_locator(&self, locator: Option<AuxiliaryReference>) -> Self {
        Self {
            locator,
            ..self.clone()
        }
    }

    pub fn with_router(&self, router: Option<AuxiliaryReference>) -> Self {
        Self {
            router,
            ..self.clone()
        }
    }

    pub fn with_locator_cache_ttl(&self, ttl: LocatorCacheTtl) -> Self {
        Self {
            locator_cache_ttl: ttl,
            ..self.clone()
        }
    }

    pub fn fixed_to(&self, connection_id: ConnectionId) -> Self {
        Self {
            target: ReferenceTarget::Fixed(connection_id),
            ..self.clone()
        }
    }

    /// Whether collocation optimization is even eligible for this
    /// reference (spec.md §4.6, §9 open question: collocation is
    /// disabled when a non-default invocation timeout is set, to avoid
    /// the ambiguous interaction the original source left unresolved).
    pub fn collocation_eligible(&self) -> bool {
        self.invocation_timeout.is_none() && !self.mode.is_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new("widget", "toys").unwrap()
    }

    #[test]
    fn equal_references_compare_equal() {
        let a = Reference::direct(identity(), vec![]);
        let b = Reference::direct(identity(), vec![]);
        assert_eq!(a, b);
    }

    #[test]
    fn copy_on_modify_leaves_the_original_untouched() {
        let base = Reference::direct(identity(), vec![]);
        let oneway = base.with_mode(InvocationMode::Oneway);
        assert_eq!(base.mode, InvocationMode::Twoway);
        assert_eq!(oneway.mode, InvocationMode::Oneway);
        assert_ne!(base, oneway);
    }

    #[test]
    fn non_default_timeout_disables_collocation() {
        let base = Reference::direct(identity(), vec![]);
        assert!(base.collocation_eligible());
        let timed = base.with_invocation_timeout(Some(Duration::from_secs(5)));
        assert!(!timed.collocation_eligible());
    }
}
