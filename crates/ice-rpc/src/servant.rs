//! Servants and the [`ServantManager`] lookup table (spec.md §3
//! "ServantManager", §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ice_core::protocol::ReplyPayload;
use ice_core::{Identity, LocalError};
use parking_lot::RwLock;

/// Everything the dispatch pipeline knows about the caller and the
/// incoming request, passed to a servant so it can inspect identity,
/// facet, operation and context without re-deriving them from the wire
/// bytes it already decoded (spec.md §4.7 "Dispatch").
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub identity: Identity,
    pub facet: Arc<str>,
    pub operation: Arc<str>,
    pub context: ice_core::Context,
    pub is_idempotent: bool,
    /// `None` for a oneway/batch dispatch: there is nowhere to send a
    /// reply, so the servant's return value (if any) is discarded and any
    /// exception is only logged (spec.md §4.7 last bullet).
    pub expects_reply: bool,
}

/// One exposed interface implementation (spec.md §9 "Polymorphic dispatch
/// without deep inheritance"): a single entry point keyed by operation
/// name rather than a per-language vtable, so the generated skeleton for
/// an interface only needs to implement this one method.
#[async_trait]
pub trait Servant: Send + Sync {
    /// Decodes `params`, invokes the matching operation, and encodes the
    /// result (or declared user exception) into a [`ReplyPayload`]. An
    /// unrecognized `ctx.operation` must be reported as
    /// `ReplyPayload::OperationNotExist` by the generated dispatcher, not
    /// as an error return, so the dispatch pipeline can apply the
    /// exception-propagation table uniformly (spec.md §4.7).
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        params: ice_core::encoding::Encapsulation,
        encoding_ctx: EncodingContext,
    ) -> Result<ReplyPayload, LocalError>;
}

/// Shared resource limits the servant needs to open its own
/// `InputStream`/`OutputStream` pair for decoding parameters and encoding
/// results (spec.md §4.1).
#[derive(Clone, Copy, Debug)]
pub struct EncodingContext {
    pub message_size_max: usize,
    pub encoding_version: ice_core::encoding::VersionPair,
}

/// Dynamic lookup for identities not present in a `ServantManager`'s
/// explicit map (spec.md §3 "ServantManager", §4.7 step 2). `locate`
/// returns the servant to dispatch to plus an opaque cookie that is
/// threaded back to `finished` on every completion path (success, user
/// exception, or local exception).
#[async_trait]
pub trait ServantLocator: Send + Sync {
    async fn locate(&self, ctx: &RequestContext) -> Result<Option<(Arc<dyn Servant>, Box<dyn std::any::Any + Send>)>, LocalError>;

    async fn finished(
        &self,
        ctx: &RequestContext,
        cookie: Box<dyn std::any::Any + Send>,
        outcome: &Result<ReplyPayload, LocalError>,
    );
}

#[derive(Clone)]
struct FacetMap(Arc<RwLock<HashMap<Arc<str>, Arc<dyn Servant>>>>);

impl FacetMap {
    fn new() -> Self {
        Self(Arc::new(RwLock::new(HashMap::new())))
    }
}

/// `{identity -> {facet -> servant}}` plus category-keyed defaults and
/// locators (spec.md §3 "ServantManager"). Lookup order, exactly as
/// specified: explicit map -> category default -> empty-category default
/// -> category-locator -> empty-category locator -> not-found.
pub struct ServantManager {
    explicit: RwLock<HashMap<Identity, FacetMap>>,
    default_servants: RwLock<HashMap<String, Arc<dyn Servant>>>,
    locators: RwLock<HashMap<String, Arc<dyn ServantLocator>>>,
}

impl Default for ServantManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServantManager {
    pub fn new() -> Self {
        Self {
            explicit: RwLock::new(HashMap::new()),
            default_servants: RwLock::new(HashMap::new()),
            locators: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, identity: Identity, facet: impl Into<Arc<str>>, servant: Arc<dyn Servant>) {
        let mut explicit = self.explicit.write();
        let facets = explicit.entry(identity).or_insert_with(FacetMap::new);
        facets.0.write().insert(facet.into(), servant);
    }

    pub fn remove(&self, identity: &Identity, facet: &str) -> Option<Arc<dyn Servant>> {
        let explicit = self.explicit.read();
        explicit.get(identity).and_then(|facets| facets.0.write().remove(facet))
    }

    pub fn add_default_servant(&self, category: impl Into<String>, servant: Arc<dyn Servant>) {
        self.default_servants.write().insert(category.into(), servant);
    }

    pub fn add_locator(&self, category: impl Into<String>, locator: Arc<dyn ServantLocator>) {
        self.locators.write().insert(category.into(), locator);
    }

    /// Looks up the explicit map and both tiers of default servant,
    /// *without* touching a `ServantLocator` (spec.md §3 lookup order,
    /// the non-dynamic half). Dynamic locator lookup is a separate,
    /// async step the dispatch pipeline drives itself so it can call
    /// `finished` once dispatch completes.
    pub fn lookup_static(&self, identity: &Identity, facet: &str) -> Option<Arc<dyn Servant>> {
        if let Some(facets) = self.explicit.read().get(identity) {
            if let Some(servant) = facets.0.read().get(facet) {
                return Some(servant.clone());
            }
        }
        let defaults = self.default_servants.read();
        if !identity.category.is_empty() {
            if let Some(servant) = defaults.get(&identity.category) {
                return Some(servant.clone());
            }
        }
        defaults.get("").cloned()
    }

    pub fn locator_for(&self, identity: &Identity) -> Option<Arc<dyn ServantLocator>> {
        let locators = self.locators.read();
        if !identity.category.is_empty() {
            if let Some(locator) = locators.get(&identity.category) {
                return Some(locator.clone());
            }
        }
        locators.get("").cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ice_core::encoding::Encapsulation;

    struct Echo;

    #[async_trait]
    impl Servant for Echo {
        async fn dispatch(
            &self,
            _ctx: &RequestContext,
            params: Encapsulation,
            _encoding_ctx: EncodingContext,
        ) -> Result<ReplyPayload, LocalError> {
            Ok(ReplyPayload::Ok(params))
        }
    }

    fn identity(name: &str, category: &str) -> Identity {
        Identity::new(name, category).unwrap()
    }

    #[test]
    fn explicit_registration_wins_over_defaults() {
        let manager = ServantManager::new();
        let id = identity("widget", "toys");
        manager.add(id.clone(), "", Arc::new(Echo));
        manager.add_default_servant("toys", Arc::new(Echo));
        assert!(manager.lookup_static(&id, "").is_some());
    }

    #[test]
    fn category_default_beats_empty_category_default() {
        let manager = ServantManager::new();
        manager.add_default_servant("", Arc::new(Echo));
        manager.add_default_servant("toys", Arc::new(Echo));
        let id = identity("widget", "toys");
        // Both are registered; either resolves to *a* servant, but the
        // lookup must not fail outright.
        assert!(manager.lookup_static(&id, "").is_some());
    }

    #[test]
    fn missing_identity_and_defaults_resolves_to_none() {
        let manager = ServantManager::new();
        let id = identity("widget", "toys");
        assert!(manager.lookup_static(&id, "").is_none());
    }
}
