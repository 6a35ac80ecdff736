//! Indirect-reference resolution through a Locator object, with a
//! per-reference TTL cache (spec.md §4.6 "Locator cache", §3 glossary
//! "Adapter-id / Replica-group-id").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ice_core::LocalError;
use ice_transport::Endpoint;
use parking_lot::RwLock;

use crate::reference::LocatorCacheTtl;

/// The subset of a Locator/LocatorRegistry object's interface the core
/// consumes (spec.md §4.6 "optional locator and router"). A concrete
/// implementation invokes these as ordinary twoway operations against the
/// locator proxy through the same dispatch pipeline as any other
/// interface; this trait is the seam so the resolution/caching logic
/// below does not need to know how that invocation happens.
#[async_trait]
pub trait LocatorClient: Send + Sync {
    async fn find_adapter_endpoints(&self, adapter_id: &str) -> Result<Vec<Endpoint>, LocalError>;
}

#[derive(Clone)]
struct CacheEntry {
    endpoints: Arc<[Endpoint]>,
    resolved_at: Instant,
    ttl: LocatorCacheTtl,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        match self.ttl {
            LocatorCacheTtl::Forever => false,
            LocatorCacheTtl::Disabled => true,
            LocatorCacheTtl::Ttl(ttl) => self.resolved_at.elapsed() >= ttl,
        }
    }

    /// Within the last quarter of its TTL, a background refresh should be
    /// kicked off even though the cached value is still valid (spec.md
    /// §4.6 "A background update mode refreshes entries near expiry
    /// without blocking in-flight invocations").
    fn is_near_expiry(&self) -> bool {
        match self.ttl {
            LocatorCacheTtl::Forever | LocatorCacheTtl::Disabled => false,
            LocatorCacheTtl::Ttl(ttl) => self.resolved_at.elapsed() >= ttl.mul_f32(0.75),
        }
    }
}

/// Caches `adapter-id -> endpoint list` resolutions behind a single
/// reader-writer lock per communicator (spec.md §5 "Shared-resource
/// policy": "The locator cache uses a single reader-writer lock per
/// communicator").
pub struct LocatorCache {
    client: Arc<dyn LocatorClient>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

/// What the caller should do with a resolution just handed back
/// (spec.md §4.6 background-update mode).
pub enum Resolution {
    /// Cached and still fresh; nothing further to do.
    Fresh(Arc<[Endpoint]>),
    /// Cached but near expiry: usable now, and the caller may kick off a
    /// background [`LocatorCache::refresh`] without blocking.
    StaleButUsable(Arc<[Endpoint]>),
}

impl Resolution {
    pub fn endpoints(&self) -> &Arc<[Endpoint]> {
        match self {
            Resolution::Fresh(e) | Resolution::StaleButUsable(e) => e,
        }
    }
}

impl LocatorCache {
    pub fn new(client: Arc<dyn LocatorClient>) -> Self {
        Self {
            client,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves `adapter_id`, consulting the cache first (spec.md §4.6).
    /// `-1`/forever and `n`/seconds TTLs are served from cache while
    /// valid; `0`/disabled always re-resolves.
    pub async fn resolve(&self, adapter_id: &str, ttl: LocatorCacheTtl) -> Result<Resolution, LocalError> {
        if !matches!(ttl, LocatorCacheTtl::Disabled) {
            if let Some(entry) = self.entries.read().get(adapter_id).cloned() {
                if !entry.is_expired() {
                    return Ok(if entry.is_near_expiry() {
                        Resolution::StaleButUsable(entry.endpoints)
                    } else {
                        Resolution::Fresh(entry.endpoints)
                    });
                }
            }
        }
        self.refresh(adapter_id, ttl).await.map(Resolution::Fresh)
    }

    /// Re-resolves `adapter_id` against the locator and replaces the
    /// cache entry unconditionally. Callers drive this both for a cold
    /// miss and for the background near-expiry refresh.
    pub async fn refresh(&self, adapter_id: &str, ttl: LocatorCacheTtl) -> Result<Arc<[Endpoint]>, LocalError> {
        let endpoints: Arc<[Endpoint]> = Arc::from(self.client.find_adapter_endpoints(adapter_id).await?);
        self.entries.write().insert(
            adapter_id.to_string(),
            CacheEntry {
                endpoints: endpoints.clone(),
                resolved_at: Instant::now(),
                ttl,
            },
        );
        Ok(endpoints)
    }

    pub fn invalidate(&self, adapter_id: &str) {
        self.entries.write().remove(adapter_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLocator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LocatorClient for CountingLocator {
        async fn find_adapter_endpoints(&self, _adapter_id: &str) -> Result<Vec<Endpoint>, LocalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn forever_ttl_resolves_once() {
        let client = Arc::new(CountingLocator {
            calls: AtomicUsize::new(0),
        });
        let cache = LocatorCache::new(client.clone());
        cache.resolve("Adapter", LocatorCacheTtl::Forever).await.unwrap();
        cache.resolve("Adapter", LocatorCacheTtl::Forever).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_ttl_always_re_resolves() {
        let client = Arc::new(CountingLocator {
            calls: AtomicUsize::new(0),
        });
        let cache = LocatorCache::new(client.clone());
        cache.resolve("Adapter", LocatorCacheTtl::Disabled).await.unwrap();
        cache.resolve("Adapter", LocatorCacheTtl::Disabled).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }
}
