//! [`Communicator`]: the top-level object owning everything a process
//! needs to send and receive invocations (spec.md §9 "Communicator design
//! note"). Every registry it holds — connectors, outgoing connections,
//! the locator cache, the retry schedule — is a constructor parameter or
//! built from one, never a global or link-time side effect, so a process
//! can run more than one communicator with independent configuration.

use std::collections::HashMap;
use std::sync::Arc;

use ice_core::encoding::{ClassFactoryRegistry, Encapsulation};
use ice_core::protocol::{OperationMode, ReplyPayload, RequestBody};
use ice_core::{CommunicatorConfig, Context, LocalError};
use ice_transport::Endpoint;
use parking_lot::{Mutex, RwLock};

use crate::adapter::ObjectAdapter;
use crate::connection::{Connection, ConnectionConfig, ConnectionId};
use crate::connector_registry::ConnectorRegistry;
use crate::handler::{ConnectRequestHandler, RequestHandler};
use crate::locator::{LocatorCache, LocatorClient};
use crate::outgoing::OutgoingConnectionFactory;
use crate::proxy::Proxy;
use crate::reference::{Reference, ReferenceTarget};
use crate::retry_queue::RetryQueue;

/// Per-reference cached request handler, keyed by the reference's own
/// pointer identity rather than stored on `Reference` itself. `Reference`
/// stays immutable and `Hash`-free by design (spec.md §4.6
/// "copy-on-modify"); caching the resolved handler here instead is a
/// pragmatic simplification over the original's mutable-cache-on-
/// immutable-reference approach, recorded in DESIGN.md.
type HandlerCache = HashMap<usize, Arc<ConnectRequestHandler>>;

/// Owns the object-adapter registry, outgoing-connection cache,
/// connector factories, optional locator cache, and retry schedule for one
/// process (spec.md §9). Applications construct exactly the pieces they
/// need (e.g. no locator at all for a pure direct-endpoint deployment)
/// and pass them in here, rather than this type reaching out to a global.
pub struct Communicator {
    config: CommunicatorConfig,
    class_factories: Arc<ClassFactoryRegistry>,
    connector_registry: Arc<ConnectorRegistry>,
    outgoing: Arc<OutgoingConnectionFactory>,
    locator_cache: Option<Arc<LocatorCache>>,
    retry_queue: RetryQueue,
    adapters: RwLock<HashMap<Arc<str>, Arc<ObjectAdapter>>>,
    fixed_connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    handlers: Mutex<HandlerCache>,
}

impl Communicator {
    pub fn new(
        config: CommunicatorConfig,
        class_factories: Arc<ClassFactoryRegistry>,
        connector_registry: Arc<ConnectorRegistry>,
        locator_client: Option<Arc<dyn LocatorClient>>,
    ) -> Arc<Self> {
        let connection_config = ConnectionConfig {
            message_size_max: config.message_size_max,
            acm: config.acm_client,
            batch_auto_flush_size: 1 << 20,
            warn_connections: config.warn_connections,
        };
        let outgoing = Arc::new(OutgoingConnectionFactory::new(
            connector_registry.clone(),
            connection_config,
            class_factories.clone(),
        ));
        let retry_queue = RetryQueue::new(config.retry_intervals.clone());
        Arc::new(Self {
            config,
            class_factories,
            connector_registry,
            outgoing,
            locator_cache: locator_client.map(LocatorCache::new).map(Arc::new),
            retry_queue,
            adapters: RwLock::new(HashMap::new()),
            fixed_connections: RwLock::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CommunicatorConfig {
        &self.config
    }

    pub fn class_factories(&self) -> &Arc<ClassFactoryRegistry> {
        &self.class_factories
    }

    pub fn outgoing_connection_factory(&self) -> &Arc<OutgoingConnectionFactory> {
        &self.outgoing
    }

    /// Registers an object adapter under `name` so indirect references
    /// whose adapter-id equals `name`, or direct references whose
    /// endpoints equal one of its published endpoints, resolve to it
    /// collocated rather than dialing out to loopback (spec.md §4.6
    /// "CollocatedRequestHandler").
    pub fn add_object_adapter(&self, name: impl Into<Arc<str>>, adapter: Arc<ObjectAdapter>) {
        self.adapters.write().insert(name.into(), adapter);
    }

    pub fn remove_object_adapter(&self, name: &str) -> Option<Arc<ObjectAdapter>> {
        self.adapters.write().remove(name)
    }

    pub fn find_object_adapter(&self, name: &str) -> Option<Arc<ObjectAdapter>> {
        self.adapters.read().get(name).cloned()
    }

    /// Pins `connection_id` to `connection` so a later `Reference::Fixed`
    /// built from this id can resolve back to it (spec.md §3 "fixed
    /// connection handle"). Bidirectional callback proxies are the
    /// typical source of a fixed reference: the peer hands back a proxy
    /// bound to the very connection the request arrived on.
    pub fn register_fixed_connection(&self, connection: Arc<Connection>) {
        self.fixed_connections.write().insert(connection.id(), connection);
    }

    pub fn forget_fixed_connection(&self, id: ConnectionId) {
        self.fixed_connections.write().remove(&id);
    }

    /// Finds the locally registered adapter, if any, that this reference's
    /// target collocates with.
    fn collocated_adapter_for(&self, reference: &Reference) -> Option<Arc<ObjectAdapter>> {
        let adapters = self.adapters.read();
        match &reference.target {
            ReferenceTarget::Indirect { adapter_id } => adapters.get(adapter_id.as_ref()).cloned(),
            ReferenceTarget::Direct(endpoints) => adapters
                .values()
                .find(|adapter| {
                    let published = adapter.published_endpoints();
                    !published.is_empty() && endpoints.iter().all(|e| published.contains(e))
                })
                .cloned(),
            ReferenceTarget::Fixed(_) => None,
        }
    }

    /// Resolves a fixed reference straight to its pinned connection,
    /// without going through endpoint selection or the connector registry
    /// at all (spec.md §3 "fixed connection handle").
    fn fixed_handler(&self, id: ConnectionId) -> Result<Arc<dyn RequestHandler>, LocalError> {
        let connection = self
            .fixed_connections
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| LocalError::Other("fixed reference's connection is no longer registered".into()))?;
        Ok(Arc::new(crate::handler::ConnectionRequestHandler::new(connection)))
    }

    /// Resolves an indirect reference's adapter-id to endpoints through
    /// the locator cache, failing if this communicator has none (spec.md
    /// §4.6 "optional locator").
    async fn resolve_indirect(&self, adapter_id: &str, reference: &Reference) -> Result<Arc<[Endpoint]>, LocalError> {
        let cache = self
            .locator_cache
            .as_ref()
            .ok_or_else(|| LocalError::Other("indirect reference requires a locator, but none is configured".into()))?;
        let resolution = cache.resolve(adapter_id, reference.locator_cache_ttl).await?;
        if let crate::locator::Resolution::StaleButUsable(endpoints) = &resolution {
            let cache: Arc<LocatorCache> = Arc::clone(cache);
            let adapter_id = adapter_id.to_string();
            let ttl = reference.locator_cache_ttl;
            tokio::spawn(async move {
                let _ = cache.refresh(&adapter_id, ttl).await;
            });
            return Ok(endpoints.clone());
        }
        Ok(resolution.endpoints().clone())
    }

    /// Builds (or returns the already-cached) [`ConnectRequestHandler`]
    /// for `reference`, resolving indirect adapter-ids via the locator
    /// cache and collocation eligibility via the local adapter registry
    /// first (spec.md §4.6).
    async fn handler_for(&self, proxy: &Proxy) -> Result<Arc<dyn RequestHandler>, LocalError> {
        let reference = proxy.reference();

        if let ReferenceTarget::Fixed(id) = &reference.target {
            return self.fixed_handler(*id);
        }

        let key = Arc::as_ptr(reference) as *const () as usize;
        if let Some(cached) = self.handlers.lock().get(&key).cloned() {
            return Ok(cached);
        }

        let collocated = self.collocated_adapter_for(reference);

        let direct_reference = if let ReferenceTarget::Indirect { adapter_id } = &reference.target {
            if collocated.is_some() {
                reference.as_ref().clone()
            } else {
                let endpoints = self.resolve_indirect(adapter_id, reference).await?;
                Reference {
                    target: ReferenceTarget::Direct(endpoints),
                    ..reference.as_ref().clone()
                }
            }
        } else {
            reference.as_ref().clone()
        };

        let handler = Arc::new(ConnectRequestHandler::new(
            Arc::new(direct_reference),
            self.outgoing.clone(),
            collocated,
            self.config.message_size_max,
        ));
        self.handlers.lock().insert(key, handler.clone());
        Ok(handler)
    }

    fn clear_cache_for(&self, proxy: &Proxy) {
        let key = Arc::as_ptr(proxy.reference()) as *const () as usize;
        if let Some(handler) = self.handlers.lock().remove(&key) {
            handler.clear_cache();
        }
        if let ReferenceTarget::Indirect { adapter_id } = &proxy.reference().target {
            if let Some(cache) = &self.locator_cache {
                cache.invalidate(adapter_id);
            }
        }
    }

    fn request_body(proxy: &Proxy, operation: &str, mode: OperationMode, context: Context, params: Encapsulation) -> RequestBody {
        let reference = proxy.reference();
        RequestBody {
            identity: reference.identity.clone(),
            facet: if reference.facet.is_empty() {
                Vec::new()
            } else {
                vec![reference.facet.to_string()]
            },
            operation: operation.to_string(),
            mode,
            context: if context.is_empty() { reference.context.clone() } else { context },
            params,
        }
    }

    /// Invokes a twoway operation, retrying per the configured backoff
    /// schedule for idempotent operations or pre-send-only failures for
    /// non-idempotent ones (spec.md §4.6, §7).
    pub async fn invoke_twoway(
        &self,
        proxy: &Proxy,
        operation: &str,
        mode: OperationMode,
        context: Context,
        params: Encapsulation,
    ) -> Result<ReplyPayload, LocalError> {
        let body = Self::request_body(proxy, operation, mode, context, params);
        self.retry_queue
            .run(
                mode.is_idempotent(),
                || {
                    let body = body.clone();
                    async move {
                        let handler = self.handler_for(proxy).await?;
                        handler.invoke_twoway(body).await
                    }
                },
                || self.clear_cache_for(proxy),
            )
            .await
    }

    /// Sends a oneway or datagram operation. Oneway sends are not retried
    /// here: the caller gets an immediate error if nothing is connected
    /// yet, matching the original's behavior of only retrying
    /// synchronous twoway invocations automatically.
    pub async fn invoke_oneway(
        &self,
        proxy: &Proxy,
        operation: &str,
        mode: OperationMode,
        context: Context,
        params: Encapsulation,
    ) -> Result<(), LocalError> {
        let body = Self::request_body(proxy, operation, mode, context, params);
        let handler = self.handler_for(proxy).await?;
        handler.invoke_oneway(body)
    }

    pub async fn queue_batch(
        &self,
        proxy: &Proxy,
        operation: &str,
        mode: OperationMode,
        context: Context,
        params: Encapsulation,
    ) -> Result<(), LocalError> {
        let body = Self::request_body(proxy, operation, mode, context, params);
        let handler = self.handler_for(proxy).await?;
        handler.queue_batch(body)
    }

    pub async fn flush_batch(&self, proxy: &Proxy) -> Result<(), LocalError> {
        let handler = self.handler_for(proxy).await?;
        handler.flush_batch()
    }

    /// Shuts down every registered object adapter, draining in-flight
    /// dispatches first, then forgets every cached outgoing connection and
    /// resolved handler (spec.md §9 "Communicator ... owns ... shutdown").
    pub async fn destroy(&self) {
        let adapters: Vec<Arc<ObjectAdapter>> = self.adapters.read().values().cloned().collect();
        for adapter in adapters {
            adapter.deactivate().await;
            adapter.destroy();
        }
        self.adapters.write().clear();
        self.fixed_connections.write().clear();
        self.handlers.lock().clear();
    }
}
