//! Request handlers: the pluggable strategy that turns a reference's
//! invocations into bytes on a transport, or a direct in-process dispatch
//! (spec.md §3 "Request handler", §4.6).
//!
//! Three strategies exist. [`ConnectRequestHandler`] is the starting state
//! for a reference that has not yet resolved a connection; once it
//! succeeds it hands subsequent invocations to a cached
//! [`ConnectionRequestHandler`]. [`CollocatedRequestHandler`] bypasses the
//! network entirely when the target adapter lives in this process.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use ice_core::protocol::{ReplyPayload, RequestBody};
use ice_core::LocalError;
use ice_transport::Endpoint;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::adapter::ObjectAdapter;
use crate::connection::Connection;
use crate::outgoing::OutgoingConnectionFactory;
use crate::reference::{EndpointSelection, Reference, ReferenceTarget};

/// A send path for a reference's invocations, already resolved to a
/// concrete destination. Every strategy normalizes to the same interface
/// so the caller (the typed proxy's generated invocation code) never
/// branches on which one it got.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke_twoway(&self, body: RequestBody) -> Result<ReplyPayload, LocalError>;
    fn invoke_oneway(&self, body: RequestBody) -> Result<(), LocalError>;
    fn queue_batch(&self, body: RequestBody) -> Result<(), LocalError>;
    fn flush_batch(&self) -> Result<(), LocalError>;

    /// Clears any cached downstream state so the next invocation
    /// re-resolves from scratch (spec.md §7: "a retry clears the cached
    /// request-handler so the next attempt re-selects endpoints and
    /// possibly re-resolves via the locator"). A no-op for handlers with
    /// nothing to clear.
    fn clear_cache(&self) {}
}

/// Forwards directly to an already-established connection.
pub struct ConnectionRequestHandler {
    connection: Arc<Connection>,
}

impl ConnectionRequestHandler {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

#[async_trait]
impl RequestHandler for ConnectionRequestHandler {
    async fn invoke_twoway(&self, body: RequestBody) -> Result<ReplyPayload, LocalError> {
        let rx = self.connection.send_twoway(body)?;
        rx.await
            .map_err(|_| LocalError::ConnectionLost("connection dropped while awaiting reply".into()))?
    }

    fn invoke_oneway(&self, body: RequestBody) -> Result<(), LocalError> {
        self.connection.send_oneway(body)
    }

    fn queue_batch(&self, body: RequestBody) -> Result<(), LocalError> {
        self.connection.queue_batch(body)
    }

    fn flush_batch(&self) -> Result<(), LocalError> {
        self.connection.flush_batch_requests()
    }
}

/// Dispatches directly in-process, bypassing the transceiver entirely
/// (spec.md §4.6 "CollocatedRequestHandler"). The request body still
/// travels as an already-marshaled [`RequestBody`]/[`ice_core::encoding::Encapsulation`]
/// pair, exactly as it would over the wire, so collocation changes only
/// the transport, never the marshaling semantics.
pub struct CollocatedRequestHandler {
    adapter: Arc<ObjectAdapter>,
    message_size_max: usize,
}

impl CollocatedRequestHandler {
    pub fn new(adapter: Arc<ObjectAdapter>, message_size_max: usize) -> Self {
        Self {
            adapter,
            message_size_max,
        }
    }
}

#[async_trait]
impl RequestHandler for CollocatedRequestHandler {
    async fn invoke_twoway(&self, body: RequestBody) -> Result<ReplyPayload, LocalError> {
        Ok(self.adapter.dispatch(&body, true, self.message_size_max).await)
    }

    fn invoke_oneway(&self, body: RequestBody) -> Result<(), LocalError> {
        let adapter = self.adapter.clone();
        let message_size_max = self.message_size_max;
        tokio::spawn(async move {
            let _ = adapter.dispatch(&body, false, message_size_max).await;
        });
        Ok(())
    }

    fn queue_batch(&self, _body: RequestBody) -> Result<(), LocalError> {
        // Collocation is disabled for batch references (spec.md §4.6
        // "disabled automatically if the caller requested ... batching"),
        // so a `CollocatedRequestHandler` is never actually constructed
        // for one; reaching here would be a resolution bug upstream.
        Err(LocalError::Other("batch requests are not supported on a collocated request handler".into()))
    }

    fn flush_batch(&self) -> Result<(), LocalError> {
        Err(LocalError::Other("batch requests are not supported on a collocated request handler".into()))
    }
}

/// Resolves a reference's connection lazily, then caches the resolved
/// handler for subsequent invocations (spec.md §4.6 "ConnectRequestHandler").
pub struct ConnectRequestHandler {
    reference: Arc<Reference>,
    connection_factory: Arc<OutgoingConnectionFactory>,
    collocated_adapter: Option<Arc<ObjectAdapter>>,
    message_size_max: usize,
    resolving: AsyncMutex<()>,
    cached: Mutex<Option<Arc<dyn RequestHandler>>>,
}

impl ConnectRequestHandler {
    pub fn new(
        reference: Arc<Reference>,
        connection_factory: Arc<OutgoingConnectionFactory>,
        collocated_adapter: Option<Arc<ObjectAdapter>>,
        message_size_max: usize,
    ) -> Self {
        Self {
            reference,
            connection_factory,
            collocated_adapter,
            message_size_max,
            resolving: AsyncMutex::new(()),
            cached: Mutex::new(None),
        }
    }

    async fn resolve(&self) -> Result<Arc<dyn RequestHandler>, LocalError> {
        if let Some(cached) = self.cached.lock().clone() {
            return Ok(cached);
        }
        // Only one resolution attempt runs at a time per reference; every
        // other invocation racing in just waits for it rather than
        // opening N redundant connections to the same endpoint.
        let _guard = self.resolving.lock().await;
        if let Some(cached) = self.cached.lock().clone() {
            return Ok(cached);
        }

        if let Some(adapter) = &self.collocated_adapter {
            if self.reference.collocation_eligible() {
                let handler: Arc<dyn RequestHandler> =
                    Arc::new(CollocatedRequestHandler::new(adapter.clone(), self.message_size_max));
                *self.cached.lock() = Some(handler.clone());
                return Ok(handler);
            }
        }

        let endpoints = match &self.reference.target {
            ReferenceTarget::Direct(endpoints) => endpoints.clone(),
            ReferenceTarget::Indirect { .. } => {
                return Err(LocalError::Other(
                    "indirect reference resolution requires a locator; use Communicator::invoke_*".into(),
                ));
            }
            ReferenceTarget::Fixed(_) => {
                return Err(LocalError::Other("fixed reference has no endpoint to connect to".into()));
            }
        };

        let connection = self.connect_to_any(&endpoints).await?;
        let handler: Arc<dyn RequestHandler> = Arc::new(ConnectionRequestHandler::new(connection));
        *self.cached.lock() = Some(handler.clone());
        Ok(handler)
    }

    /// Iterates `endpoints` in selection-policy order until a connector
    /// succeeds, per spec.md §4.6 "Endpoint selection".
    async fn connect_to_any(&self, endpoints: &[Endpoint]) -> Result<Arc<Connection>, LocalError> {
        let ordered = select_endpoints(endpoints, &self.reference);
        if ordered.is_empty() {
            return Err(LocalError::ConnectFailed("reference has no usable endpoints".into()));
        }
        let mut last_err = None;
        for endpoint in ordered {
            match self.connection_factory.get_or_connect(endpoint).await {
                Ok(connection) => return Ok(connection),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| LocalError::ConnectFailed("no endpoints to try".into())))
    }
}

#[async_trait]
impl RequestHandler for ConnectRequestHandler {
    async fn invoke_twoway(&self, body: RequestBody) -> Result<ReplyPayload, LocalError> {
        let handler = self.resolve().await?;
        handler.invoke_twoway(body).await
    }

    fn invoke_oneway(&self, body: RequestBody) -> Result<(), LocalError> {
        let cached = self.cached.lock().clone();
        match cached {
            Some(handler) => handler.invoke_oneway(body),
            None => Err(LocalError::RetryError("connection not yet established".into())),
        }
    }

    fn queue_batch(&self, body: RequestBody) -> Result<(), LocalError> {
        let cached = self.cached.lock().clone();
        match cached {
            Some(handler) => handler.queue_batch(body),
            None => Err(LocalError::RetryError("connection not yet established".into())),
        }
    }

    fn flush_batch(&self) -> Result<(), LocalError> {
        let cached = self.cached.lock().clone();
        match cached {
            Some(handler) => handler.flush_batch(),
            None => Ok(()),
        }
    }

    fn clear_cache(&self) {
        *self.cached.lock() = None;
    }
}

/// Filters insecure endpoints out if `secure` is set, partitions the rest
/// by `preferSecure`, and orders the result per `endpointSelection`
/// (spec.md §4.6 "Endpoint selection").
fn select_endpoints<'a>(endpoints: &'a [Endpoint], reference: &Reference) -> Vec<&'a Endpoint> {
    let candidates: Vec<&Endpoint> = endpoints.iter().filter(|e| !reference.secure || e.is_secure()).collect();

    let (mut preferred, mut rest): (Vec<&Endpoint>, Vec<&Endpoint>) = if reference.prefer_secure {
        candidates.into_iter().partition(|e| e.is_secure())
    } else {
        candidates.into_iter().partition(|e| !e.is_secure())
    };

    match reference.endpoint_selection {
        EndpointSelection::Ordered => {}
        EndpointSelection::Random => {
            shuffle(&mut preferred);
            shuffle(&mut rest);
        }
    }

    preferred.append(&mut rest);
    preferred
}

/// Shuffles in place using per-call OS-seeded randomness from
/// [`RandomState`], avoiding a dependency on a dedicated `rand` crate for
/// what is otherwise a single `sort_by_key`.
fn shuffle<'a>(items: &mut Vec<&'a Endpoint>) {
    if items.len() < 2 {
        return;
    }
    let state = RandomState::new();
    let mut keyed: Vec<(u64, &'a Endpoint)> = items
        .iter()
        .enumerate()
        .map(|(i, endpoint)| {
            let mut hasher = state.build_hasher();
            hasher.write_usize(i);
            (hasher.finish(), *endpoint)
        })
        .collect();
    keyed.sort_by_key(|(key, _)| *key);
    *items = keyed.into_iter().map(|(_, endpoint)| endpoint).collect();
}
