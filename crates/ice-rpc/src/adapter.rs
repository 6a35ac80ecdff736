//! [`ObjectAdapter`]: owns a servant manager and zero or more incoming
//! endpoints, and runs the dispatch pipeline for requests arriving on any
//! connection bound to it (spec.md §3 "ObjectAdapter", §4.7).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ice_core::protocol::{ReplyPayload, RequestBody};
use ice_core::{Identity, LocalError};
use ice_transport::endpoint::{Endpoint, TransportAddr};
use ice_transport::Acceptor;
use tokio::sync::Notify;

use crate::connection::{Connection, ConnectionConfig, Direction};
use crate::proxy::Proxy;
use crate::servant::{EncodingContext, RequestContext, ServantManager};

/// Lifecycle states (spec.md §4.7 "Adapter lifecycle"). The transition
/// past `Deactivating` is one-way: once an adapter starts deactivating it
/// can never return to `Active`/`Held`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Active,
    Held,
    Deactivating,
    Deactivated,
    Destroyed,
}

/// One exposed endpoint set plus its servant map (spec.md §3
/// "ObjectAdapter"). Incoming connections accepted through [`Self::serve`]
/// have this adapter bound on them for the lifetime of the connection;
/// outgoing (client) connections may also have an adapter bound to support
/// bidirectional dispatch (spec.md §4.4 "Bidirectional").
pub struct ObjectAdapter {
    name: Arc<str>,
    servant_manager: Arc<ServantManager>,
    state: parking_lot::Mutex<AdapterState>,
    state_changed: Notify,
    in_flight: AtomicUsize,
    drained: Notify,
    router: parking_lot::Mutex<Option<Arc<Proxy>>>,
    published_endpoints: parking_lot::Mutex<Vec<Endpoint>>,
    tasks: ice_runtime::TaskGroup,
    warn_dispatch: bool,
}

impl ObjectAdapter {
    pub fn new(name: impl Into<Arc<str>>, servant_manager: Arc<ServantManager>, warn_dispatch: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            servant_manager,
            state: parking_lot::Mutex::new(AdapterState::Uninitialized),
            state_changed: Notify::new(),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            router: parking_lot::Mutex::new(None),
            published_endpoints: parking_lot::Mutex::new(Vec::new()),
            tasks: ice_runtime::TaskGroup::new(),
            warn_dispatch,
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn servant_manager(&self) -> &Arc<ServantManager> {
        &self.servant_manager
    }

    pub fn state(&self) -> AdapterState {
        *self.state.lock()
    }

    pub fn set_router(&self, router: Option<Arc<Proxy>>) {
        *self.router.lock() = router;
    }

    pub fn router(&self) -> Option<Arc<Proxy>> {
        self.router.lock().clone()
    }

    pub fn set_published_endpoints(&self, endpoints: Vec<Endpoint>) {
        *self.published_endpoints.lock() = endpoints;
    }

    pub fn published_endpoints(&self) -> Vec<Endpoint> {
        self.published_endpoints.lock().clone()
    }

    fn set_state(&self, state: AdapterState) {
        let mut guard = self.state.lock();
        if *guard == state {
            return;
        }
        tracing::debug!(adapter = %self.name, from = ?*guard, to = ?state, "object adapter state transition");
        *guard = state;
        drop(guard);
        self.state_changed.notify_waiters();
    }

    /// `Uninitialized|Held -> Active` (spec.md §4.7).
    pub fn activate(&self) -> Result<(), LocalError> {
        match self.state() {
            AdapterState::Uninitialized | AdapterState::Held => {
                self.set_state(AdapterState::Active);
                Ok(())
            }
            AdapterState::Active => Ok(()),
            _ => Err(LocalError::ObjectAdapterDeactivated),
        }
    }

    /// `Active -> Held` (spec.md §4.7).
    pub fn hold(&self) -> Result<(), LocalError> {
        match self.state() {
            AdapterState::Active | AdapterState::Held => {
                self.set_state(AdapterState::Held);
                Ok(())
            }
            _ => Err(LocalError::ObjectAdapterDeactivated),
        }
    }

    /// `Active|Held -> Deactivating -> Deactivated` (spec.md §4.7): refuses
    /// new incoming requests immediately, then waits for every in-flight
    /// dispatch to complete before aborting the accept loop(s) bound to
    /// this adapter.
    pub async fn deactivate(&self) {
        match self.state() {
            AdapterState::Uninitialized | AdapterState::Active | AdapterState::Held => {
                self.set_state(AdapterState::Deactivating);
            }
            _ => return,
        }
        while self.in_flight.load(Ordering::Acquire) > 0 {
            self.drained.notified().await;
        }
        self.set_state(AdapterState::Deactivated);
        self.tasks.abort_all();
    }

    /// `Deactivated -> Destroyed` (spec.md §4.7). A no-op (besides logging)
    /// if called before deactivation has completed; callers are expected
    /// to `await deactivate()` first.
    pub fn destroy(&self) {
        if self.state() != AdapterState::Deactivated {
            tracing::debug!(adapter = %self.name, state = ?self.state(), "destroy() called before the adapter finished deactivating");
            return;
        }
        self.set_state(AdapterState::Destroyed);
    }

    /// Runs an accept loop for `acceptor`, binding this adapter on every
    /// accepted connection (spec.md §3 "ObjectAdapter ... owns ... a
    /// dispatch thread pool selector"; simplified here to one Tokio task
    /// per adapter endpoint plus one task per connection, matching how
    /// [`Connection`] itself eschews a hand-rolled reactor). Stops
    /// accepting once the adapter leaves `Active`/`Held`.
    pub fn serve(
        self: &Arc<Self>,
        acceptor: Box<dyn Acceptor>,
        config: ConnectionConfig,
        class_factories: Arc<ice_core::encoding::ClassFactoryRegistry>,
    ) {
        let adapter = self.clone();
        self.tasks.spawn(async move {
            loop {
                if !matches!(adapter.state(), AdapterState::Active | AdapterState::Held) {
                    return;
                }
                match acceptor.accept().await {
                    Ok(transceiver) => {
                        // `Acceptor`/`Transceiver` don't expose the
                        // accepted peer's address; the acceptor's own
                        // bound address is the best available stand-in
                        // until a connection-info API is added.
                        let peer = acceptor.local_addr();
                        Connection::start(
                            transceiver,
                            peer,
                            Direction::Incoming,
                            config.clone(),
                            class_factories.clone(),
                            Some(adapter.clone()),
                        );
                    }
                    Err(err) => {
                        tracing::warn!(adapter = %adapter.name, %err, "accept failed");
                    }
                }
            }
        });
    }

    /// Routes one decoded request to a servant and returns the reply to
    /// send (or log, for oneway/batch — spec.md §4.7 "Dispatch").
    /// `expects_reply` is `false` for oneway and batch requests: the
    /// servant still runs to completion, but an exception from it is only
    /// ever logged, never transported (spec.md §4.7 last bullet).
    pub async fn dispatch(self: &Arc<Self>, body: &RequestBody, expects_reply: bool, message_size_max: usize) -> ReplyPayload {
        if let Err(err) = self.wait_until_accepting().await {
            return local_error_to_reply(&body.identity, &body.facet, &body.operation, err);
        }

        let _guard = InFlightGuard::new(self);
        let facet = body.facet_name().to_string();
        let ctx = RequestContext {
            identity: body.identity.clone(),
            facet: Arc::from(facet.as_str()),
            operation: Arc::from(body.operation.as_str()),
            context: body.context.clone(),
            is_idempotent: body.mode.is_idempotent(),
            expects_reply,
        };
        let encoding_ctx = EncodingContext {
            message_size_max,
            encoding_version: body.params.encoding,
        };

        if let Some(servant) = self.servant_manager.lookup_static(&ctx.identity, &ctx.facet) {
            return self.invoke(servant.as_ref(), &ctx, body, encoding_ctx).await;
        }

        let Some(locator) = self.servant_manager.locator_for(&ctx.identity) else {
            return ReplyPayload::ObjectNotExist {
                identity: body.identity.clone(),
                facet: body.facet.clone(),
            };
        };

        match locator.locate(&ctx).await {
            Ok(Some((servant, cookie))) => {
                let outcome = self.invoke_result(servant.as_ref(), &ctx, body, encoding_ctx).await;
                locator.finished(&ctx, cookie, &outcome).await;
                match outcome {
                    Ok(reply) => reply,
                    Err(err) => local_error_to_reply(&body.identity, &body.facet, &body.operation, err),
                }
            }
            Ok(None) => ReplyPayload::ObjectNotExist {
                identity: body.identity.clone(),
                facet: body.facet.clone(),
            },
            Err(err) => local_error_to_reply(&body.identity, &body.facet, &body.operation, err),
        }
    }

    async fn invoke(
        &self,
        servant: &dyn crate::servant::Servant,
        ctx: &RequestContext,
        body: &RequestBody,
        encoding_ctx: EncodingContext,
    ) -> ReplyPayload {
        match self.invoke_result(servant, ctx, body, encoding_ctx).await {
            Ok(reply) => reply,
            Err(err) => local_error_to_reply(&body.identity, &body.facet, &body.operation, err),
        }
    }

    async fn invoke_result(
        &self,
        servant: &dyn crate::servant::Servant,
        ctx: &RequestContext,
        body: &RequestBody,
        encoding_ctx: EncodingContext,
    ) -> Result<ReplyPayload, LocalError> {
        let outcome = servant.dispatch(ctx, body.params.clone(), encoding_ctx).await;
        if !ctx.expects_reply {
            if let Err(err) = &outcome {
                if self.warn_dispatch {
                    tracing::warn!(adapter = %self.name, operation = %ctx.operation, %err, "oneway dispatch failed");
                }
            }
        }
        outcome
    }

    /// Blocks while the adapter is `Held`, resuming as soon as it becomes
    /// `Active` again; rejects immediately once deactivation has begun
    /// (spec.md §4.7: "Deactivating refuses new incoming requests", and
    /// "every servant lookup raises ObjectAdapterDeactivated" once
    /// `Deactivated`). Held is not addressed explicitly by the state
    /// diagram's dispatch rules; waiting here (rather than rejecting)
    /// matches the original source's intent that holding pauses dispatch
    /// without failing callers (recorded as an open decision in
    /// DESIGN.md).
    async fn wait_until_accepting(&self) -> Result<(), LocalError> {
        loop {
            match self.state() {
                AdapterState::Active => return Ok(()),
                AdapterState::Held | AdapterState::Uninitialized => {
                    self.state_changed.notified().await;
                }
                AdapterState::Deactivating | AdapterState::Deactivated | AdapterState::Destroyed => {
                    return Err(LocalError::ObjectAdapterDeactivated);
                }
            }
        }
    }
}

struct InFlightGuard<'a> {
    adapter: &'a ObjectAdapter,
}

impl<'a> InFlightGuard<'a> {
    fn new(adapter: &'a ObjectAdapter) -> Self {
        adapter.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { adapter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.adapter.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.adapter.drained.notify_waiters();
        }
    }
}

/// Maps a servant-side [`LocalError`] onto the reply-status table (spec.md
/// §4.7 "Exception propagation rules"), using the request's own identity,
/// facet and operation rather than re-parsing them out of the error
/// (the error variants below only carry display strings).
fn local_error_to_reply(identity: &Identity, facet: &[String], operation: &str, err: LocalError) -> ReplyPayload {
    match err {
        LocalError::ObjectNotExist { .. } => ReplyPayload::ObjectNotExist {
            identity: identity.clone(),
            facet: facet.to_vec(),
        },
        LocalError::FacetNotExist { .. } => ReplyPayload::FacetNotExist {
            identity: identity.clone(),
            facet: facet.to_vec(),
        },
        LocalError::OperationNotExist { .. } => ReplyPayload::OperationNotExist {
            identity: identity.clone(),
            facet: facet.to_vec(),
            operation: operation.to_string(),
        },
        other => ReplyPayload::UnknownLocalException(other.to_string()),
    }
}
