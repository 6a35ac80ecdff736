//! The connection state machine (spec.md §3 "Connection", §4.4): owns a
//! transceiver for its whole lifetime, assigns request ids, correlates
//! replies, drives the validation handshake, and implements graceful vs
//! forceful closure. One [`Connection`] is shared by every proxy that
//! targets the same peer; all of its mutable state lives behind the
//! single per-connection structures below rather than one big mutex
//! (spec.md §5 "Shared-resource policy").

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use dashmap::DashMap;
use ice_core::config::AcmConfig;
use ice_core::encoding::ClassFactoryRegistry;
use ice_core::protocol::{
    decode_message_body, encode_batch_request_message, encode_close_connection_message,
    encode_heartbeat_message, encode_reply_message, encode_request_message,
    encode_validate_connection_message, MessageHeader, MessageType, ProtocolMessage, ReplyPayload,
    RequestBody, HEADER_SIZE, ONEWAY_REQUEST_ID,
};
use ice_core::{LocalError, MarshalError};
use ice_runtime::{AcmAction, AcmTimer, TaskGroup};
use ice_transport::endpoint::TransportAddr;
use ice_transport::Transceiver;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};

use crate::adapter::ObjectAdapter;

/// Lifecycle states of a connection (spec.md §3 "Connection", §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    NotInitialized,
    NotValidated,
    Active,
    Closing,
    ClosingPending,
    Closed,
    Finished,
}

/// Which side established this connection (spec.md §3 "direction").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Requested closure semantics (spec.md §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseMode {
    /// Blocks the caller until every locally pending invocation on this
    /// connection completes, then closes.
    GracefullyWithWait,
    /// Closes immediately, letting server-side in-flight dispatches drain.
    Gracefully,
    /// Transitions straight to `Closed`, failing every pending invocation
    /// with `ConnectionLost`.
    Forcefully,
}

/// Globally unique connection identifier, used by fixed references and by
/// logging to disambiguate connections to the same peer (spec.md §3
/// "Reference: ... or a fixed connection handle").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

fn next_connection_id() -> ConnectionId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    ConnectionId(COUNTER.fetch_add(1, Ordering::Relaxed))
}

type PendingReply = oneshot::Sender<Result<ReplyPayload, LocalError>>;

/// A connection has no pre-send queue distinct from the outbound channel
/// (spec.md §4.5 "Cancellation" pre-send case): by the time
/// `send_twoway` returns, the request is already queued for the I/O task.
/// Canceling always takes the post-send path — remove the pending entry
/// and complete it locally, while the bytes already queued (or already on
/// the wire) are left to go out; a reply that arrives afterward finds no
/// entry and is discarded (see `handle_message`).
struct PendingInvocation {
    reply_tx: PendingReply,
}

/// Everything the connection needs to turn a decoded incoming request into
/// a reply, supplied by whoever calls [`Connection::new`] for an incoming
/// or bidirectional connection. Kept as a trait object so `ice-rpc`'s
/// connection module never depends on the concrete `ObjectAdapter` type
/// beyond this one call.
pub(crate) type AdapterHandle = Arc<ObjectAdapter>;

/// Shared per-connection configuration, a narrow slice of
/// [`ice_core::config::CommunicatorConfig`] (spec.md §6).
#[derive(Clone)]
pub struct ConnectionConfig {
    pub message_size_max: usize,
    pub acm: AcmConfig,
    pub batch_auto_flush_size: usize,
    pub warn_connections: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            message_size_max: ice_core::encoding::DEFAULT_MESSAGE_SIZE_MAX,
            acm: AcmConfig::default(),
            batch_auto_flush_size: 1 << 20,
            warn_connections: true,
        }
    }
}

/// One established peer connection (spec.md §3 "Connection", §4.4).
///
/// I/O happens on a single background task that owns the transceiver
/// exclusively (spec.md §4.5 "a worker picks up a ready connection,
/// performs one round of reads or writes"); everything else interacts with
/// the connection through the channels and tables below, never the
/// transceiver directly.
pub struct Connection {
    id: ConnectionId,
    direction: Direction,
    peer: TransportAddr,
    state: parking_lot::Mutex<ConnectionState>,
    state_changed: Notify,
    config: ConnectionConfig,
    class_factories: Arc<ClassFactoryRegistry>,
    next_request_id: AtomicI32,
    pending: DashMap<i32, PendingInvocation>,
    batch: parking_lot::Mutex<Vec<RequestBody>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    acm: Arc<AcmTimer>,
    tasks: TaskGroup,
    adapter: parking_lot::Mutex<Option<AdapterHandle>>,
}

impl Connection {
    /// Builds and starts a connection around an already-connected
    /// transceiver. `adapter` is `None` for a purely client-side
    /// connection; an outgoing connection with an adapter set serves as
    /// the transport for bidirectional dispatch (spec.md §4.4
    /// "Bidirectional").
    pub fn start(
        transceiver: Box<dyn Transceiver>,
        peer: TransportAddr,
        direction: Direction,
        config: ConnectionConfig,
        class_factories: Arc<ClassFactoryRegistry>,
        adapter: Option<AdapterHandle>,
    ) -> Arc<Connection> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let acm = AcmTimer::new(config.acm);
        let connection = Arc::new(Connection {
            id: next_connection_id(),
            direction,
            peer,
            state: parking_lot::Mutex::new(ConnectionState::NotInitialized),
            state_changed: Notify::new(),
            config,
            class_factories,
            next_request_id: AtomicI32::new(1),
            pending: DashMap::new(),
            batch: parking_lot::Mutex::new(Vec::new()),
            outbound: outbound_tx,
            acm,
            tasks: TaskGroup::new(),
            adapter: parking_lot::Mutex::new(adapter),
        });

        let transceiver = Arc::new(AsyncMutex::new(transceiver));

        let setup_connection = connection.clone();
        let setup_transceiver = transceiver.clone();
        connection.tasks.spawn(async move {
            setup_connection.run_setup_and_read_loop(setup_transceiver, outbound_rx).await;
        });

        let acm_connection = connection.clone();
        let tick_interval = acm_connection.acm.suggested_tick_interval();
        connection.tasks.spawn(async move {
            ice_runtime::run_periodic(tick_interval, move || acm_connection.clone().on_acm_tick()).await;
        });

        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> TransportAddr {
        self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_adapter(&self, adapter: Option<AdapterHandle>) {
        *self.adapter.lock() = adapter;
    }

    fn set_state(&self, state: ConnectionState) {
        let mut guard = self.state.lock();
        if *guard == state {
            return;
        }
        tracing::debug!(connection = self.id.0, from = ?*guard, to = ?state, "connection state transition");
        *guard = state;
        drop(guard);
        self.state_changed.notify_waiters();
    }

    fn pending_invocation_count(&self) -> usize {
        self.pending.len()
    }

    // ---- outgoing invocations (spec.md §4.6 "Request handler") ----

    /// Sends a twoway request, returning a receiver that resolves when the
    /// reply arrives (or the connection dies first). `RetryError` is
    /// returned immediately, without allocating a request id, if the
    /// connection is `Closing` or later (spec.md §4.4 invariant).
    pub fn send_twoway(&self, body: RequestBody) -> Result<oneshot::Receiver<Result<ReplyPayload, LocalError>>, LocalError> {
        self.check_accepting_requests()?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, PendingInvocation { reply_tx: tx });
        let message = encode_request_message(request_id, &body);
        if self.outbound.send(message.into_bytes()).is_err() {
            self.pending.remove(&request_id);
            return Err(LocalError::ConnectionLost("outbound queue closed".into()));
        }
        self.acm.record_activity();
        Ok(rx)
    }

    /// Sends a oneway request with no reply correlation (spec.md §3
    /// "request-id 0 is reserved (oneway sentinel)").
    pub fn send_oneway(&self, body: RequestBody) -> Result<(), LocalError> {
        self.check_accepting_requests()?;
        let message = encode_request_message(ONEWAY_REQUEST_ID, &body);
        self.outbound
            .send(message.into_bytes())
            .map_err(|_| LocalError::ConnectionLost("outbound queue closed".into()))?;
        self.acm.record_activity();
        Ok(())
    }

    /// Appends to the per-connection batch buffer, auto-flushing first if
    /// this request would overflow `batchAutoFlushSize` (spec.md §5
    /// "Batch requests").
    pub fn queue_batch(&self, body: RequestBody) -> Result<(), LocalError> {
        self.check_accepting_requests()?;
        let mut batch = self.batch.lock();
        let projected: usize = batch.iter().map(approx_request_size).sum::<usize>() + approx_request_size(&body);
        if projected > self.config.batch_auto_flush_size && !batch.is_empty() {
            let drained = std::mem::take(&mut *batch);
            drop(batch);
            self.flush_batch_now(drained)?;
            batch = self.batch.lock();
        }
        batch.push(body);
        Ok(())
    }

    /// Atomically swaps the batch buffer onto the wire as one
    /// `BatchRequest` message (spec.md §4.5, §8 scenario 4).
    pub fn flush_batch_requests(&self) -> Result<(), LocalError> {
        let drained = std::mem::take(&mut *self.batch.lock());
        if drained.is_empty() {
            return Ok(());
        }
        self.flush_batch_now(drained)
    }

    fn flush_batch_now(&self, bodies: Vec<RequestBody>) -> Result<(), LocalError> {
        self.check_accepting_requests()?;
        let message = encode_batch_request_message(&bodies);
        self.outbound
            .send(message.into_bytes())
            .map_err(|_| LocalError::ConnectionLost("outbound queue closed".into()))?;
        self.acm.record_activity();
        Ok(())
    }

    fn check_accepting_requests(&self) -> Result<(), LocalError> {
        match self.state() {
            ConnectionState::Active => Ok(()),
            ConnectionState::Closing | ConnectionState::ClosingPending | ConnectionState::Closed | ConnectionState::Finished => {
                Err(LocalError::RetryError("connection is closing".into()))
            }
            ConnectionState::NotInitialized | ConnectionState::NotValidated => {
                Err(LocalError::RetryError("connection not yet validated".into()))
            }
        }
    }

    /// Cancels a still-pending twoway invocation (spec.md §4.5
    /// "Cancellation"). Idempotent; a request already completed or never
    /// registered is a no-op.
    pub fn cancel(&self, request_id: i32) {
        if let Some((_, pending)) = self.pending.remove(&request_id) {
            let _ = pending.reply_tx.send(Err(LocalError::InvocationCanceled));
        }
    }

    // ---- closure (spec.md §4.4) ----

    pub async fn close(self: &Arc<Self>, mode: CloseMode) {
        match mode {
            CloseMode::Forcefully => self.close_forcefully(LocalError::ConnectionLost("closed forcefully".into())),
            CloseMode::Gracefully => self.begin_graceful_close(),
            CloseMode::GracefullyWithWait => {
                self.begin_graceful_close();
                while self.pending_invocation_count() > 0 && self.state() != ConnectionState::Closed {
                    self.state_changed.notified().await;
                }
            }
        }
    }

    fn begin_graceful_close(&self) {
        if !matches!(self.state(), ConnectionState::Active) {
            return;
        }
        self.set_state(ConnectionState::Closing);
        // The io loop notices the Closing transition and, once the pending
        // table drains, sends CloseConnection and moves to ClosingPending
        // (see `maybe_finish_closing`).
        self.maybe_finish_closing();
    }

    fn maybe_finish_closing(&self) {
        if self.state() == ConnectionState::Closing && self.pending_invocation_count() == 0 {
            let message = encode_close_connection_message();
            let _ = self.outbound.send(message.into_bytes());
            self.set_state(ConnectionState::ClosingPending);
        }
    }

    fn close_forcefully(self: &Arc<Self>, reason: LocalError) {
        if matches!(self.state(), ConnectionState::Closed | ConnectionState::Finished) {
            return;
        }
        self.set_state(ConnectionState::Closed);
        drain_pending(&self.pending, || reason.clone());
        self.tasks.abort_all();
        self.set_state(ConnectionState::Finished);
    }

    // ---- ACM (spec.md §4.5) ----

    fn on_acm_tick(self: Arc<Self>) -> bool {
        if matches!(self.state(), ConnectionState::Closed | ConnectionState::Finished) {
            return false;
        }
        match self.acm.tick() {
            AcmAction::None => {}
            AcmAction::SendHeartbeat => {
                let message = encode_heartbeat_message();
                let _ = self.outbound.send(message.into_bytes());
            }
            AcmAction::CloseIfIdle => {
                if self.pending_invocation_count() == 0 {
                    self.begin_graceful_close();
                }
            }
            AcmAction::CloseIfIdleForceful => {
                self.close_forcefully(LocalError::ConnectionTimeout);
                return false;
            }
        }
        true
    }

    // ---- I/O loop ----
    //
    // The transceiver lives behind a `tokio::sync::Mutex` rather than inside
    // a single task's `select!` over both its read and write halves:
    // `Transceiver` hands out `&mut self` for both operations, so a single
    // `select!` with one branch reading and another later writing would need
    // two live mutable borrows of the same trait object at once. Reader and
    // writer each take the lock only for the duration of their own call, so
    // the two interleave instead of one blocking the other for the life of
    // the connection.

    /// Runs the handshake, then the read side of the connection, for as long
    /// as the connection lives. A second task (spawned here once validation
    /// finishes) drains `outbound_rx` onto the wire; both share `transceiver`
    /// through the mutex.
    async fn run_setup_and_read_loop(
        self: Arc<Self>,
        transceiver: Arc<AsyncMutex<Box<dyn Transceiver>>>,
        outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    ) {
        {
            let mut guard = transceiver.lock().await;
            if let Err(err) = guard.initialize().await {
                tracing::warn!(connection = self.id.0, %err, "transceiver initialization failed");
                drop(guard);
                self.close_forcefully(err);
                return;
            }
        }
        self.set_state(ConnectionState::NotValidated);

        if let Err(err) = self.run_validation(&transceiver).await {
            tracing::warn!(connection = self.id.0, %err, "connection validation failed");
            self.close_forcefully(err);
            return;
        }
        self.set_state(ConnectionState::Active);

        let writer_connection = self.clone();
        let writer_transceiver = transceiver.clone();
        self.tasks.spawn(async move {
            writer_connection.run_write_loop(writer_transceiver, outbound_rx).await;
        });

        let mut read_buf = BytesMut::with_capacity(HEADER_SIZE * 4);
        loop {
            let read_result = {
                let mut guard = transceiver.lock().await;
                guard.read(&mut read_buf).await
            };
            match read_result {
                Ok(0) => {
                    self.on_peer_eof();
                    return;
                }
                Ok(_) => {
                    self.acm.record_activity();
                    if let Err(err) = self.drain_complete_messages(&mut read_buf) {
                        tracing::warn!(connection = self.id.0, %err, "protocol error");
                        self.close_forcefully(err);
                        return;
                    }
                    if matches!(self.state(), ConnectionState::Closed | ConnectionState::Finished) {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(connection = self.id.0, %err, "read failed");
                    self.close_forcefully(err);
                    return;
                }
            }
        }
    }

    /// Drains `outbound_rx` onto the wire until the connection tears down.
    /// Spawned once, after validation, alongside the read loop above.
    async fn run_write_loop(
        self: Arc<Self>,
        transceiver: Arc<AsyncMutex<Box<dyn Transceiver>>>,
        mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    ) {
        while let Some(bytes) = outbound_rx.recv().await {
            let mut guard = transceiver.lock().await;
            if let Err(err) = guard.write_all(&bytes).await {
                drop(guard);
                tracing::warn!(connection = self.id.0, %err, "write failed");
                self.close_forcefully(err);
                return;
            }
        }
        // Every sender dropped, i.e. the connection value itself was
        // dropped; tear down quietly.
        self.close_forcefully(LocalError::ConnectionLost("connection dropped".into()));
    }

    async fn run_validation(&self, transceiver: &AsyncMutex<Box<dyn Transceiver>>) -> Result<(), LocalError> {
        match self.direction {
            // spec.md §4.4: "outgoing: send ValidateConnection ... -> Active".
            // The outgoing side's own validation completes as soon as the
            // sentinel leaves the process; there is nothing on this
            // connection to wait for in response.
            Direction::Outgoing => {
                let message = encode_validate_connection_message();
                transceiver.lock().await.write_all(&message.into_bytes()).await
            }
            // spec.md §4.4: "incoming: recv ValidateConnection -> Active".
            Direction::Incoming => {
                let mut buf = BytesMut::with_capacity(HEADER_SIZE);
                loop {
                    if buf.len() >= HEADER_SIZE {
                        break;
                    }
                    let n = transceiver.lock().await.read(&mut buf).await?;
                    if n == 0 {
                        return Err(LocalError::ConnectionLost("peer closed before validation".into()));
                    }
                }
                let mut header_bytes = buf.split_to(HEADER_SIZE).freeze();
                let header = MessageHeader::decode(&mut header_bytes)?;
                if header.message_type != MessageType::ValidateConnection {
                    return Err(LocalError::Other(
                        "expected ValidateConnection as the first message on an incoming connection".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    fn on_peer_eof(self: &Arc<Self>) {
        match self.state() {
            ConnectionState::ClosingPending | ConnectionState::Closing => {
                self.set_state(ConnectionState::Closed);
                self.tasks.abort_all();
                self.set_state(ConnectionState::Finished);
            }
            _ => {
                self.close_forcefully(LocalError::ConnectionLost("peer closed the connection".into()));
            }
        }
    }

    /// Parses and dispatches every complete message currently buffered,
    /// validating `message_size` against `messageSizeMax` *before* any
    /// allocation proportional to the claimed size happens (spec.md §4.1,
    /// §8 invariant).
    fn drain_complete_messages(self: &Arc<Self>, buf: &mut BytesMut) -> Result<(), LocalError> {
        loop {
            if buf.len() < HEADER_SIZE {
                return Ok(());
            }
            let mut header_peek = Bytes::copy_from_slice(&buf[..HEADER_SIZE]);
            let header = MessageHeader::decode(&mut header_peek)?;
            let total_size = header.message_size as usize;
            if total_size > self.config.message_size_max {
                return Err(LocalError::Marshal(MarshalError::Other(format!(
                    "message size {total_size} exceeds messageSizeMax {}",
                    self.config.message_size_max
                ))));
            }
            if buf.len() < total_size {
                // Not enough bytes buffered yet for the full message; wait
                // for the next read rather than allocating ahead of time.
                return Ok(());
            }
            let mut full = buf.split_to(total_size).freeze();
            full.advance(HEADER_SIZE);
            let message = decode_message_body(&header, full, self.config.message_size_max, self.class_factories.clone())?;
            self.handle_message(message);
        }
    }

    fn handle_message(self: &Arc<Self>, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Reply { request_id, payload } => {
                if let Some((_, pending)) = self.pending.remove(&request_id) {
                    let _ = pending.reply_tx.send(Ok(payload));
                } else {
                    tracing::debug!(connection = self.id.0, request_id, "reply for unknown/canceled request discarded");
                }
                self.maybe_finish_closing();
            }
            ProtocolMessage::Request { request_id, body } => self.dispatch_request(Some(request_id), body),
            ProtocolMessage::BatchRequest { bodies } => {
                for body in bodies {
                    self.dispatch_request(None, body);
                }
            }
            ProtocolMessage::ValidateConnection => {
                // Only expected during the handshake; if it arrives again
                // later it carries no information and is ignored.
            }
            ProtocolMessage::Heartbeat => {
                // Activity was already recorded by the caller; nothing else
                // to do (spec.md §4.5 "Heartbeat").
            }
            ProtocolMessage::CloseConnection => self.on_close_connection_received(),
        }
    }

    fn on_close_connection_received(self: &Arc<Self>) {
        match self.state() {
            ConnectionState::Active => {
                self.set_state(ConnectionState::ClosingPending);
                drain_pending(&self.pending, || LocalError::CloseConnectionReceived);
            }
            ConnectionState::Closing => self.set_state(ConnectionState::ClosingPending),
            _ => {}
        }
    }

    fn dispatch_request(self: &Arc<Self>, request_id: Option<i32>, body: RequestBody) {
        let adapter = self.adapter.lock().clone();
        let connection = self.clone();
        let message_size_max = self.config.message_size_max;
        self.tasks.spawn(async move {
            let Some(adapter) = adapter else {
                // No adapter bound: there is nowhere to route this request.
                // A twoway caller gets ObjectNotExist; oneway/batch has
                // nowhere to report it but a log line (spec.md §8 scenario
                // 1, §4.7 exception propagation rules).
                let facet = body.facet.clone();
                let identity = body.identity.clone();
                if connection.config.warn_connections {
                    tracing::warn!(
                        connection = connection.id.0,
                        identity = %identity.to_string_form(),
                        "dispatch request received on a connection with no object adapter bound"
                    );
                }
                if let Some(request_id) = request_id {
                    let reply = ReplyPayload::ObjectNotExist { identity, facet };
                    connection.send_reply(request_id, reply);
                }
                return;
            };
            let reply = adapter.dispatch(&body, request_id.is_some(), message_size_max).await;
            if let Some(request_id) = request_id {
                connection.send_reply(request_id, reply);
            } else if let Err(err) = &reply_as_result(&reply) {
                if connection.config.warn_connections {
                    tracing::warn!(connection = connection.id.0, %err, "oneway/batch dispatch failed");
                }
            }
        });
    }

    fn send_reply(self: &Arc<Self>, request_id: i32, payload: ReplyPayload) {
        let message = encode_reply_message(request_id, &payload);
        let _ = self.outbound.send(message.into_bytes());
    }
}

/// Treats every [`ReplyPayload`] other than `Ok`/`UserException` as
/// something worth a warning when there is no reply channel to carry it,
/// matching spec.md §4.7's "exceptions are logged" for oneway/batch.
fn reply_as_result(payload: &ReplyPayload) -> Result<(), LocalError> {
    match payload {
        ReplyPayload::Ok(_) | ReplyPayload::UserException(_) => Ok(()),
        ReplyPayload::ObjectNotExist { identity, .. } => Err(LocalError::ObjectNotExist {
            identity: identity.to_string_form(),
        }),
        ReplyPayload::FacetNotExist { identity, facet } => Err(LocalError::FacetNotExist {
            identity: identity.to_string_form(),
            facet: facet.first().cloned().unwrap_or_default(),
        }),
        ReplyPayload::OperationNotExist { identity, operation, .. } => Err(LocalError::OperationNotExist {
            identity: identity.to_string_form(),
            operation: operation.clone(),
        }),
        ReplyPayload::UnknownLocalException(msg)
        | ReplyPayload::UnknownUserException(msg)
        | ReplyPayload::UnknownException(msg) => Err(LocalError::Other(msg.clone())),
    }
}

/// Completes and removes every still-pending invocation with an error
/// built fresh per entry (`oneshot::Sender` is not `Clone`, so the table
/// can't simply be cloned and drained).
fn drain_pending(pending: &DashMap<i32, PendingInvocation>, mut error: impl FnMut() -> LocalError) {
    let ids: Vec<i32> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, invocation)) = pending.remove(&id) {
            let _ = invocation.reply_tx.send(Err(error()));
        }
    }
}

/// Rough wire-size estimate used only for the batch auto-flush threshold;
/// need not be exact, just monotonic in the encapsulation payload size.
fn approx_request_size(body: &RequestBody) -> usize {
    32 + body.operation.len() + body.identity.name.len() + body.identity.category.len()
}
