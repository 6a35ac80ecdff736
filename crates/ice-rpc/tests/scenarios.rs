//! End-to-end scenarios driving a real TCP loopback connection through
//! the full `Communicator` -> `ConnectRequestHandler` -> `Connection` ->
//! `ObjectAdapter` -> `Servant` pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ice_core::encoding::{
    decode_user_error, encode_user_error, ClassFactoryRegistry, DecodedUserError, Encapsulation,
    InputStream, OutputStream, ENCODING_VERSION,
};
use ice_core::protocol::{OperationMode, ReplyPayload};
use ice_core::{CommunicatorConfig, Context, Identity, LocalError, UserError, UserErrorFactory, UserErrorRegistry};
use ice_rpc::adapter::ObjectAdapter;
use ice_rpc::communicator::Communicator;
use ice_rpc::connector_registry::{ConnectorFactory, ConnectorRegistry};
use ice_rpc::proxy::Proxy;
use ice_rpc::reference::Reference;
use ice_rpc::servant::{EncodingContext, RequestContext, Servant, ServantManager};
use ice_rpc::ConnectionConfig;
use ice_transport::endpoint::{Endpoint, EndpointKind, HostParams, TransportAddr};
use ice_transport::Connector;
use ice_transport_tcp::{TcpAcceptor, TcpConnector};

fn empty_params() -> Encapsulation {
    Encapsulation {
        encoding: ENCODING_VERSION,
        payload: Bytes::new(),
    }
}

/// A declared user exception, standing in for what a Slice compiler would
/// generate for `exception FooError { int code; string msg; }`.
#[derive(Debug, PartialEq, Eq)]
struct FooError {
    code: i32,
    msg: String,
}

impl UserError for FooError {
    fn type_id(&self) -> &str {
        "::Demo::FooError"
    }

    fn encode_body(&self, os: &mut OutputStream) {
        os.write_i32(self.code);
        os.write_string(&self.msg);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct FooErrorFactory;

impl UserErrorFactory for FooErrorFactory {
    fn type_id(&self) -> &str {
        "::Demo::FooError"
    }

    fn decode_body(&self, is: &mut InputStream) -> Result<Arc<dyn UserError>, LocalError> {
        let code = is.read_i32()?;
        let msg = is.read_string()?;
        Ok(Arc::new(FooError { code, msg }))
    }
}

struct WidgetServant;

#[async_trait]
impl Servant for WidgetServant {
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        params: Encapsulation,
        _encoding_ctx: EncodingContext,
    ) -> Result<ReplyPayload, LocalError> {
        match ctx.operation.as_ref() {
            "echo" => Ok(ReplyPayload::Ok(params)),
            "boom" => {
                let error = FooError {
                    code: 7,
                    msg: "x".to_string(),
                };
                let mut os = OutputStream::with_default_encoding();
                encode_user_error(&mut os, &error);
                Ok(ReplyPayload::UserException(Encapsulation {
                    encoding: ENCODING_VERSION,
                    payload: os.into_bytes(),
                }))
            }
            other => Err(LocalError::OperationNotExist {
                identity: ctx.identity.to_string_form(),
                operation: other.to_string(),
            }),
        }
    }
}

/// Starts a TCP-backed adapter hosting one `widget/toys` servant and
/// returns the adapter plus the port it is listening on.
async fn start_adapter() -> (Arc<ObjectAdapter>, u16) {
    let manager = Arc::new(ServantManager::new());
    manager.add(Identity::new("widget", "toys").unwrap(), "", Arc::new(WidgetServant));
    let adapter = ObjectAdapter::new("WidgetAdapter", manager, true);
    adapter.activate().unwrap();

    let acceptor = TcpAcceptor::bind("127.0.0.1", 0).await.unwrap();
    let port = match acceptor.local_addr() {
        TransportAddr { port, .. } => port,
    };
    adapter.serve(Box::new(acceptor), ConnectionConfig::default(), Arc::new(ClassFactoryRegistry::new()));
    (adapter, port)
}

fn tcp_endpoint(port: u16) -> Endpoint {
    Endpoint::Known {
        kind: EndpointKind::Tcp,
        params: HostParams {
            host: Arc::from("127.0.0.1"),
            port,
            connection_timeout: Duration::from_secs(5),
            resource: Arc::from(""),
        },
    }
}

struct DirectTcpFactory;

impl ConnectorFactory for DirectTcpFactory {
    fn connector_for(&self, endpoint: &Endpoint) -> Result<Box<dyn Connector>, LocalError> {
        let Endpoint::Known { params, .. } = endpoint else {
            return Err(LocalError::Other("expected a known TCP endpoint".into()));
        };
        Ok(Box::new(TcpConnector::new(params.host.to_string(), params.port)))
    }
}

fn communicator_with(factory: Arc<dyn ConnectorFactory>) -> Arc<Communicator> {
    let mut registry = ConnectorRegistry::new();
    registry.register(EndpointKind::Tcp, factory);
    Communicator::new(CommunicatorConfig::default(), Arc::new(ClassFactoryRegistry::new()), Arc::new(registry), None)
}

fn widget_proxy(port: u16) -> Proxy {
    let identity = Identity::new("widget", "toys").unwrap();
    Proxy::new(Reference::direct(identity, vec![tcp_endpoint(port)]))
}

#[tokio::test]
async fn twoway_echo_round_trips_the_payload() {
    let (_adapter, port) = start_adapter().await;
    let communicator = communicator_with(Arc::new(DirectTcpFactory));
    let proxy = widget_proxy(port);

    let reply = communicator
        .invoke_twoway(&proxy, "echo", OperationMode::Normal, Context::new(), empty_params())
        .await
        .unwrap();
    assert!(matches!(reply, ReplyPayload::Ok(_)));
}

#[tokio::test]
async fn twoway_with_a_declared_user_exception_round_trips_as_user_exception() {
    let (_adapter, port) = start_adapter().await;
    let communicator = communicator_with(Arc::new(DirectTcpFactory));
    let proxy = widget_proxy(port);

    let reply = communicator
        .invoke_twoway(&proxy, "boom", OperationMode::Normal, Context::new(), empty_params())
        .await
        .unwrap();
    let ReplyPayload::UserException(encapsulation) = reply else {
        panic!("expected a user exception reply, got {reply:?}");
    };

    let mut registry = UserErrorRegistry::new();
    registry.register(Arc::new(FooErrorFactory));
    let mut is = InputStream::new(
        encapsulation.payload,
        encapsulation.encoding,
        1 << 20,
        Arc::new(ClassFactoryRegistry::new()),
    );
    let decoded = decode_user_error(&mut is, &registry).unwrap();
    let DecodedUserError::Known(error) = decoded else {
        panic!("expected the caller's registry to know ::Demo::FooError");
    };
    let foo = error.as_any().downcast_ref::<FooError>().unwrap();
    assert_eq!(foo.code, 7);
    assert_eq!(foo.msg, "x");
}

#[tokio::test]
async fn oneway_against_a_nonexistent_identity_does_not_error_the_caller() {
    let (_adapter, port) = start_adapter().await;
    let communicator = communicator_with(Arc::new(DirectTcpFactory));
    let identity = Identity::new("ghost", "toys").unwrap();
    let proxy = Proxy::new(Reference::direct(identity, vec![tcp_endpoint(port)])).oneway();

    // A oneway send only reports a local failure to enqueue; what the peer
    // does with an unknown identity (ObjectNotExist, logged server-side)
    // is invisible to a oneway caller by design.
    communicator
        .invoke_oneway(&proxy, "echo", OperationMode::Normal, Context::new(), empty_params())
        .await
        .unwrap();
}

#[tokio::test]
async fn twoway_against_an_unknown_operation_reports_operation_not_exist() {
    let (_adapter, port) = start_adapter().await;
    let communicator = communicator_with(Arc::new(DirectTcpFactory));
    let proxy = widget_proxy(port);

    let reply = communicator
        .invoke_twoway(&proxy, "levitate", OperationMode::Normal, Context::new(), empty_params())
        .await
        .unwrap();
    assert!(matches!(reply, ReplyPayload::OperationNotExist { .. }));
}

#[tokio::test]
async fn batch_requests_are_not_sent_until_flushed() {
    let (_adapter, port) = start_adapter().await;
    let communicator = communicator_with(Arc::new(DirectTcpFactory));
    let proxy = widget_proxy(port).batch_oneway();

    for _ in 0..3 {
        communicator
            .queue_batch(&proxy, "echo", OperationMode::Normal, Context::new(), empty_params())
            .await
            .unwrap();
    }
    communicator.flush_batch(&proxy).await.unwrap();
}

/// Simulates a connect failure discovered while resolving the request
/// handler (no bytes sent yet), which is retryable for *any* operation,
/// idempotent or not (spec.md §7 "pre-send errors").
struct FlakyThenWorkingFactory {
    attempts: AtomicUsize,
    fail_first_n: usize,
    port: u16,
}

impl ConnectorFactory for FlakyThenWorkingFactory {
    fn connector_for(&self, _endpoint: &Endpoint) -> Result<Box<dyn Connector>, LocalError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first_n {
            return Err(LocalError::ConnectFailed("simulated refusal".into()));
        }
        Ok(Box::new(TcpConnector::new("127.0.0.1", self.port)))
    }
}

#[tokio::test]
async fn a_non_idempotent_twoway_retries_a_pre_send_connect_failure() {
    let (_adapter, port) = start_adapter().await;
    let factory = Arc::new(FlakyThenWorkingFactory {
        attempts: AtomicUsize::new(0),
        fail_first_n: 1,
        port,
    });
    let communicator = communicator_with(factory.clone());
    let proxy = widget_proxy(port);

    let reply = communicator
        .invoke_twoway(&proxy, "echo", OperationMode::Normal, Context::new(), empty_params())
        .await
        .unwrap();
    assert!(matches!(reply, ReplyPayload::Ok(_)));
    assert!(factory.attempts.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn opaque_endpoints_survive_a_round_trip_through_a_proxy() {
    let text = "widget -t -e 1.1 -p 1.0:opaque -t 99 -e 1.0 -v AAECAw==";
    let parsed = Proxy::parse(text).unwrap();
    assert_eq!(parsed.to_string_form(), text);
}

#[tokio::test]
async fn graceful_close_with_wait_drains_a_pending_invocation_first() {
    let (_adapter, port) = start_adapter().await;
    let communicator = communicator_with(Arc::new(DirectTcpFactory));
    let proxy = widget_proxy(port);

    let reply = communicator
        .invoke_twoway(&proxy, "echo", OperationMode::Normal, Context::new(), empty_params())
        .await
        .unwrap();
    assert!(matches!(reply, ReplyPayload::Ok(_)));

    communicator.destroy().await;
}
