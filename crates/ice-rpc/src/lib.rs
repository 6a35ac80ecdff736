//! The request/reply layer built on top of `ice-core`'s wire codec and
//! `ice-transport`'s byte-stream/datagram abstraction: proxies, references,
//! connections, object adapters, servants and locator-based indirection.

pub mod adapter;
pub mod communicator;
pub mod connection;
pub mod connector_registry;
pub mod handler;
pub mod locator;
pub mod outgoing;
pub mod proxy;
pub mod reference;
pub mod retry_queue;
pub mod servant;

pub use adapter::{AdapterState, ObjectAdapter};
pub use communicator::Communicator;
pub use connection::{CloseMode, Connection, ConnectionConfig, ConnectionId, ConnectionState, Direction};
pub use connector_registry::{ConnectorFactory, ConnectorRegistry};
pub use handler::{CollocatedRequestHandler, ConnectRequestHandler, ConnectionRequestHandler, RequestHandler};
pub use locator::{LocatorCache, LocatorClient, Resolution};
pub use outgoing::OutgoingConnectionFactory;
pub use proxy::Proxy;
pub use reference::{AuxiliaryReference, EndpointSelection, InvocationMode, LocatorCacheTtl, Reference, ReferenceTarget};
pub use retry_queue::RetryQueue;
pub use servant::{EncodingContext, RequestContext, Servant, ServantLocator, ServantManager};
