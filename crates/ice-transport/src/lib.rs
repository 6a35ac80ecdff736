//! Endpoint/Connector/Acceptor/Transceiver contract (spec.md §5). Every
//! concrete transport crate (`ice-transport-tcp`, `-udp`, `-tls`, `-ws`)
//! implements the traits declared here; the runtime and dispatch layers
//! depend only on this crate, never on a concrete transport directly.

pub mod connector;
pub mod endpoint;
pub mod transceiver;

pub use connector::{Acceptor, Connector};
pub use endpoint::{parse_host_params, Endpoint, EndpointKind, HostParams, TransportAddr};
pub use transceiver::Transceiver;
