//! Maps an endpoint's transport kind to the [`Connector`] that can dial
//! it. Kept as an explicit, application-constructed registry rather than a
//! global table so the set of transports a process supports is a
//! parameter passed in at `Communicator` construction, not a link-time
//! side effect of which transport crates happen to be linked in.

use std::collections::HashMap;
use std::sync::Arc;

use ice_core::LocalError;
use ice_transport::{Connector, Endpoint, EndpointKind};

/// Builds a [`Connector`] for one endpoint of a given kind. A concrete
/// transport crate (`ice-transport-tcp`, `-tls`, `-udp`, `-ws`) supplies
/// one implementation per [`EndpointKind`] it handles.
pub trait ConnectorFactory: Send + Sync {
    fn connector_for(&self, endpoint: &Endpoint) -> Result<Box<dyn Connector>, LocalError>;
}

#[derive(Default)]
pub struct ConnectorRegistry {
    factories: HashMap<EndpointKind, Arc<dyn ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EndpointKind, factory: Arc<dyn ConnectorFactory>) {
        self.factories.insert(kind, factory);
    }

    /// Builds a connector for `endpoint`'s kind, or `Other` if this
    /// communicator has no registered transport plugin for it — the
    /// endpoint itself may still be an `Opaque` variant that was merely
    /// forwarded, not connected to (spec.md §6 "Opaque endpoint").
    pub fn connector_for(&self, endpoint: &Endpoint) -> Result<Box<dyn Connector>, LocalError> {
        let kind = endpoint.kind();
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| LocalError::Other(format!("no connector registered for endpoint kind `{kind}`")))?;
        factory.connector_for(endpoint)
    }
}
