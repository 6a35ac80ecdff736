//! [`OutgoingConnectionFactory`]: caches outgoing connections by peer so
//! every proxy targeting the same endpoint shares one live [`Connection`]
//! (spec.md §5 "Shared-resource policy": "Connections are shared among
//! multiple proxies pointing at the same endpoint").

use std::collections::HashMap;
use std::sync::Arc;

use ice_core::encoding::ClassFactoryRegistry;
use ice_core::LocalError;
use ice_transport::endpoint::TransportAddr;
use ice_transport::Endpoint;
use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionConfig, ConnectionState, Direction};
use crate::connector_registry::ConnectorRegistry;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct ConnectionKey {
    peer: TransportAddr,
    secure: bool,
}

pub struct OutgoingConnectionFactory {
    connectors: Arc<ConnectorRegistry>,
    config: ConnectionConfig,
    class_factories: Arc<ClassFactoryRegistry>,
    live: Mutex<HashMap<ConnectionKey, Arc<Connection>>>,
}

impl OutgoingConnectionFactory {
    pub fn new(connectors: Arc<ConnectorRegistry>, config: ConnectionConfig, class_factories: Arc<ClassFactoryRegistry>) -> Self {
        Self {
            connectors,
            config,
            class_factories,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a connection to `endpoint`'s peer, reusing a still-usable
    /// one if this factory already has it cached, otherwise dialing a
    /// fresh one and caching it.
    pub async fn get_or_connect(&self, endpoint: &Endpoint) -> Result<Arc<Connection>, LocalError> {
        let connector = self.connectors.connector_for(endpoint)?;
        let key = ConnectionKey {
            peer: connector.target(),
            secure: endpoint.is_secure(),
        };
        if let Some(existing) = self.live.lock().get(&key).cloned() {
            if usable(existing.state()) {
                return Ok(existing);
            }
        }
        let transceiver = connector.connect().await?;
        let connection = Connection::start(
            transceiver,
            key.peer,
            Direction::Outgoing,
            self.config.clone(),
            self.class_factories.clone(),
            None,
        );
        self.live.lock().insert(key, connection.clone());
        Ok(connection)
    }

    /// Drops a cached connection, e.g. once it has finished closing, so a
    /// later invocation dials a fresh one instead of reusing a dead entry.
    pub fn forget(&self, peer: TransportAddr, secure: bool) {
        self.live.lock().remove(&ConnectionKey { peer, secure });
    }
}

fn usable(state: ConnectionState) -> bool {
    matches!(
        state,
        ConnectionState::NotInitialized | ConnectionState::NotValidated | ConnectionState::Active
    )
}
