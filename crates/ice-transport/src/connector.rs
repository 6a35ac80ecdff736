//! Client-side and server-side connection establishment (spec.md §5
//! "Connector"/"Acceptor"). A [`Connector`] turns one [`crate::Endpoint`]
//! into a live [`crate::Transceiver`]; an [`Acceptor`] listens and hands
//! out one per inbound peer.

use async_trait::async_trait;

use ice_core::LocalError;

use crate::endpoint::TransportAddr;
use crate::transceiver::Transceiver;

/// Actively connects to one endpoint (spec.md §5). Implemented once per
/// concrete transport crate; the proxy/request-handler layer holds these
/// behind a `dyn Connector` so it never branches on transport kind.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transceiver>, LocalError>;

    /// Peer address this connector targets, for logging and for the
    /// per-connection ACM/retry bookkeeping keyed by remote endpoint.
    fn target(&self) -> TransportAddr;
}

/// Passively accepts inbound connections on a bound local address
/// (spec.md §5). An object adapter holds one acceptor per endpoint it
/// publishes.
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn accept(&self) -> Result<Box<dyn Transceiver>, LocalError>;

    /// Locally bound address, used to fill in a proxy's published
    /// endpoint when the adapter was configured with an ephemeral port.
    fn local_addr(&self) -> TransportAddr;
}
