//! Plain TCP implementation of the `ice-transport` contract.

mod channel;

use async_trait::async_trait;
use ice_core::LocalError;
use ice_transport::endpoint::TransportAddr;
use ice_transport::{Acceptor, Connector, Transceiver};
use tokio::net::{TcpListener, TcpStream};

pub use channel::{to_socket_addr, TcpSocketConfig, TcpTransceiver};

/// Connects to a fixed `host:port`, per spec.md §5 "Connector".
pub struct TcpConnector {
    addr: String,
    config: TcpSocketConfig,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            addr: format!("{}:{port}", host.into()),
            config: TcpSocketConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TcpSocketConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transceiver>, LocalError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(channel::map_io_error)?;
        Ok(Box::new(TcpTransceiver::new(stream, self.config)?))
    }

    fn target(&self) -> TransportAddr {
        // Best-effort: a connector may target a hostname that only
        // resolves at connect time, so this is informational (logging)
        // rather than load-bearing for dispatch.
        self.addr
            .parse::<std::net::SocketAddr>()
            .map(channel::to_socket_addr)
            .unwrap_or(TransportAddr {
                ip: std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                port: 0,
            })
    }
}

/// Listens on a bound local address, per spec.md §5 "Acceptor".
pub struct TcpAcceptor {
    listener: TcpListener,
    config: TcpSocketConfig,
}

impl TcpAcceptor {
    pub async fn bind(host: &str, port: u16) -> Result<Self, LocalError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(channel::map_io_error)?;
        Ok(Self {
            listener,
            config: TcpSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: TcpSocketConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> Result<Box<dyn Transceiver>, LocalError> {
        let (stream, _peer) = self.listener.accept().await.map_err(channel::map_io_error)?;
        Ok(Box::new(TcpTransceiver::new(stream, self.config)?))
    }

    fn local_addr(&self) -> TransportAddr {
        self.listener
            .local_addr()
            .map(channel::to_socket_addr)
            .unwrap_or(TransportAddr {
                ip: std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                port: 0,
            })
    }
}
