//! TLS-over-TCP implementation of the `ice-transport` contract (spec.md
//! §5, "Ssl" endpoint kind). Wraps a plain [`ice_transport_tcp::TcpTransceiver`]'s
//! stream in a `rustls` session; certificate verification failures surface
//! as [`LocalError::Trust`] so the retry layer never mistakes an untrusted
//! peer for a transient connection failure (spec.md §4.6, §7: trust
//! failures are never retried).

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use ice_core::LocalError;
use ice_transport::endpoint::TransportAddr;
use ice_transport::{Acceptor, Connector, Transceiver};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{rustls, TlsAcceptor, TlsConnector};

pub struct TlsTransceiver {
    stream: tokio_rustls::TlsStream<TcpStream>,
    peer_addr: TransportAddr,
    local_addr: TransportAddr,
}

impl TlsTransceiver {
    fn new(stream: tokio_rustls::TlsStream<TcpStream>) -> Result<Self, LocalError> {
        let (tcp, _) = stream.get_ref();
        let peer = tcp.peer_addr().map_err(map_io_error)?;
        let local = tcp.local_addr().map_err(map_io_error)?;
        Ok(Self {
            stream,
            peer_addr: ice_transport_tcp::to_socket_addr(peer),
            local_addr: ice_transport_tcp::to_socket_addr(local),
        })
    }
}

#[async_trait]
impl Transceiver for TlsTransceiver {
    async fn initialize(&mut self) -> Result<(), LocalError> {
        // The handshake already completed during `connect`/`accept`
        // (`rustls` requires it before the stream type exists at all);
        // nothing further is needed before the Ice `ValidateConnection`
        // exchange begins.
        Ok(())
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize, LocalError> {
        buf.reserve(4096);
        self.stream.read_buf(buf).await.map_err(map_tls_io_error)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), LocalError> {
        self.stream.write_all(data).await.map_err(map_tls_io_error)
    }

    async fn shutdown_write(&mut self) -> Result<(), LocalError> {
        self.stream.shutdown().await.map_err(map_tls_io_error)
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Connects over TCP and performs a TLS client handshake to `server_name`
/// (spec.md §5 "Ssl" Connector).
pub struct TlsConnector {
    addr: String,
    server_name: String,
    connector: TlsConnector_,
}

// Aliased to avoid a name clash between this crate's public `TlsConnector`
// (implementing `ice_transport::Connector`) and `tokio_rustls::TlsConnector`.
use tokio_rustls::TlsConnector as TlsConnector_;

impl TlsConnector {
    pub fn new(host: impl Into<String>, port: u16, client_config: Arc<rustls::ClientConfig>) -> Self {
        let host = host.into();
        Self {
            server_name: host.clone(),
            addr: format!("{host}:{port}"),
            connector: TlsConnector_::from(client_config),
        }
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self) -> Result<Box<dyn Transceiver>, LocalError> {
        let tcp = TcpStream::connect(&self.addr).await.map_err(map_io_error)?;
        let name = ServerName::try_from(self.server_name.clone())
            .map_err(|_| LocalError::Trust(format!("invalid TLS server name `{}`", self.server_name)))?;
        let stream = self
            .connector
            .connect(name, tcp)
            .await
            .map_err(map_tls_handshake_error)?;
        Ok(Box::new(TlsTransceiver::new(tokio_rustls::TlsStream::Client(stream))?))
    }

    fn target(&self) -> TransportAddr {
        self.addr
            .parse::<std::net::SocketAddr>()
            .map(ice_transport_tcp::to_socket_addr)
            .unwrap_or(TransportAddr {
                ip: std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                port: 0,
            })
    }
}

/// Listens on TCP and performs a TLS server handshake per accepted
/// connection (spec.md §5 "Ssl" Acceptor).
pub struct TlsAcceptorTransport {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsAcceptorTransport {
    pub async fn bind(
        host: &str,
        port: u16,
        server_config: Arc<rustls::ServerConfig>,
    ) -> Result<Self, LocalError> {
        let listener = TcpListener::bind((host, port)).await.map_err(map_io_error)?;
        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(server_config),
        })
    }
}

#[async_trait]
impl Acceptor for TlsAcceptorTransport {
    async fn accept(&self) -> Result<Box<dyn Transceiver>, LocalError> {
        let (tcp, _) = self.listener.accept().await.map_err(map_io_error)?;
        let stream = self.acceptor.accept(tcp).await.map_err(map_tls_handshake_error)?;
        Ok(Box::new(TlsTransceiver::new(tokio_rustls::TlsStream::Server(stream))?))
    }

    fn local_addr(&self) -> TransportAddr {
        self.listener
            .local_addr()
            .map(ice_transport_tcp::to_socket_addr)
            .unwrap_or(TransportAddr {
                ip: std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                port: 0,
            })
    }
}

fn map_io_error(err: io::Error) -> LocalError {
    match err.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
            LocalError::ConnectionLost(err.to_string())
        }
        io::ErrorKind::TimedOut => LocalError::ConnectionTimeout,
        _ => LocalError::ConnectFailed(err.to_string()),
    }
}

fn map_tls_io_error(err: io::Error) -> LocalError {
    if err.get_ref().map(|inner| inner.is::<rustls::Error>()).unwrap_or(false) {
        LocalError::Trust(err.to_string())
    } else {
        map_io_error(err)
    }
}

fn map_tls_handshake_error(err: io::Error) -> LocalError {
    LocalError::Trust(err.to_string())
}
