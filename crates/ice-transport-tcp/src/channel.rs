//! Plain TCP [`Transceiver`] (spec.md §5). No framing of its own: message
//! boundaries come entirely from the 14-byte header's `message_size`
//! field, decoded one layer up in the connection state machine.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use ice_core::LocalError;
use ice_transport::endpoint::TransportAddr;
use ice_transport::Transceiver;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Socket-level knobs applied after connect/accept (spec.md §5 design
/// note: graceful closure waits for the peer's EOF, so an abrupt `RST` is
/// reserved for the timeout path rather than the default).
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpSocketConfig {
    pub linger: Option<Duration>,
    pub nodelay: bool,
}

impl TcpSocketConfig {
    fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        let sock = SockRef::from(stream);
        sock.set_linger(self.linger)?;
        stream.set_nodelay(self.nodelay)
    }
}

pub struct TcpTransceiver {
    stream: TcpStream,
    peer_addr: TransportAddr,
    local_addr: TransportAddr,
}

impl TcpTransceiver {
    pub(crate) fn new(stream: TcpStream, config: TcpSocketConfig) -> Result<Self, LocalError> {
        config.apply(&stream).map_err(map_io_error)?;
        let peer = stream.peer_addr().map_err(map_io_error)?;
        let local = stream.local_addr().map_err(map_io_error)?;
        Ok(Self {
            stream,
            peer_addr: to_socket_addr(peer),
            local_addr: to_socket_addr(local),
        })
    }

    pub fn peer_addr(&self) -> TransportAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> TransportAddr {
        self.local_addr
    }
}

#[async_trait]
impl Transceiver for TcpTransceiver {
    async fn initialize(&mut self) -> Result<(), LocalError> {
        // A plain TCP connection needs no handshake beyond the three-way
        // handshake the kernel already completed by the time `connect`/
        // `accept` returned.
        Ok(())
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize, LocalError> {
        if buf.capacity() == buf.len() {
            buf.reserve(4096);
        }
        let n = self.stream.read_buf(buf).await.map_err(map_io_error)?;
        Ok(n)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), LocalError> {
        self.stream.write_all(data).await.map_err(map_io_error)
    }

    async fn shutdown_write(&mut self) -> Result<(), LocalError> {
        self.stream.shutdown().await.map_err(map_io_error)
    }

    async fn close(&mut self) {
        let _ = AsyncWriteExt::shutdown(&mut self.stream).await;
    }
}

/// Public so sibling transport crates (e.g. `ice-transport-tls`, which
/// wraps a plain TCP stream) can reuse the same conversion instead of
/// duplicating it.
pub fn to_socket_addr(addr: SocketAddr) -> TransportAddr {
    TransportAddr {
        ip: addr.ip(),
        port: addr.port(),
    }
}

pub(crate) fn map_io_error(err: io::Error) -> LocalError {
    match err.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
            LocalError::ConnectionLost(err.to_string())
        }
        io::ErrorKind::TimedOut => LocalError::ConnectionTimeout,
        _ => LocalError::ConnectFailed(err.to_string()),
    }
}
