//! WebSocket-framed implementation of the `ice-transport` contract
//! (spec.md §5, "Ws"/"Wss" endpoint kinds). Built directly over a
//! `tokio::net::TcpStream` rather than `ice-transport-tcp`'s
//! [`ice_transport_tcp::TcpTransceiver`], since framing needs to interpose
//! on every read/write and an extra `Transceiver`-to-`Transceiver` nesting
//! buys nothing here.

mod frame;
mod handshake;

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use ice_core::LocalError;
use ice_transport::endpoint::TransportAddr;
use ice_transport::{Acceptor, Connector, Transceiver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use frame::DecodedFrame;

/// Which side of the handshake this transceiver performed; client frames
/// must be masked, server frames must not be (RFC 6455 §5.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

pub struct WsTransceiver {
    stream: TcpStream,
    role: Role,
    peer_addr: TransportAddr,
    local_addr: TransportAddr,
    resource: String,
    host: String,
    read_buf: BytesMut,
}

impl WsTransceiver {
    fn new(stream: TcpStream, role: Role, resource: String, host: String) -> Result<Self, LocalError> {
        let peer_addr = ice_transport_tcp::to_socket_addr(stream.peer_addr().map_err(map_io_error)?);
        let local_addr = ice_transport_tcp::to_socket_addr(stream.local_addr().map_err(map_io_error)?);
        Ok(Self {
            stream,
            role,
            peer_addr,
            local_addr,
            resource,
            host,
            read_buf: BytesMut::new(),
        })
    }

    async fn read_line(&mut self) -> Result<String, LocalError> {
        let mut line = Vec::new();
        loop {
            let byte = self.stream.read_u8().await.map_err(map_io_error)?;
            if byte == b'\n' {
                break;
            }
            if byte != b'\r' {
                line.push(byte);
            }
        }
        String::from_utf8(line).map_err(|e| LocalError::Other(e.to_string()))
    }

    async fn read_http_message(&mut self) -> Result<String, LocalError> {
        let mut message = String::new();
        loop {
            let line = self.read_line().await?;
            let done = line.is_empty();
            message.push_str(&line);
            message.push('\n');
            if done {
                break;
            }
        }
        Ok(message)
    }
}

#[async_trait]
impl Transceiver for WsTransceiver {
    async fn initialize(&mut self) -> Result<(), LocalError> {
        match self.role {
            Role::Client => {
                let client_key = handshake::generate_client_key();
                let request = handshake::build_client_request(&self.host, &self.resource, &client_key);
                self.stream.write_all(request.as_bytes()).await.map_err(map_io_error)?;
                let response = self.read_http_message().await?;
                handshake::validate_server_response(&response, &client_key)
            }
            Role::Server => {
                let request = self.read_http_message().await?;
                let client_key = handshake::parse_client_key(&request)?;
                let response = handshake::build_server_response(&handshake::accept_key(&client_key));
                self.stream.write_all(response.as_bytes()).await.map_err(map_io_error)
            }
        }
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize, LocalError> {
        loop {
            if let Some(decoded) = frame::try_decode_frame(&mut self.read_buf)? {
                return match decoded {
                    DecodedFrame::Binary(payload) => {
                        buf.extend_from_slice(&payload);
                        Ok(payload.len())
                    }
                    DecodedFrame::Close => Err(LocalError::CloseConnectionReceived),
                };
            }
            self.read_buf.reserve(4096);
            let n = self.stream.read_buf(&mut self.read_buf).await.map_err(map_io_error)?;
            if n == 0 {
                return Ok(0);
            }
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), LocalError> {
        let mask = match self.role {
            Role::Client => Some(client_mask_key()),
            Role::Server => None,
        };
        let mut framed = BytesMut::new();
        frame::encode_binary_frame(&mut framed, data, mask);
        self.stream.write_all(&framed).await.map_err(map_io_error)
    }

    async fn shutdown_write(&mut self) -> Result<(), LocalError> {
        self.stream.shutdown().await.map_err(map_io_error)
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

fn client_mask_key() -> [u8; 4] {
    let pid = std::process::id().to_le_bytes();
    [pid[0], pid[1] ^ 0xff, pid[2], pid[3] ^ 0xff]
}

/// Connects over TCP and performs the WebSocket client handshake
/// (spec.md §5 "Ws"/"Wss" Connector).
pub struct WsConnector {
    addr: String,
    host: String,
    resource: String,
}

impl WsConnector {
    pub fn new(host: impl Into<String>, port: u16, resource: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            addr: format!("{host}:{port}"),
            host,
            resource: resource.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transceiver>, LocalError> {
        let tcp = TcpStream::connect(&self.addr).await.map_err(map_io_error)?;
        Ok(Box::new(WsTransceiver::new(
            tcp,
            Role::Client,
            self.resource.clone(),
            self.host.clone(),
        )?))
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

/// Listens on TCP and performs the WebSocket server handshake per accepted
/// connection (spec.md §5 "Ws"/"Wss" Acceptor).
pub struct WsAcceptor {
    listener: TcpListener,
    resource: String,
}

impl WsAcceptor {
    pub async fn bind(host: &str, port: u16, resource: impl Into<String>) -> Result<Self, LocalError> {
        let listener = TcpListener::bind((host, port)).await.map_err(map_io_error)?;
        Ok(Self {
            listener,
            resource: resource.into(),
        })
    }
}

#[async_trait]
impl Acceptor for WsAcceptor {
    async fn accept(&self) -> Result<Box<dyn Transceiver>, LocalError> {
        let (tcp, peer) = self.listener.accept().await.map_err(map_io_error)?;
        Ok(Box::new(WsTransceiver::new(
            tcp,
            Role::Server,
            self.resource.clone(),
            peer.to_string(),
        )?))
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
