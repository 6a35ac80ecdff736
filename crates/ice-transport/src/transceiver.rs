//! The byte-stream half of the transport contract (spec.md §5
//! "Transceiver"): whatever concrete transport a connection rides on, the
//! connection state machine only ever needs to read a chunk, write a
//! chunk, and shut it down.
//!
//! The original design expresses this as an explicit reactor: `initialize`/
//! `read`/`write` each return which readiness (`None`/`Read`/`Write`/
//! `Connect`) the caller should next wait for, so a single-threaded
//! event loop can multiplex many connections without blocking. Built on
//! `tokio`, that state machine is redundant — `async fn` plus the tokio
//! reactor already encode "come back when this is ready" as the future's
//! own poll behavior. [`Transceiver`] keeps the original's operations
//! (handshake, read, write, graceful close) but expresses each as an
//! `async fn` rather than a manual readiness enum.

use async_trait::async_trait;
use bytes::BytesMut;

use ice_core::LocalError;

/// Byte-stream transceiver: the thing a connection reads and writes
/// through, independent of whether it is TCP, TLS-over-TCP, or a
/// WebSocket-framed TCP stream (spec.md §5).
#[async_trait]
pub trait Transceiver: Send + Sync {
    /// Completes whatever handshake the underlying transport needs (TLS
    /// handshake, WebSocket upgrade) before the Ice protocol's own
    /// `ValidateConnection` exchange begins (spec.md §4.3).
    async fn initialize(&mut self) -> Result<(), LocalError>;

    /// Reads at least one byte into `buf`, appending to whatever is
    /// already there. Returns the number of bytes read; `0` means the
    /// peer closed its write half.
    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize, LocalError>;

    /// Writes the full contents of `data`, looping internally until every
    /// byte is accepted by the underlying transport.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), LocalError>;

    /// Begins a graceful shutdown of the write half, letting the peer
    /// observe end-of-stream while reads may still drain in-flight data
    /// (spec.md §4.5 "graceful closure").
    async fn shutdown_write(&mut self) -> Result<(), LocalError>;

    /// Tears down the transceiver immediately, without waiting for a
    /// graceful handshake (spec.md §4.5, used once closing completes or
    /// times out).
    async fn close(&mut self);

    /// Whether this transceiver carries datagrams (UDP) rather than a
    /// byte stream (TCP/TLS/WebSocket); datagram transports skip framing
    /// concerns that assume a reliable, ordered byte stream (spec.md §5).
    fn is_datagram(&self) -> bool {
        false
    }
}
