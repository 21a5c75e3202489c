//! Transport layer abstraction.
//!
//! The connection engine is sans-io: it never touches a socket. This
//! module defines the completion-based `Transport` contract it drives
//! instead, a plain buffered implementation for tests and externally
//! encrypted setups, and (behind the `tls` feature) a rustls-backed
//! client transport that negotiates `h2` via ALPN.

mod plain;

#[cfg(feature = "tls")]
mod tls;

pub use plain::PlainTransport;

#[cfg(feature = "tls")]
pub use tls::{TlsConfig, TlsTransport};

use std::io;

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Transport is performing its handshake (TLS only).
    Handshaking,
    /// Transport is ready for application data.
    Ready,
    /// Transport encountered an error.
    Error,
    /// Transport is closed.
    Closed,
}

/// Abstraction over raw TCP and TLS byte channels.
///
/// The interface is completion based: the caller owns the socket, pushes
/// raw inbound bytes in with [`on_recv`](Transport::on_recv), pulls
/// decrypted bytes with [`recv`](Transport::recv), and drains the bytes
/// that must go out on the wire via
/// [`pending_send`](Transport::pending_send) /
/// [`advance_send`](Transport::advance_send).
pub trait Transport {
    /// Get the current transport state.
    fn state(&self) -> TransportState;

    /// Check if the transport is ready for application data.
    fn is_ready(&self) -> bool {
        self.state() == TransportState::Ready
    }

    /// Queue application data to be sent.
    ///
    /// Returns the number of bytes queued, or `WouldBlock` if the send
    /// buffer is full.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read available decrypted data.
    ///
    /// Returns the number of bytes read, or `WouldBlock` if no data is
    /// available.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Process raw data received from the socket.
    ///
    /// For TLS this decrypts; for plain transports it just buffers.
    fn on_recv(&mut self, data: &[u8]) -> io::Result<()>;

    /// Bytes that need to be written to the socket.
    fn pending_send(&self) -> &[u8];

    /// Mark bytes as written to the socket.
    fn advance_send(&mut self, n: usize);

    /// Check if there is pending data to send.
    fn has_pending_send(&self) -> bool {
        !self.pending_send().is_empty()
    }

    /// Initiate shutdown.
    fn shutdown(&mut self) -> io::Result<()>;
}
