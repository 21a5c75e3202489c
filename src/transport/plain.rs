//! Plain (unencrypted) transport for tests and externally secured links.

use super::{Transport, TransportState};
use bytes::BytesMut;
use std::io;

/// Buffered transport without encryption.
///
/// Useful for exercising the protocol engine without TLS, or when the
/// byte stream is already protected by something outside this crate.
pub struct PlainTransport {
    /// State of the transport.
    state: TransportState,
    /// Buffer for incoming data.
    recv_buf: BytesMut,
    /// Buffer for outgoing data.
    send_buf: BytesMut,
    /// How much of `send_buf` has been written out.
    send_pos: usize,
}

impl PlainTransport {
    /// Create a new plain transport, immediately ready.
    pub fn new() -> Self {
        Self {
            state: TransportState::Ready,
            recv_buf: BytesMut::with_capacity(16_384),
            send_buf: BytesMut::with_capacity(16_384),
            send_pos: 0,
        }
    }
}

impl Default for PlainTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for PlainTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != TransportState::Ready {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport not ready",
            ));
        }

        self.send_buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state != TransportState::Ready {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport not ready",
            ));
        }

        if self.recv_buf.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        let n = buf.len().min(self.recv_buf.len());
        buf[..n].copy_from_slice(&self.recv_buf[..n]);
        let _ = self.recv_buf.split_to(n);

        Ok(n)
    }

    fn on_recv(&mut self, data: &[u8]) -> io::Result<()> {
        self.recv_buf.extend_from_slice(data);
        Ok(())
    }

    fn pending_send(&self) -> &[u8] {
        &self.send_buf[self.send_pos..]
    }

    fn advance_send(&mut self, n: usize) {
        self.send_pos += n;

        if self.send_pos >= self.send_buf.len() {
            self.send_buf.clear();
            self.send_pos = 0;
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.state = TransportState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_transport_ready_immediately() {
        let transport = PlainTransport::new();
        assert!(transport.is_ready());
        assert!(!transport.has_pending_send());
    }

    #[test]
    fn test_send_queues_bytes() {
        let mut transport = PlainTransport::new();
        assert_eq!(transport.send(b"hello").unwrap(), 5);
        assert_eq!(transport.pending_send(), b"hello");
    }

    #[test]
    fn test_advance_send_partial() {
        let mut transport = PlainTransport::new();
        transport.send(b"hello world").unwrap();

        transport.advance_send(6);
        assert_eq!(transport.pending_send(), b"world");

        transport.advance_send(5);
        assert!(!transport.has_pending_send());
    }

    #[test]
    fn test_recv_roundtrip() {
        let mut transport = PlainTransport::new();
        transport.on_recv(b"inbound").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(transport.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"inbo");

        let mut buf = [0u8; 16];
        assert_eq!(transport.recv(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"und");

        let err = transport.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_shutdown_refuses_io() {
        let mut transport = PlainTransport::new();
        transport.shutdown().unwrap();

        assert_eq!(transport.state(), TransportState::Closed);
        assert!(transport.send(b"x").is_err());
    }
}
