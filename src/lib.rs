//! http2-client - a sans-io HTTP/2 client connection core.
//!
//! This crate implements the single-connection state machine of an HTTP/2
//! client: frame encoding and decoding, HPACK header compression, stream
//! multiplexing under concurrency limits, and connection- and stream-level
//! flow control. It does not use async/await or any runtime; the caller
//! owns the socket, feeds received bytes in, and drains outbound bytes.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `frame`: HTTP/2 frame types, encoding, and decoding
//! - `hpack`: HPACK header compression (RFC 7541)
//! - `connection`: the client connection engine, stream table, and flow
//!   control
//! - `transport`: a completion-based transport abstraction, with a plain
//!   in-memory implementation and an optional rustls-backed TLS transport
//!   (feature `tls`, ALPN `h2`)
//!
//! All per-connection state is owned by a single [`Connection`] value, so
//! the HPACK encoder and decoder advance in exact frame order with the
//! peer. Many connections may run in parallel; one connection must not be
//! driven from multiple tasks.

pub mod connection;
pub mod frame;
pub mod hpack;
pub mod transport;

// Re-export commonly used types
pub use frame::{
    CONNECTION_PREFACE, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_CONCURRENT_STREAMS, DEFAULT_MAX_FRAME_SIZE, ErrorCode, ErrorScope,
    FRAME_HEADER_SIZE, Frame, FrameDecoder, FrameEncoder, FrameError, FrameType, StreamId,
};

pub use hpack::{HeaderField, HpackDecoder, HpackEncoder, HpackError};

pub use connection::{
    Connection, ConnectionError, ConnectionEvent, ConnectionSettings, ConnectionState,
    FlowControl, Request, Stream, StreamState,
};

pub use transport::{PlainTransport, Transport, TransportState};

#[cfg(feature = "tls")]
pub use transport::{TlsConfig, TlsTransport};
