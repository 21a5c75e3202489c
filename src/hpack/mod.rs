//! HPACK header compression (RFC 7541).
//!
//! HPACK is the stateful header compression format used by HTTP/2:
//! - A static table of 61 common header fields
//! - A size-bounded dynamic table of recently used headers
//! - Huffman coding for string literals
//! - Variable-length integer encoding
//!
//! The encoder and decoder each own an independent dynamic table. The two
//! tables on either end of a connection stay synchronized only through the
//! on-wire byte stream, which is why a connection must decode header blocks
//! in exact frame order.

mod decode;
mod encode;
mod huffman;
mod table;

pub use decode::{HpackDecoder, HpackError};
pub use encode::HpackEncoder;
pub use table::{HeaderField, StaticTable};

/// Default dynamic table size (4096 bytes).
pub const DEFAULT_TABLE_SIZE: usize = 4096;
