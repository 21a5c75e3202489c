//! HPACK header encoding.

use super::huffman;
use super::table::{DynamicTable, HeaderField, StaticTable};

/// HPACK encoder.
///
/// Representation policy: exact table matches use the indexed form; name
/// matches and new fields that fit the table use a literal with
/// incremental indexing; fields marked sensitive use the never-indexed
/// form and are kept out of the dynamic table entirely.
pub struct HpackEncoder {
    /// Dynamic table for encoding.
    dynamic_table: DynamicTable,
    /// Whether to use Huffman encoding for strings.
    use_huffman: bool,
    /// Table size update to emit at the start of the next header block
    /// (RFC 7541 Section 4.2).
    pending_size_update: Option<usize>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    /// Create a new HPACK encoder with default settings.
    pub fn new() -> Self {
        Self {
            dynamic_table: DynamicTable::new(super::DEFAULT_TABLE_SIZE),
            use_huffman: true,
            pending_size_update: None,
        }
    }

    /// Create a new HPACK encoder with a specific table size.
    pub fn with_table_size(size: usize) -> Self {
        Self {
            dynamic_table: DynamicTable::new(size),
            use_huffman: true,
            pending_size_update: None,
        }
    }

    /// Set whether to use Huffman encoding.
    pub fn set_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// Change the dynamic table size.
    ///
    /// The new capacity takes effect immediately on our table; the peer
    /// learns about it from a size-update directive emitted at the start
    /// of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.dynamic_table.set_max_size(size);
        self.pending_size_update = Some(size);
    }

    /// Encode a list of headers into an HPACK header block.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        if let Some(size) = self.pending_size_update.take() {
            encode_integer(size, 5, 0x20, buf);
        }

        for header in headers {
            self.encode_header(header, buf);
        }
    }

    /// Encode a single header field.
    fn encode_header(&mut self, header: &HeaderField, buf: &mut Vec<u8>) {
        if header.sensitive {
            self.encode_never_indexed(header, buf);
            return;
        }

        let static_match = StaticTable::find(&header.name, &header.value);
        let dynamic_match = self.dynamic_table.find(&header.name, &header.value);

        match (static_match, dynamic_match) {
            // Exact match in the static table
            (Some((idx, true)), _) => {
                encode_integer(idx, 7, 0x80, buf);
            }
            // Exact match in the dynamic table
            (_, Some((dyn_idx, true))) => {
                encode_integer(StaticTable::len() + 1 + dyn_idx, 7, 0x80, buf);
            }
            // Name match in the static table
            (Some((idx, false)), _) => {
                self.encode_literal(idx, header, buf);
            }
            // Name match in the dynamic table
            (_, Some((dyn_idx, false))) => {
                self.encode_literal(StaticTable::len() + 1 + dyn_idx, header, buf);
            }
            // New name
            (None, None) => {
                self.encode_literal(0, header, buf);
            }
        }
    }

    /// Encode a literal header field, choosing between incremental
    /// indexing (Section 6.2.1) and no indexing (Section 6.2.2).
    ///
    /// A field too large to ever fit the dynamic table would only evict
    /// useful entries, so it is sent without indexing.
    fn encode_literal(&mut self, name_index: usize, header: &HeaderField, buf: &mut Vec<u8>) {
        let index_it = header.size() <= self.dynamic_table.max_size();

        let (prefix_bits, prefix) = if index_it { (6, 0x40) } else { (4, 0x00) };
        encode_integer(name_index, prefix_bits, prefix, buf);
        if name_index == 0 {
            self.encode_string(&header.name, buf);
        }
        self.encode_string(&header.value, buf);

        if index_it {
            self.dynamic_table.insert(header.clone());
        }
    }

    /// Encode a literal header field never indexed (Section 6.2.3).
    fn encode_never_indexed(&mut self, header: &HeaderField, buf: &mut Vec<u8>) {
        let name_index = match StaticTable::find(&header.name, &header.value) {
            Some((idx, _)) => idx,
            None => match self.dynamic_table.find(&header.name, &header.value) {
                Some((dyn_idx, _)) => StaticTable::len() + 1 + dyn_idx,
                None => 0,
            },
        };

        encode_integer(name_index, 4, 0x10, buf);
        if name_index == 0 {
            self.encode_string(&header.name, buf);
        }
        self.encode_string(&header.value, buf);
    }

    /// Encode a string literal (RFC 7541 Section 5.2).
    fn encode_string(&self, data: &[u8], buf: &mut Vec<u8>) {
        if self.use_huffman {
            let huffman_len = huffman::encoded_len(data);
            if huffman_len < data.len() {
                encode_integer(huffman_len, 7, 0x80, buf);
                huffman::encode(data, buf);
                return;
            }
        }

        encode_integer(data.len(), 7, 0x00, buf);
        buf.extend_from_slice(data);
    }
}

/// Encode an integer with an N-bit prefix (RFC 7541 Section 5.1).
fn encode_integer(mut value: usize, prefix_bits: u8, prefix: u8, buf: &mut Vec<u8>) {
    let max_prefix: usize = (1 << prefix_bits) - 1;

    if value < max_prefix {
        buf.push(prefix | (value as u8));
    } else {
        buf.push(prefix | (max_prefix as u8));
        value -= max_prefix;
        while value >= 128 {
            buf.push((value % 128) as u8 | 0x80);
            value /= 128;
        }
        buf.push(value as u8);
    }
}
