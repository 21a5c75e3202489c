//! HPACK header decoding.

use super::huffman::{self, HuffmanError};
use super::table::{DynamicTable, HeaderField, StaticTable};

/// HPACK decoding error.
///
/// Apart from [`HeaderListTooLarge`](HpackError::HeaderListTooLarge),
/// every variant means the compression state can no longer be trusted and
/// the connection must come down with COMPRESSION_ERROR.
#[derive(Debug, thiserror::Error)]
pub enum HpackError {
    #[error("truncated header block")]
    Truncated,
    #[error("invalid integer encoding")]
    InvalidInteger,
    #[error("invalid Huffman encoding: {0}")]
    InvalidHuffman(#[from] HuffmanError),
    #[error("invalid table index {0}")]
    InvalidIndex(usize),
    #[error("table size update to {size} exceeds the advertised limit {max}")]
    TableSizeExceeded { size: usize, max: usize },
    #[error("table size update after the first header field")]
    LateTableSizeUpdate,
    #[error("decoded header list exceeds {limit} bytes")]
    HeaderListTooLarge { limit: usize },
}

/// HPACK decoder.
pub struct HpackDecoder {
    /// Dynamic table for decoding.
    dynamic_table: DynamicTable,
    /// Upper bound the peer may resize the table to; tracks our last
    /// acknowledged SETTINGS_HEADER_TABLE_SIZE.
    max_table_size: usize,
    /// Cap on the decoded header list size (name + value + 32 per field),
    /// our SETTINGS_MAX_HEADER_LIST_SIZE. `None` means unbounded.
    max_header_list_size: Option<usize>,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    /// Create a new HPACK decoder with default settings.
    pub fn new() -> Self {
        Self {
            dynamic_table: DynamicTable::new(super::DEFAULT_TABLE_SIZE),
            max_table_size: super::DEFAULT_TABLE_SIZE,
            max_header_list_size: None,
        }
    }

    /// Create a new HPACK decoder with a specific table size.
    pub fn with_table_size(size: usize) -> Self {
        Self {
            dynamic_table: DynamicTable::new(size),
            max_table_size: size,
            max_header_list_size: None,
        }
    }

    /// Set the maximum table size the peer may use.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_table_size = size;
        if self.dynamic_table.max_size() > size {
            self.dynamic_table.set_max_size(size);
        }
    }

    /// Bound the total decoded size of a header list.
    pub fn set_max_header_list_size(&mut self, limit: Option<usize>) {
        self.max_header_list_size = limit;
    }

    /// Decode a complete HPACK header block into a list of headers.
    ///
    /// When the header list limit is exceeded the rest of the block is
    /// still decoded so the dynamic table stays synchronized with the
    /// peer; the error is reported once the block is fully consumed.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let mut headers = Vec::new();
        let mut pos = 0;
        let mut seen_field = false;
        let mut list_size = 0usize;
        let mut overflowed = false;

        while pos < data.len() {
            let (field, consumed) = self.decode_field(&data[pos..], &mut seen_field)?;
            pos += consumed;

            if let Some(field) = field {
                list_size += field.size();
                if let Some(limit) = self.max_header_list_size {
                    if list_size > limit {
                        overflowed = true;
                        continue;
                    }
                }
                headers.push(field);
            }
        }

        if overflowed {
            return Err(HpackError::HeaderListTooLarge {
                limit: self.max_header_list_size.unwrap_or(0),
            });
        }

        Ok(headers)
    }

    /// Decode a single field representation.
    /// Returns `(Option<HeaderField>, bytes_consumed)`.
    fn decode_field(
        &mut self,
        data: &[u8],
        seen_field: &mut bool,
    ) -> Result<(Option<HeaderField>, usize), HpackError> {
        let first = *data.first().ok_or(HpackError::Truncated)?;

        if first & 0x80 != 0 {
            // Indexed header field (Section 6.1): 1xxxxxxx
            *seen_field = true;
            self.decode_indexed(data)
        } else if first & 0x40 != 0 {
            // Literal with incremental indexing (Section 6.2.1): 01xxxxxx
            *seen_field = true;
            self.decode_literal(data, 6, true, false)
        } else if first & 0x20 != 0 {
            // Dynamic table size update (Section 6.3): 001xxxxx
            // Only allowed before the first field of a block (Section 4.2)
            if *seen_field {
                return Err(HpackError::LateTableSizeUpdate);
            }
            self.decode_table_size_update(data)
        } else if first & 0x10 != 0 {
            // Literal never indexed (Section 6.2.3): 0001xxxx
            *seen_field = true;
            self.decode_literal(data, 4, false, true)
        } else {
            // Literal without indexing (Section 6.2.2): 0000xxxx
            *seen_field = true;
            self.decode_literal(data, 4, false, false)
        }
    }

    fn decode_indexed(&mut self, data: &[u8]) -> Result<(Option<HeaderField>, usize), HpackError> {
        let (index, consumed) = decode_integer(data, 7)?;
        let header = self.get_header(index)?;
        Ok((Some(header), consumed))
    }

    fn decode_literal(
        &mut self,
        data: &[u8],
        prefix_bits: u8,
        index_it: bool,
        sensitive: bool,
    ) -> Result<(Option<HeaderField>, usize), HpackError> {
        let (name_index, mut consumed) = decode_integer(data, prefix_bits)?;

        let name = if name_index > 0 {
            self.get_header(name_index)?.name
        } else {
            let (name, n) = decode_string(&data[consumed..])?;
            consumed += n;
            name
        };

        let (value, n) = decode_string(&data[consumed..])?;
        consumed += n;

        let header = HeaderField {
            name,
            value,
            sensitive,
        };

        if index_it {
            self.dynamic_table.insert(header.clone());
        }

        Ok((Some(header), consumed))
    }

    fn decode_table_size_update(
        &mut self,
        data: &[u8],
    ) -> Result<(Option<HeaderField>, usize), HpackError> {
        let (new_size, consumed) = decode_integer(data, 5)?;

        if new_size > self.max_table_size {
            return Err(HpackError::TableSizeExceeded {
                size: new_size,
                max: self.max_table_size,
            });
        }

        self.dynamic_table.set_max_size(new_size);
        Ok((None, consumed))
    }

    /// Resolve a table index to a header field.
    fn get_header(&self, index: usize) -> Result<HeaderField, HpackError> {
        if index == 0 {
            return Err(HpackError::InvalidIndex(0));
        }

        let static_len = StaticTable::len();
        if index <= static_len {
            let entry = StaticTable::get(index).ok_or(HpackError::InvalidIndex(index))?;
            Ok(HeaderField::new(entry.name.to_vec(), entry.value.to_vec()))
        } else {
            self.dynamic_table
                .get(index - static_len - 1)
                .cloned()
                .ok_or(HpackError::InvalidIndex(index))
        }
    }
}

/// Decode an HPACK integer (RFC 7541 Section 5.1).
fn decode_integer(data: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    let first = *data.first().ok_or(HpackError::Truncated)?;

    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = (first as usize) & max_prefix;
    let mut consumed = 1;

    if value < max_prefix {
        return Ok((value, consumed));
    }

    let mut shift = 0u32;
    loop {
        let byte = *data.get(consumed).ok_or(HpackError::Truncated)? as usize;
        consumed += 1;

        value = value
            .checked_add((byte & 0x7f) << shift)
            .ok_or(HpackError::InvalidInteger)?;
        shift += 7;

        if byte & 0x80 == 0 {
            break;
        }

        if shift > 28 {
            return Err(HpackError::InvalidInteger);
        }
    }

    Ok((value, consumed))
}

/// Decode an HPACK string literal (RFC 7541 Section 5.2).
fn decode_string(data: &[u8]) -> Result<(Vec<u8>, usize), HpackError> {
    let first = *data.first().ok_or(HpackError::Truncated)?;
    let huffman_coded = first & 0x80 != 0;

    let (length, mut consumed) = decode_integer(data, 7)?;
    if consumed + length > data.len() {
        return Err(HpackError::Truncated);
    }

    let raw = &data[consumed..consumed + length];
    consumed += length;

    let result = if huffman_coded {
        let mut decoded = Vec::with_capacity(length * 2);
        huffman::decode(raw, &mut decoded)?;
        decoded
    } else {
        raw.to_vec()
    };

    Ok((result, consumed))
}
