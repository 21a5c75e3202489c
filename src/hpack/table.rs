//! HPACK static and dynamic tables.

use std::collections::VecDeque;

/// A header field (name-value pair).
///
/// `sensitive` marks fields that must never enter a compression table
/// (authorization tokens, cookies with secrets). They are encoded with the
/// "never indexed" representation and the flag survives decoding so that
/// intermediaries can honor it too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub sensitive: bool,
}

impl HeaderField {
    /// Create a new header field.
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitive: false,
        }
    }

    /// Create a header field that is excluded from compression tables.
    pub fn sensitive(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitive: true,
        }
    }

    /// Whether this is a pseudo-header (`:method`, `:status`, ...).
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    /// Size of this field for table accounting:
    /// name length + value length + 32 (RFC 7541 Section 4.1).
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

/// A static table entry (references static data).
#[derive(Debug, Clone, Copy)]
pub struct StaticEntry {
    pub name: &'static [u8],
    pub value: &'static [u8],
}

/// The HPACK static table (RFC 7541 Appendix A).
///
/// Indices are 1-based; index 0 is invalid.
pub struct StaticTable;

macro_rules! static_entry {
    ($name:literal, $value:literal) => {
        StaticEntry {
            name: $name,
            value: $value,
        }
    };
}

impl StaticTable {
    /// Static table entries; the leading placeholder keeps indices 1-based.
    const ENTRIES: [StaticEntry; 62] = [
        static_entry!(b"", b""),
        static_entry!(b":authority", b""),
        static_entry!(b":method", b"GET"),
        static_entry!(b":method", b"POST"),
        static_entry!(b":path", b"/"),
        static_entry!(b":path", b"/index.html"),
        static_entry!(b":scheme", b"http"),
        static_entry!(b":scheme", b"https"),
        static_entry!(b":status", b"200"),
        static_entry!(b":status", b"204"),
        static_entry!(b":status", b"206"),
        static_entry!(b":status", b"304"),
        static_entry!(b":status", b"400"),
        static_entry!(b":status", b"404"),
        static_entry!(b":status", b"500"),
        static_entry!(b"accept-charset", b""),
        static_entry!(b"accept-encoding", b"gzip, deflate"),
        static_entry!(b"accept-language", b""),
        static_entry!(b"accept-ranges", b""),
        static_entry!(b"accept", b""),
        static_entry!(b"access-control-allow-origin", b""),
        static_entry!(b"age", b""),
        static_entry!(b"allow", b""),
        static_entry!(b"authorization", b""),
        static_entry!(b"cache-control", b""),
        static_entry!(b"content-disposition", b""),
        static_entry!(b"content-encoding", b""),
        static_entry!(b"content-language", b""),
        static_entry!(b"content-length", b""),
        static_entry!(b"content-location", b""),
        static_entry!(b"content-range", b""),
        static_entry!(b"content-type", b""),
        static_entry!(b"cookie", b""),
        static_entry!(b"date", b""),
        static_entry!(b"etag", b""),
        static_entry!(b"expect", b""),
        static_entry!(b"expires", b""),
        static_entry!(b"from", b""),
        static_entry!(b"host", b""),
        static_entry!(b"if-match", b""),
        static_entry!(b"if-modified-since", b""),
        static_entry!(b"if-none-match", b""),
        static_entry!(b"if-range", b""),
        static_entry!(b"if-unmodified-since", b""),
        static_entry!(b"last-modified", b""),
        static_entry!(b"link", b""),
        static_entry!(b"location", b""),
        static_entry!(b"max-forwards", b""),
        static_entry!(b"proxy-authenticate", b""),
        static_entry!(b"proxy-authorization", b""),
        static_entry!(b"range", b""),
        static_entry!(b"referer", b""),
        static_entry!(b"refresh", b""),
        static_entry!(b"retry-after", b""),
        static_entry!(b"server", b""),
        static_entry!(b"set-cookie", b""),
        static_entry!(b"strict-transport-security", b""),
        static_entry!(b"transfer-encoding", b""),
        static_entry!(b"user-agent", b""),
        static_entry!(b"vary", b""),
        static_entry!(b"via", b""),
        static_entry!(b"www-authenticate", b""),
    ];

    /// Get a static table entry by index (1-61).
    pub fn get(index: usize) -> Option<&'static StaticEntry> {
        if index == 0 || index > Self::len() {
            None
        } else {
            Some(&Self::ENTRIES[index])
        }
    }

    /// Find an entry by name and value.
    ///
    /// Returns `(index, exact)` where `exact` is true if both name and
    /// value match; otherwise the index of the first name-only match.
    pub fn find(name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
        let mut name_match = None;

        for (i, entry) in Self::ENTRIES.iter().enumerate().skip(1) {
            if entry.name == name {
                if entry.value == value {
                    return Some((i, true));
                }
                if name_match.is_none() {
                    name_match = Some(i);
                }
            }
        }

        name_match.map(|i| (i, false))
    }

    /// Number of entries in the static table.
    pub const fn len() -> usize {
        61
    }
}

/// The HPACK dynamic table.
///
/// A FIFO of header fields with the newest entry at index 0. Entries are
/// evicted from the back when the table exceeds its maximum size.
pub struct DynamicTable {
    /// Header entries, newest first.
    entries: VecDeque<HeaderField>,
    /// Current size in bytes.
    size: usize,
    /// Maximum size in bytes.
    max_size: usize,
}

impl DynamicTable {
    /// Create a new dynamic table with the given maximum size.
    pub(super) fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Set the maximum size of the table, evicting entries as needed.
    pub(super) fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict();
    }

    /// Current maximum size in bytes.
    pub(super) fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get an entry by index (0 = newest entry).
    pub(super) fn get(&self, index: usize) -> Option<&HeaderField> {
        self.entries.get(index)
    }

    /// Insert a new entry at the front of the table.
    pub(super) fn insert(&mut self, field: HeaderField) {
        let entry_size = field.size();

        // An entry larger than the whole table empties it (RFC 7541 §4.4)
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }

        while self.size + entry_size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }

        self.entries.push_front(field);
        self.size += entry_size;
    }

    /// Find an entry by name and value; index is 0-based within the table.
    pub(super) fn find(&self, name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
        let mut name_match = None;

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name == name {
                if entry.value == value {
                    return Some((i, true));
                }
                if name_match.is_none() {
                    name_match = Some(i);
                }
            }
        }

        name_match.map(|i| (i, false))
    }

    fn evict(&mut self) {
        while self.size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn size(&self) -> usize {
        self.size
    }
}
