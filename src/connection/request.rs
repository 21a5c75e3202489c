//! The user-facing request type.

use bytes::Bytes;

use crate::hpack::HeaderField;

/// An HTTP/2 request to submit on a connection.
///
/// Pseudo-header fields are kept separate from regular headers so the
/// encoder can guarantee they precede every regular field in the header
/// block (RFC 7540 Section 8.1.2.1).
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    /// Regular (non-pseudo) headers. Mark fields carrying credentials
    /// with [`HeaderField::sensitive`] to keep them out of compression
    /// tables.
    pub headers: Vec<HeaderField>,
    /// Optional request body.
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request with the given method.
    pub fn new(
        method: impl Into<String>,
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            scheme: scheme.into(),
            authority: authority.into(),
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Create a GET request.
    pub fn get(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::new("GET", scheme, authority, path)
    }

    /// Create a POST request with a body.
    pub fn post(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut request = Self::new("POST", scheme, authority, path);
        request.body = Some(body.into());
        request
    }

    /// Append a regular header.
    pub fn header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(HeaderField::new(name, value));
        self
    }

    /// Append a header that must never enter a compression table.
    pub fn sensitive_header(
        mut self,
        name: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.headers.push(HeaderField::sensitive(name, value));
        self
    }

    /// Attach a body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether the request carries body bytes.
    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// The full header list: pseudo-headers first, then regular headers.
    pub fn header_list(&self) -> Vec<HeaderField> {
        let mut list = Vec::with_capacity(4 + self.headers.len());
        list.push(HeaderField::new(b":method".to_vec(), self.method.as_bytes()));
        list.push(HeaderField::new(b":scheme".to_vec(), self.scheme.as_bytes()));
        list.push(HeaderField::new(
            b":authority".to_vec(),
            self.authority.as_bytes(),
        ));
        list.push(HeaderField::new(b":path".to_vec(), self.path.as_bytes()));
        list.extend(self.headers.iter().cloned());
        list
    }
}
