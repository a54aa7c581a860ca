//! Parsed HTTP/1.1 request/response event shapes handed to observers.

use std::net::SocketAddr;

use bytes::Bytes;

/// A fully parsed HTTP/1.1 request, enriched with the client remote address
/// (not present in the wire bytes, but observers need it for logging).
#[derive(Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub uri: String,
    pub version_minor: u8,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub client_addr: SocketAddr,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `true` when the request URI indicates a Kubernetes-style watch
    /// request (`?watch=true`).
    pub fn is_watch(&self) -> bool {
        self.uri.contains("watch=true")
    }
}

/// A fully parsed HTTP/1.1 response, paired 1:1 with the request that
/// produced it.
#[derive(Clone)]
pub struct ParsedResponse {
    pub status: u16,
    pub reason: String,
    pub version_minor: u8,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
