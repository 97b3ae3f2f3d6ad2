//! Transport-independent view of an inbound request
//!
//! The transport builds one `Request` per HTTP request. The path holds the
//! path component only; query and fragment are split off here so the
//! dispatcher can match on the path literally.

use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::http::request::Parts;
use hyper::Version;
use std::borrow::Cow;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    url: String,
    path: String,
    query: Option<String>,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Build a request from a method and a request target such as `/hello?name=world`
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        let url = target.into();
        let without_fragment = url.split_once('#').map_or(url.as_str(), |(head, _)| head);
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (without_fragment.to_string(), None),
        };

        Self {
            method: method.into(),
            url,
            path,
            query,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    /// Build a request from the parts hyper parsed off the wire
    pub fn from_parts(parts: Parts, body: Bytes, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: parts.method.as_str().to_string(),
            url: parts.uri.to_string(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(ToString::to_string),
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr,
        }
    }

    /// Add a header; an invalid value is skipped
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    /// Replace the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the peer address
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path component only, never includes query or fragment
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string without the leading `?`
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The full URL as the transport received it
    pub fn url(&self) -> &str {
        &self.url
    }

    pub const fn version(&self) -> Version {
        self.version
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Decoded `key=value` pairs of the query string
    pub fn query_pairs(&self) -> url::form_urlencoded::Parse<'_> {
        url::form_urlencoded::parse(self.query.as_deref().unwrap_or("").as_bytes())
    }

    /// First value for `name` in the query string
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        self.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}
