//! Response-writing capability handed to handlers
//!
//! Handlers set a status, add headers and write body bytes. The status is
//! committed by the first body write; a later `set_status` is ignored and
//! logged, matching how HTTP/1 servers treat a header block already sent.

use http_body_util::Full;
use bytes::BytesMut;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::fmt;
use std::io;

const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    committed: bool,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response status. Ignored once the body has been written to.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.committed {
            crate::logger::log_warning(&format!(
                "Superfluous status {status} ignored, response already committed with {}",
                self.status()
            ));
            return;
        }
        self.status = Some(status);
    }

    /// Effective status; 200 when none was set
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Whether a handler set the status explicitly
    pub const fn has_explicit_status(&self) -> bool {
        self.status.is_some()
    }

    /// Set a header, replacing previous values. Invalid names or values are
    /// logged and dropped.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => crate::logger::log_warning(&format!("Invalid header dropped: {name}")),
        }
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn write_bytes(&mut self, data: impl AsRef<[u8]>) {
        self.committed = true;
        self.body.extend_from_slice(data.as_ref());
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s);
    }

    /// Target of `write!`/`writeln!`; formatting into a buffer cannot fail
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(s) => self.write_str(s),
            None => self.write_str(&args.to_string()),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Finish the response. A non-empty body without a content type gets
    /// `text/plain; charset=utf-8`.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status();
        let mut headers = self.headers;
        if !self.body.is_empty() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        }

        let mut response = Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Build 400 Bad Request response
pub fn build_400_response() -> Response<Full<Bytes>> {
    build_plain_response(StatusCode::BAD_REQUEST, "400 Bad Request")
}

/// Build 413 Payload Too Large response
pub fn build_413_response() -> Response<Full<Bytes>> {
    build_plain_response(StatusCode::PAYLOAD_TOO_LARGE, "413 Payload Too Large")
}

/// Build 500 Internal Server Error response
pub fn build_500_response() -> Response<Full<Bytes>> {
    build_plain_response(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
}

fn build_plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, DEFAULT_CONTENT_TYPE)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap_or_else(|e| {
            log_build_error(status, &e);
            Response::new(Full::new(Bytes::from_static(body.as_bytes())))
        })
}

/// Log response build error
fn log_build_error(status: StatusCode, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}
