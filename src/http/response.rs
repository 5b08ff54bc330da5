//! Outbound responses: a small builder plus HTTP/1.1 encoding.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tracing::error;

use super::{Headers, StatusCode};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// A response under construction. Bodies are [`Bytes`] so cached catalog
/// JSON is relayed without copying.
///
/// ```
/// use mangaproxy::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("X-Cache", "MISS")
///     .json_bytes(r#"{"result":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Type: application/json; charset=utf-8\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Empty body, keep-alive.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Adds a header; an existing one with the same name is kept.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// [`header`](Self::header) for middleware holding a `&mut Response`.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Plain-text body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets a body that is already serialized JSON and marks it as such.
    ///
    /// The bytes are relayed verbatim; nothing re-encodes them.
    #[must_use]
    pub fn json_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.headers.set("Content-Type", JSON_CONTENT_TYPE);
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body.
    ///
    /// Serialization failure is logged and turned into a bare `500`; it can
    /// only happen for types with non-string map keys or failing `Serialize` impls.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status).json_bytes(body),
            Err(e) => {
                error!(error = %e, "failed to serialize JSON response body");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers set so far; `Connection` and `Content-Length` are only added on encode.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Encodes the response for the wire.
    ///
    /// `Connection` reflects [`keep_alive`](Self::keep_alive), a non-empty body
    /// without a `Content-Type` is labelled `text/plain`, and `Content-Length`
    /// is always the last header.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", TEXT_CONTENT_TYPE);
        }
        self.headers
            .set("Connection", if self.keep_alive { "keep-alive" } else { "close" });

        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason()
        );
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut buf = BytesMut::with_capacity(head.len() + self.body.len());
        buf.put_slice(head.as_bytes());
        buf.put(self.body);
        buf
    }
}
