//! Inbound request head parsing on top of [`httparse`].

use bytes::Bytes;
use thiserror::Error;
use url::form_urlencoded;

use super::{Headers, Method};

#[derive(Debug, Error)]
pub enum RequestError {
    /// The buffer ends before the blank line that closes the head.
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request line is missing its {field}")]
    MissingField { field: &'static str },
}

/// One inbound HTTP/1.x request.
///
/// The query string is kept twice: verbatim, so it can be forwarded upstream
/// untouched, and as an ordered list of decoded pairs, so repeated keys such
/// as `includes[]=cover_art&includes[]=author` survive for cache-key
/// derivation.
///
/// ```
/// use mangaproxy::http::request::Request;
///
/// let raw = b"GET /mangadex/manga?limit=10&title=one+piece HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/mangadex/manga");
/// assert_eq!(request.query_param("title"), Some("one piece"));
/// assert_eq!(request.query_string(), Some("limit=10&title=one+piece"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    minor_version: u8,
    headers: Headers,
    query: Option<String>,
    query_pairs: Vec<(String, String)>,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// On success returns the request together with the offset of the first
    /// body byte. Whatever follows the head in `buf` is copied in as the body;
    /// the caller decides from `Content-Length` whether it has all of it.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);

        let httparse::Status::Complete(body_offset) = head.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let method = head
            .method
            .map(Method::from_token)
            .ok_or(RequestError::MissingField { field: "method" })?;
        let target = head
            .path
            .ok_or(RequestError::MissingField { field: "target" })?;
        let minor_version = head
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let (path, query) = split_target(target);
        let headers = head
            .headers
            .iter()
            .filter_map(|h| Some((h.name, std::str::from_utf8(h.value).ok()?)))
            .collect();

        let request = Self {
            method,
            path: path.to_owned(),
            minor_version,
            headers,
            query_pairs: query.map(decode_pairs).unwrap_or_default(),
            query: query.map(str::to_owned),
            body: Bytes::copy_from_slice(&buf[body_offset..]),
        };
        Ok((request, body_offset))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path component of the request target, still percent-encoded.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `0` for HTTP/1.0, `1` for HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.minor_version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The query exactly as received, without the `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Decoded query pairs in arrival order, repeats included.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query_pairs
    }

    /// First decoded value for `key`.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_pairs
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// HTTP/1.1 connections persist unless the client sends `Connection: close`;
    /// HTTP/1.0 ones only persist on an explicit `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        self.headers
            .get("connection")
            .map_or(self.minor_version == 1, |c| {
                c.eq_ignore_ascii_case("keep-alive")
            })
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

// `a=1&&b=2` yields two pairs; `flag` alone yields `("flag", "")`.
fn decode_pairs(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
