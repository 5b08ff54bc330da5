//! Upstream catalog client.
//!
//! [`Upstream`] is the seam between the proxy and the remote catalog API;
//! [`HttpUpstream`] is the real implementation over `reqwest`. Response
//! bodies stay opaque bytes: the proxy caches and relays them without
//! knowing the catalog's schema.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::http::{Headers, StatusCode};

/// Rate-limit headers relayed from the upstream to the caller.
pub const RATE_LIMIT_HEADERS: [&str; 3] = [
    "X-RateLimit-Limit",
    "X-RateLimit-Remaining",
    "X-RateLimit-Reset",
];

/// A successful (2xx) upstream answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
    /// The subset of [`RATE_LIMIT_HEADERS`] the upstream sent.
    pub rate_limit: Headers,
}

/// Why an upstream call produced no usable response.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection refused, DNS failure, timeout, or a broken body stream.
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream answered with a non-2xx status.
    #[error("upstream responded with {status}")]
    Status { status: StatusCode, body: Bytes },

    /// A 2xx answer whose body could not be relayed as JSON.
    #[error("upstream returned an invalid body: {reason}")]
    InvalidBody { reason: String },
}

impl UpstreamError {
    /// The status the upstream answered with, when it answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().and_then(|s| StatusCode::from_u16(s.as_u16())),
            Self::InvalidBody { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

/// A read-only catalog API reachable by path and query string.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Performs exactly one `GET <base>/<path>[?<query>]`, without retrying.
    ///
    /// `authorization` is forwarded verbatim as the `Authorization` header.
    async fn fetch(
        &self,
        path: &str,
        query: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

/// [`Upstream`] over HTTP(S) with a bounded per-request timeout.
///
/// The client advertises `Accept-Encoding: gzip` and transparently decodes
/// compressed bodies, so cached and relayed bytes are always plain JSON.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    /// Builds a client for `base_url` (e.g. `https://api.mangadex.org`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `<base>/<path>` plus `?<query>` when the query is non-empty.
    pub fn url_for(&self, path: &str, query: Option<&str>) -> String {
        match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{}/{}?{}", self.base_url, path, query),
            None => format!("{}/{}", self.base_url, path),
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(
        &self,
        path: &str,
        query: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.url_for(path, query);
        debug!(%url, "fetching from upstream");

        let mut request = self.client.get(&url);
        if let Some(auth) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);

        let rate_limit: Headers = RATE_LIMIT_HEADERS
            .iter()
            .filter_map(|&name| {
                let value = response.headers().get(name)?.to_str().ok()?;
                Some((name, value.to_owned()))
            })
            .collect();

        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(UpstreamError::Status { status, body });
        }

        Ok(UpstreamResponse {
            status,
            body,
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_building() {
        let up = HttpUpstream::new("https://api.mangadex.org/", Duration::from_secs(10)).unwrap();
        assert_eq!(up.base_url(), "https://api.mangadex.org");
        assert_eq!(
            up.url_for("manga", Some("limit=10&offset=0")),
            "https://api.mangadex.org/manga?limit=10&offset=0"
        );
        assert_eq!(up.url_for("manga/abc", Some("")), "https://api.mangadex.org/manga/abc");
        assert_eq!(up.url_for("manga/abc", None), "https://api.mangadex.org/manga/abc");
    }

    #[test]
    fn status_error_exposes_status() {
        let err = UpstreamError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: Bytes::new(),
        };
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "upstream responded with 429 Too Many Requests");
    }

    #[tokio::test]
    async fn fetch_forwards_query_and_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/manga")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("title".into(), "one piece".into()),
                mockito::Matcher::UrlEncoded("limit".into(), "5".into()),
            ]))
            .match_header("authorization", "Bearer session-token")
            .match_header("accept-encoding", mockito::Matcher::Regex("gzip".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-ratelimit-limit", "40")
            .with_header("x-ratelimit-remaining", "12")
            .with_body(r#"{"result":"ok","data":[]}"#)
            .create_async()
            .await;

        let up = HttpUpstream::new(server.url(), Duration::from_secs(5)).unwrap();
        let res = up
            .fetch("manga", Some("title=one+piece&limit=5"), Some("Bearer session-token"))
            .await
            .unwrap();

        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body.as_ref(), br#"{"result":"ok","data":[]}"#);
        assert_eq!(res.rate_limit.get("X-RateLimit-Limit"), Some("40"));
        assert_eq!(res.rate_limit.get("X-RateLimit-Remaining"), Some("12"));
        assert_eq!(res.rate_limit.get("X-RateLimit-Reset"), None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn gzip_bodies_are_decoded_before_caching() {
        use std::io::Write;

        let body = br#"{"result":"ok","data":[{"id":"a1"}]}"#;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(body).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/manga")
            .match_header("accept-encoding", mockito::Matcher::Regex("gzip".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("content-encoding", "gzip")
            .with_body(compressed)
            .create_async()
            .await;

        let up = HttpUpstream::new(server.url(), Duration::from_secs(5)).unwrap();
        let res = up.fetch("manga", None, None).await.unwrap();
        assert_eq!(res.body.as_ref(), body);
    }

    #[tokio::test]
    async fn fetch_omits_authorization_when_absent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/manga/abc")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let up = HttpUpstream::new(server.url(), Duration::from_secs(5)).unwrap();
        up.fetch("manga/abc", None, None).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error_with_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/manga/missing")
            .with_status(404)
            .with_body(r#"{"result":"error","errors":[{"status":404,"detail":"Manga not found"}]}"#)
            .create_async()
            .await;

        let up = HttpUpstream::new(server.url(), Duration::from_secs(5)).unwrap();
        let err = up.fetch("manga/missing", None, None).await.unwrap_err();
        match err {
            UpstreamError::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert!(String::from_utf8_lossy(&body).contains("Manga not found"));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let up = HttpUpstream::new(format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let err = up.fetch("manga", None, None).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.status(), None);
    }
}
