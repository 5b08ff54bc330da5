//! The read-through catalog proxy.
//!
//! [`CatalogProxy::fetch_catalog_resource`] turns a [`ProxyRequest`] into a
//! cache key, serves a cached body when one exists, and otherwise makes a
//! single upstream call and stores its JSON for the configured TTL.
//!
//! The cache is strictly optional. Every cache problem (store down, read or
//! write error, corrupt entry) is logged, recorded as a [`CacheFault`] on the
//! response, and otherwise ignored: with no usable store the proxy is a plain
//! pass-through.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::IgnoredAny;
use tracing::{debug, error, warn};
use url::form_urlencoded;

use crate::cache::{CacheError, CacheKey, CacheStore, normalize_path};
use crate::context::Context;
use crate::http::{Headers, Request, Response, StatusCode};
use crate::upstream::{Upstream, UpstreamError};

mod error;

pub use error::{DEFAULT_ERROR_MESSAGE, ErrorBody, ProxyError};

/// Cache-store namespace prepended to every key.
pub const DEFAULT_NAMESPACE: &str = "mangadex";

/// How long a fetched body stays cached.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// One inbound catalog call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyRequest {
    /// Upstream resource path, e.g. `manga/{id}/feed`. Slashes at either end are ignored.
    pub path: String,
    /// Decoded query pairs in arrival order; keys may repeat.
    pub query: Vec<(String, String)>,
    /// The query string exactly as received, forwarded upstream untouched.
    pub raw_query: Option<String>,
    /// `Authorization` header value, forwarded without inspection.
    pub authorization: Option<String>,
}

impl ProxyRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the query from a raw query string (without the `?`).
    #[must_use]
    pub fn with_raw_query(mut self, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        self.query = form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        self.raw_query = Some(raw);
        self
    }

    /// Sets the query from decoded pairs, encoding them in the given order.
    #[must_use]
    pub fn with_query<K, V>(mut self, pairs: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.query = pairs
            .iter()
            .map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_owned()))
            .collect();
        self.raw_query = Some(
            form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.query)
                .finish(),
        );
        self
    }

    #[must_use]
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Builds a proxy request from an inbound HTTP request whose resource
    /// path (below the proxy's mount point) is `path`.
    pub fn from_http(path: &str, request: &Request) -> Self {
        Self {
            path: path.to_owned(),
            query: request.query_pairs().to_vec(),
            raw_query: request.query_string().map(str::to_owned),
            authorization: request.headers().get("authorization").map(str::to_owned),
        }
    }

    /// The cache key this request maps to under `namespace`.
    pub fn cache_key(&self, namespace: &str) -> CacheKey {
        CacheKey::derive(namespace, &self.path, &self.query)
    }
}

/// Whether a response came from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// Value of the `X-Cache` response header.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// A cache problem that was absorbed instead of failing the request.
#[derive(Debug)]
pub enum CacheFault {
    Read(CacheError),
    Corrupt { reason: String },
    Write(CacheError),
}

/// A successfully served catalog call.
#[derive(Debug)]
pub struct ProxyResponse {
    pub key: CacheKey,
    pub body: Bytes,
    pub cache_status: CacheStatus,
    /// Relayed upstream rate-limit headers; empty on a hit.
    pub rate_limit: Headers,
    pub faults: Vec<CacheFault>,
}

impl ProxyResponse {
    /// Converts into the outbound HTTP response: the JSON body verbatim,
    /// `X-Cache`, and any relayed rate-limit headers.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(StatusCode::OK)
            .json_bytes(self.body)
            .header("X-Cache", self.cache_status.as_str());
        for (name, value) in self.rate_limit.iter() {
            response.add_header(name, value);
        }
        response
    }
}

/// Tunables for [`CatalogProxy`].
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub namespace: String,
    pub ttl: Duration,
    /// Include internal error text in error bodies. Off in production.
    pub expose_error_details: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            ttl: DEFAULT_TTL,
            expose_error_details: false,
        }
    }
}

/// Read-through cache in front of an [`Upstream`] catalog.
///
/// Holds no per-request state; one instance is shared by every connection.
pub struct CatalogProxy {
    upstream: Arc<dyn Upstream>,
    cache: Option<Arc<dyn CacheStore>>,
    options: ProxyOptions,
}

impl CatalogProxy {
    /// A pass-through proxy with default options and no cache.
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            cache: None,
            options: ProxyOptions::default(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ProxyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Serves one catalog call.
    ///
    /// At most one upstream request is made. Only an unusable path or an
    /// upstream failure produces an error; a non-2xx upstream answer is never
    /// cached.
    pub async fn fetch_catalog_resource(
        &self,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse, ProxyError> {
        let path = normalize_path(&request.path);
        validate_path(path)?;

        let key = request.cache_key(&self.options.namespace);
        let mut faults = Vec::new();

        if let Some(cache) = &self.cache {
            match lookup(cache.as_ref(), &key).await {
                Ok(Some(body)) => {
                    debug!(%key, "cache hit");
                    return Ok(ProxyResponse {
                        key,
                        body,
                        cache_status: CacheStatus::Hit,
                        rate_limit: Headers::new(),
                        faults,
                    });
                }
                Ok(None) => debug!(%key, "cache miss"),
                Err(fault) => faults.push(fault),
            }
        }

        let upstream = self
            .upstream
            .fetch(
                path,
                request.raw_query.as_deref(),
                request.authorization.as_deref(),
            )
            .await
            .and_then(|response| {
                validate_json(&response.body)?;
                Ok(response)
            })
            .map_err(|e| {
                error!(%key, error = %e, timeout = e.is_timeout(), "upstream catalog request failed");
                ProxyError::from(e)
            })?;

        if let Some(cache) = &self.cache {
            let body = String::from_utf8_lossy(&upstream.body);
            if let Err(e) = cache.set_with_expiry(key.as_str(), &body, self.options.ttl).await {
                warn!(%key, error = %e, "cache write failed, serving uncached");
                faults.push(CacheFault::Write(e));
            }
        }

        Ok(ProxyResponse {
            key,
            body: upstream.body,
            cache_status: CacheStatus::Miss,
            rate_limit: upstream.rate_limit,
            faults,
        })
    }

    /// Route handler for `GET <mount>/*`: the wildcard tail is the upstream path.
    pub async fn handle(&self, ctx: Context) -> Response {
        let path = ctx.params().wildcard().unwrap_or_default();
        let request = ProxyRequest::from_http(path, ctx.request());

        match self.fetch_catalog_resource(&request).await {
            Ok(served) => served.into_response(),
            Err(e) => e.into_response(self.options.expose_error_details),
        }
    }
}

// `Ok(None)` is a clean miss; `Err` is a miss caused by a cache problem.
async fn lookup(cache: &dyn CacheStore, key: &CacheKey) -> Result<Option<Bytes>, CacheFault> {
    let stored = cache.get(key.as_str()).await.map_err(|e| {
        warn!(%key, error = %e, "cache read failed, falling back to upstream");
        CacheFault::Read(e)
    })?;

    let Some(stored) = stored else {
        return Ok(None);
    };

    let body = Bytes::from(stored);
    validate_json(&body).map_err(|e| {
        warn!(%key, error = %e, "corrupt cache entry, refetching");
        CacheFault::Corrupt {
            reason: e.to_string(),
        }
    })?;
    Ok(Some(body))
}

fn validate_json(body: &[u8]) -> Result<(), UpstreamError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(UpstreamError::InvalidBody {
            reason: "empty body".to_owned(),
        });
    }
    serde_json::from_slice::<IgnoredAny>(body)
        .map(|_| ())
        .map_err(|e| UpstreamError::InvalidBody {
            reason: e.to_string(),
        })
}

// Rejects paths that cannot name an upstream resource or that would let the
// URL parser climb out of the catalog's path space.
fn validate_path(path: &str) -> Result<(), ProxyError> {
    if path.is_empty() {
        return Err(ProxyError::InvalidPath {
            reason: "empty resource path",
        });
    }
    if path.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ProxyError::InvalidPath {
            reason: "control or whitespace characters in path",
        });
    }
    // The query travels separately; a `?` or `#` here would fold it into the
    // path half of the cache key.
    if path.contains(['?', '#']) {
        return Err(ProxyError::InvalidPath {
            reason: "query or fragment delimiter in path",
        });
    }
    let is_dot_segment = |segment: &str| {
        let lowered = segment.to_ascii_lowercase().replace("%2e", ".");
        lowered == "." || lowered == ".."
    };
    if path.split('/').any(is_dot_segment) {
        return Err(ProxyError::InvalidPath {
            reason: "dot segments are not allowed",
        });
    }
    if path.split('/').any(str::is_empty) {
        return Err(ProxyError::InvalidPath {
            reason: "empty path segment",
        });
    }
    Ok(())
}
