//! Method and path dispatch for the app's handful of routes.
//!
//! Patterns are either exact (`/test`) or a prefix wildcard (`/mangadex/*`),
//! which captures the rest of the path: `/mangadex/manga/42/feed` gives
//! `wildcard → "/manga/42/feed"`.
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so `/test/` and
//! `/test` are treated as equivalent. Wildcard tails keep theirs: the proxy strips
//! slashes itself when it builds the cache key.
//!
//! Registration order decides ties.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// A registered handler after erasure.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Anything callable as `async fn(Context) -> Response` that can be shared
/// across tasks. Closures get it from the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    // Prefix without the trailing `/*`.
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    /// A `/*` suffix makes a wildcard; anything else matches exactly.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);
        match pattern.strip_suffix("/*") {
            Some(prefix) => Pattern::Wildcard(prefix.to_string()),
            None => Pattern::Exact(pattern.to_string()),
        }
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        match self {
            Pattern::Exact(p) => (p == trim_trailing_slash(path)).then(PathParams::new),
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                // `/mangadex/*` must not swallow `/mangadexfoo`.
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert(PathParams::WILDCARD.to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// Dispatches requests to the first route matching both method and path.
///
/// When no route matches the path, a `404 Not Found` is returned; when the
/// path matches but only under other methods, a `405 Method Not Allowed`
/// with an `Allow` header is returned instead.
///
/// # Examples
///
/// ```rust,no_run
/// use mangaproxy::{Router, Response, StatusCode, context::Context};
///
/// let mut router = Router::new();
///
/// router.get("/test", |_ctx: Context| async { Response::new(StatusCode::OK) });
///
/// router.get("/mangadex/*", |ctx: Context| async move {
///     let tail = ctx.params().wildcard().unwrap_or_default().to_owned();
///     Response::new(StatusCode::OK).body(tail)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `GET` requests whose path matches `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method: Method::Get,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub async fn route(&self, request: Request) -> Response {
        let mut allowed: Vec<&str> = Vec::new();

        for route in &self.routes {
            let Some(params) = route.pattern.matches(request.path()) else {
                continue;
            };
            if &route.method == request.method() {
                let ctx = Context::with_params(request, params);
                return (route.handler)(ctx).await;
            }
            if !allowed.contains(&route.method.as_str()) {
                allowed.push(route.method.as_str());
            }
        }

        if allowed.is_empty() {
            Response::json(
                StatusCode::NOT_FOUND,
                &serde_json::json!({ "error": "Not Found" }),
            )
        } else {
            Response::json(
                StatusCode::METHOD_NOT_ALLOWED,
                &serde_json::json!({ "error": "Method Not Allowed" }),
            )
            .header("Allow", allowed.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Request;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    // ── Pattern::parse ────────────────────────────────────────────────────────

    #[test]
    fn pattern_parse_root() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
    }

    #[test]
    fn pattern_parse_trailing_slash_stripped() {
        assert!(matches!(Pattern::parse("/test/"), Pattern::Exact(s) if s == "/test"));
    }

    #[test]
    fn pattern_parse_wildcard() {
        assert!(matches!(
            Pattern::parse("/mangadex/*"),
            Pattern::Wildcard(s) if s == "/mangadex"
        ));
    }

    // ── Pattern::matches ──────────────────────────────────────────────────────

    #[test]
    fn pattern_exact_match() {
        let pat = Pattern::parse("/test");
        assert!(pat.matches("/test").is_some());
        assert!(pat.matches("/test/").is_some());
        assert!(pat.matches("/other").is_none());
    }

    #[test]
    fn pattern_wildcard_keeps_tail_verbatim() {
        let pat = Pattern::parse("/mangadex/*");
        let params = pat.matches("/mangadex/manga/42/feed/").unwrap();
        assert_eq!(params.wildcard(), Some("/manga/42/feed/"));
    }

    #[test]
    fn pattern_wildcard_respects_segment_boundary() {
        let pat = Pattern::parse("/mangadex/*");
        assert!(pat.matches("/mangadexfoo/manga").is_none());
        assert_eq!(pat.matches("/mangadex").unwrap().wildcard(), Some(""));
    }

    // ── Router ────────────────────────────────────────────────────────────────

    #[test]
    fn router_len_increments_on_add() {
        let mut router = Router::new();
        assert!(router.is_empty());
        router.get("/a", |_ctx: Context| async { Response::new(StatusCode::OK) });
        router.get("/b/*", |_ctx: Context| async {
            Response::new(StatusCode::NO_CONTENT)
        });
        assert_eq!(router.len(), 2);
    }

    #[tokio::test]
    async fn router_unregistered_path_returns_404() {
        let mut router = Router::new();
        router.get("/test", |_ctx: Context| async { Response::new(StatusCode::OK) });
        let res = router.route(make_request("GET", "/nope")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn router_wrong_method_returns_405() {
        let mut router = Router::new();
        router.get("/mangadex/*", |_ctx: Context| async { Response::new(StatusCode::OK) });
        let res = router.route(make_request("POST", "/mangadex/manga")).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers().get("allow"), Some("GET"));
    }

    #[tokio::test]
    async fn router_first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/path", |_ctx: Context| async { Response::new(StatusCode::OK) });
        router.get("/path", |_ctx: Context| async { Response::new(StatusCode::NO_CONTENT) });
        let res = router.route(make_request("GET", "/path")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn router_wildcard_route_receives_tail() {
        let mut router = Router::new();
        router.get("/mangadex/*", |ctx: Context| async move {
            let tail = ctx.params().wildcard().unwrap_or_default().to_owned();
            Response::new(StatusCode::OK).body(tail)
        });
        let res = router
            .route(make_request("GET", "/mangadex/at-home/server/abc"))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body_bytes().as_ref(), b"/at-home/server/abc");
    }
}
