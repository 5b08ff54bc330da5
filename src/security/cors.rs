use std::pin::Pin;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// Response headers browsers may read from cross-origin proxy responses.
const EXPOSED_HEADERS: &str =
    "X-Cache, X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset";

/// CORS middleware: validates the `Origin` header, answers preflight requests,
/// and injects `Access-Control-*` headers on actual responses.
///
/// # Behavior
///
/// - Without an `Origin` header, or with one outside the allow-list, the request
///   passes through unmodified.
/// - `OPTIONS` preflight requests from an allowed origin are short-circuited
///   with `204 No Content`; the downstream handler is **not** called.
/// - When credentials are allowed the concrete origin is always echoed back,
///   since browsers reject `*` on credentialed requests. `Vary: Origin` is added
///   whenever the echoed value depends on the request.
///
/// # Examples
///
/// ```rust
/// use mangaproxy::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::new()
///     .allow_origin("http://localhost:3000")
///     .allow_credentials(true);
/// ```
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    allow_credentials: bool,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsMiddleware {
    /// Creates a middleware with no allowed origins, methods
    /// `GET, POST, PUT, DELETE` and headers `Content-Type, Authorization`.
    pub fn new() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "DELETE"]
                .map(String::from)
                .to_vec(),
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            allow_credentials: false,
        }
    }

    /// Adds an allowed origin. `"*"` permits every origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Adds every origin in `origins`.
    #[must_use]
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins
            .extend(origins.into_iter().map(Into::into));
        self
    }

    /// Sends `Access-Control-Allow-Credentials: true` on allowed responses.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    // Returns the value to echo in `Access-Control-Allow-Origin`, or `None` if rejected.
    fn resolve_origin(&self, origin: &str) -> Option<String> {
        let wildcard = self.allowed_origins.iter().any(|o| o == "*");
        if wildcard && !self.allow_credentials {
            Some("*".to_owned())
        } else if wildcard || self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }

    fn decorate(&self, resp: &mut Response, allow_origin: &str) {
        resp.add_header("Access-Control-Allow-Origin", allow_origin);
        resp.add_header("Access-Control-Allow-Methods", self.allowed_methods.join(", "));
        resp.add_header("Access-Control-Allow-Headers", self.allowed_headers.join(", "));
        if self.allow_credentials {
            resp.add_header("Access-Control-Allow-Credentials", "true");
        }
        if allow_origin != "*" {
            resp.add_header("Vary", "Origin");
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let allow_origin = ctx
            .request()
            .headers()
            .get("origin")
            .and_then(|origin| self.resolve_origin(origin));

        let Some(allow_origin) = allow_origin else {
            return Box::pin(next.run(ctx));
        };

        if ctx.request().method() == &Method::Options {
            let mut resp = Response::new(StatusCode::NO_CONTENT)
                .header("Access-Control-Max-Age", "3600");
            self.decorate(&mut resp, &allow_origin);
            return Box::pin(async move { resp });
        }

        // Build the decorated headers up front so the future does not borrow `self`.
        let mut template = Response::new(StatusCode::OK);
        self.decorate(&mut template, &allow_origin);
        template.add_header("Access-Control-Expose-Headers", EXPOSED_HEADERS);

        Box::pin(async move {
            let mut resp = next.run(ctx).await;
            for (name, value) in template.headers().iter() {
                resp.add_header(name, value);
            }
            resp
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        Request,
        middleware::{MiddlewareHandler, from_middleware},
    };

    fn request(method: &str, origin: Option<&str>) -> Context {
        let origin = origin
            .map(|o| format!("Origin: {o}\r\n"))
            .unwrap_or_default();
        let raw = format!("{method} /mangadex/manga HTTP/1.1\r\nHost: x\r\n{origin}\r\n");
        Context::new(Request::parse(raw.as_bytes()).unwrap().0)
    }

    async fn run(cors: CorsMiddleware, ctx: Context) -> Response {
        let terminal: MiddlewareHandler = Arc::new(|_ctx: Context, _next: Next| {
            Box::pin(async { Response::new(StatusCode::OK).body("handled") })
                as Pin<Box<dyn Future<Output = Response> + Send>>
        });
        let stack: Arc<[MiddlewareHandler]> =
            Arc::from(vec![from_middleware(Arc::new(cors)), terminal]);
        Next::new(stack).run(ctx).await
    }

    fn frontend_cors() -> CorsMiddleware {
        CorsMiddleware::new()
            .allow_origin("http://localhost:3000")
            .allow_credentials(true)
    }

    #[tokio::test]
    async fn no_origin_passes_through() {
        let res = run(frontend_cors(), request("GET", None)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn unknown_origin_gets_no_cors_headers() {
        let res = run(frontend_cors(), request("GET", Some("https://evil.example"))).await;
        assert_eq!(res.body_bytes().as_ref(), b"handled");
        assert!(!res.headers().contains("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let res = run(frontend_cors(), request("OPTIONS", Some("http://localhost:3000"))).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.body_bytes().is_empty());
        assert_eq!(
            res.headers().get("access-control-allow-origin"),
            Some("http://localhost:3000")
        );
        assert_eq!(
            res.headers().get("access-control-allow-headers"),
            Some("Content-Type, Authorization")
        );
        assert_eq!(res.headers().get("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn allowed_request_is_decorated() {
        let res = run(frontend_cors(), request("GET", Some("http://localhost:3000"))).await;
        assert_eq!(res.body_bytes().as_ref(), b"handled");
        assert_eq!(res.headers().get("access-control-allow-credentials"), Some("true"));
        assert_eq!(
            res.headers().get("access-control-expose-headers"),
            Some(EXPOSED_HEADERS)
        );
    }

    #[tokio::test]
    async fn wildcard_with_credentials_echoes_origin() {
        let cors = CorsMiddleware::new().allow_origin("*").allow_credentials(true);
        let res = run(cors, request("GET", Some("https://reader.example"))).await;
        assert_eq!(
            res.headers().get("access-control-allow-origin"),
            Some("https://reader.example")
        );
    }

    #[tokio::test]
    async fn wildcard_without_credentials_sends_star() {
        let cors = CorsMiddleware::new().allow_origin("*");
        let res = run(cors, request("GET", Some("https://reader.example"))).await;
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
        assert!(!res.headers().contains("vary"));
    }
}
