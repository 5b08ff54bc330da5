//! Wires the router and middleware stack into a single request handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::context::Context;
use crate::middleware::{LoggerMiddleware, MiddlewareHandler, Next, from_middleware};
use crate::proxy::CatalogProxy;
use crate::security::CorsMiddleware;
use crate::{Request, Response, Router, StatusCode};

/// Where the catalog proxy is mounted; `/mangadex/manga` proxies `<upstream>/manga`.
pub const PROXY_MOUNT: &str = "/mangadex";

/// The complete HTTP application: logging, CORS, then routing.
#[derive(Clone)]
pub struct App {
    stack: Arc<[MiddlewareHandler]>,
}

impl App {
    pub fn new(proxy: Arc<CatalogProxy>, cors: CorsMiddleware) -> Self {
        let router = Arc::new(routes(proxy));
        let dispatch: MiddlewareHandler = Arc::new(move |ctx: Context, _next: Next| {
            let router = Arc::clone(&router);
            Box::pin(async move { router.route(ctx.into_request()).await })
                as Pin<Box<dyn Future<Output = Response> + Send>>
        });

        Self {
            stack: Arc::from(vec![
                from_middleware(Arc::new(LoggerMiddleware)),
                from_middleware(Arc::new(cors)),
                dispatch,
            ]),
        }
    }

    /// Runs one request through the whole stack.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.stack))
            .run(Context::new(request))
            .await
    }

    /// Adapts the app to the handler shape [`Server::serve`](crate::Server::serve) expects.
    pub fn into_handler(
        self,
    ) -> impl Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static
    {
        move |request| {
            let app = self.clone();
            Box::pin(async move { app.handle(request).await })
        }
    }
}

fn routes(proxy: Arc<CatalogProxy>) -> Router {
    let mut router = Router::new();

    let cached = proxy.has_cache();
    router.get(&format!("{PROXY_MOUNT}/*"), move |ctx: Context| {
        let proxy = Arc::clone(&proxy);
        async move { proxy.handle(ctx).await }
    });

    router.get("/", |_ctx: Context| async {
        Response::new(StatusCode::OK).body("Server is running")
    });

    router.get("/test", |_ctx: Context| async {
        Response::json(StatusCode::OK, &json!({ "message": "Test route is working" }))
    });

    router.get("/health", move |_ctx: Context| async move {
        Response::json(StatusCode::OK, &json!({ "status": "ok", "cache": cached }))
    });

    router
}
