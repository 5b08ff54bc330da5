//! Layers that run around the router.
//!
//! The app stack is `LoggerMiddleware`, then `CorsMiddleware`, then routing.
//! Each layer receives a [`Next`] and either calls it or answers on its own.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Response, StatusCode, context::Context};

/// The rest of the stack for one request. [`run`](Self::run) takes `self`,
/// so a layer can call downstream at most once.
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use mangaproxy::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
}

/// One layer of the stack, erased to a shared closure.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Positions a cursor at the top of `middlewares`.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Calls the next layer. Running off the end of the stack is a wiring
    /// bug and answers `500`.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// A layer shared by every connection task.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs method, path, status, cache status, and latency once the downstream
/// handler has produced a response.
///
/// 5xx responses are logged at `warn`, everything else at `info`.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            let elapsed_ms = start.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            let cache = response.headers().get("x-cache").unwrap_or("-");

            if response.status().is_server_error() {
                tracing::warn!(%method, %path, status, cache, elapsed_ms, "request failed");
            } else {
                tracing::info!(%method, %path, status, cache, elapsed_ms, "request served");
            }

            response
        })
    }
}
