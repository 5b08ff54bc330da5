//! # mangaproxy
//!
//! A read-through caching proxy in front of a manga catalog API.
//!
//! Browsers call `GET /mangadex/<path>?<query>`; the proxy derives an
//! order-independent cache key, answers from Redis when it can, and otherwise
//! forwards the call upstream, caches the JSON for an hour, and relays the
//! upstream's rate-limit headers. A missing or broken cache never fails a
//! request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mangaproxy::{App, CatalogProxy, Server};
//! use mangaproxy::cache::MemoryCache;
//! use mangaproxy::security::CorsMiddleware;
//! use mangaproxy::upstream::HttpUpstream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let upstream = HttpUpstream::new("https://api.mangadex.org", Duration::from_secs(10))?;
//!     let proxy = CatalogProxy::new(Arc::new(upstream)).with_cache(Arc::new(MemoryCache::new()));
//!     let app = App::new(Arc::new(proxy), CorsMiddleware::new().allow_origin("*"));
//!
//!     Server::bind("127.0.0.1:5001")
//!         .await?
//!         .serve(app.into_handler(), async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

// ── HTTP plumbing ─────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;

// ── Catalog proxy ─────────────────────────────────────────────────────────────
pub mod app;
pub mod cache;
pub mod config;
pub mod proxy;
pub mod upstream;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::App;
pub use config::Config;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::{CacheStatus, CatalogProxy, ProxyError, ProxyRequest, ProxyResponse};
pub use router::Router;
pub use server::{Server, ServerError};
