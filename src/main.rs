use std::error::Error;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mangaproxy::cache::{CacheStore, MemoryCache, RedisCache};
use mangaproxy::config::{CacheBackend, Config};
use mangaproxy::security::CorsMiddleware;
use mangaproxy::upstream::HttpUpstream;
use mangaproxy::{App, CatalogProxy, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let upstream = HttpUpstream::new(&config.upstream_base_url, config.upstream_timeout)?;
    let mut proxy = CatalogProxy::new(Arc::new(upstream)).with_options(config.proxy_options());
    if let Some(cache) = build_cache(&config).await {
        proxy = proxy.with_cache(cache);
    }

    let cors = CorsMiddleware::new()
        .allow_origins(config.cors_origins.iter().cloned())
        .allow_credentials(true);
    let app = App::new(Arc::new(proxy), cors);

    let server = Server::bind(config.bind_addr()).await?;
    info!(
        upstream = %config.upstream_base_url,
        production = config.production,
        "mangaproxy ready on http://{}",
        server.local_addr()
    );

    server
        .serve(app.into_handler(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}

// A cache that cannot be reached at startup is not fatal: the proxy runs as
// a pass-through instead.
async fn build_cache(config: &Config) -> Option<Arc<dyn CacheStore>> {
    match config.cache_backend {
        CacheBackend::None => {
            info!("caching disabled");
            None
        }
        CacheBackend::Memory => {
            info!("using in-process cache");
            Some(Arc::new(MemoryCache::new()))
        }
        CacheBackend::Redis => {
            let Some(url) = config.redis_url.as_deref() else {
                warn!("REDIS_URL not set, running without a cache");
                return None;
            };
            match RedisCache::connect(url).await {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    warn!(error = %e, "redis unavailable, running without a cache");
                    None
                }
            }
        }
    }
}
