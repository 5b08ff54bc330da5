//! The TCP front door: one Tokio task per connection, HTTP/1.1 keep-alive
//! and pipelining, and an accept loop that stops on a shutdown signal.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request head + body we buffer before answering 413. The proxy only
/// serves GETs, so anything near this is abuse.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener waiting for a handler.
///
/// # Examples
///
/// ```rust,no_run
/// use mangaproxy::server::Server;
/// use mangaproxy::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:5001").await?;
///     server
///         .serve(
///             |_req| async { Response::new(StatusCode::OK).body("ok") },
///             async { let _ = tokio::signal::ctrl_c().await; },
///         )
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds `addr`; port `0` picks a free one, see [`local_addr`](Self::local_addr).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches requests to `handler` until
    /// `shutdown` resolves.
    ///
    /// Connections already in flight are left to finish on their own tasks;
    /// only the accept loop stops.
    pub async fn serve<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "listening");

        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

// Serves requests off one connection until the peer hangs up, asks for
// `Connection: close`, or sends something unparsable.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // A pipelining client may have sent the next request already.
        let parsed = if buf.is_empty() {
            Err(RequestError::Incomplete)
        } else {
            Request::parse(&buf)
        };

        let (request, head_len) = match parsed {
            Ok(parsed) => parsed,
            Err(RequestError::Incomplete) if buf.len() > MAX_REQUEST_SIZE => {
                warn!(%peer, buffered = buf.len(), "request head too large");
                return reject(&mut stream, too_large()).await;
            }
            Err(RequestError::Incomplete) => {
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(%peer, "peer closed the connection");
                    return Ok(());
                }
                continue;
            }
            Err(e) => {
                warn!(%peer, error = %e, "malformed request");
                let response =
                    Response::new(StatusCode::BAD_REQUEST).body(format!("Bad Request: {e}"));
                return reject(&mut stream, response).await;
            }
        };

        let declared = request.content_length().unwrap_or(0);
        let frame_len = match head_len.checked_add(declared) {
            Some(len) if len <= MAX_REQUEST_SIZE => len,
            _ => {
                warn!(%peer, declared, "request body too large");
                return reject(&mut stream, too_large()).await;
            }
        };
        if buf.len() < frame_len {
            if stream.read_buf(&mut buf).await? == 0 {
                debug!(%peer, "peer closed the connection mid-body");
                return Ok(());
            }
            continue;
        }

        let keep_alive = request.is_keep_alive();
        debug!(%peer, method = %request.method(), path = %request.path(), "dispatching");

        let response = handler(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;
        buf.advance(frame_len);

        if !keep_alive {
            return Ok(());
        }
    }
}

fn too_large() -> Response {
    Response::new(StatusCode::PAYLOAD_TOO_LARGE).body("Request entity too large")
}

// Writes a final response and ends the connection.
async fn reject(stream: &mut TcpStream, response: Response) -> Result<(), std::io::Error> {
    stream
        .write_all(&response.keep_alive(false).into_bytes())
        .await?;
    stream.flush().await
}
