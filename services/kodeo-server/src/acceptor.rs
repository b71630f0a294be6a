use crate::http::read_request;
use crate::router::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Per-connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Serve further requests on the same connection until the client sends
    /// `Connection: close` or disconnects.
    pub keep_alive: bool,
    pub max_body_bytes: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            keep_alive: false,
            max_body_bytes: crate::http::request::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Accept connections until `shutdown` flips to `true`, spawning one task
/// per connection.
pub async fn run_acceptor(
    listener: TcpListener,
    router: Arc<Router>,
    options: ConnectionOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            r = listener.accept() => r,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "connection accepted");
                let router = router.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, router, options).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                // Back off briefly so fd exhaustion does not spin the loop.
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    info!("tcp acceptor stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<Router>,
    options: ConnectionOptions,
) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let req = match read_request(&mut reader, options.max_body_bytes).await {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(e) => {
                warn!(peer = %peer, error = %e, "dropping connection after bad request");
                break;
            }
        };

        let close = !options.keep_alive || req.wants_close();
        let mut resp = router.handle(&req).await;
        resp.set_header("Connection", if close { "close" } else { "keep-alive" });
        info!(
            peer = %peer,
            method = %req.method,
            path = %req.path,
            status = resp.status(),
            "request handled"
        );

        if let Err(e) = resp.write_to(&mut writer).await {
            debug!(peer = %peer, error = %e, "write failed");
            break;
        }
        if close {
            break;
        }
    }
    let _ = writer.shutdown().await;
}
