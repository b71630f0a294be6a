use super::control;
use super::registry::Registry;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, warn};

/// Receive buffer size; longer datagrams are truncated by the OS.
pub const RECV_BUFFER_BYTES: usize = 1024;

/// Single receive loop for control datagrams.
///
/// Runs until `shutdown` flips to `true` (or its sender is dropped). A bad
/// datagram or a failed reply never ends the loop.
pub async fn run_listener(
    socket: Arc<UdpSocket>,
    registry: Registry,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_BYTES];
    loop {
        let received = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let (n, peer) = match received {
            Ok(v) => v,
            Err(e) => {
                // ICMP port-unreachable from an earlier send surfaces here on some platforms.
                warn!(error = %e, "udp receive failed");
                continue;
            }
        };

        let text = String::from_utf8_lossy(&buf[..n]);
        if let Some(reply) = control::process(&registry, text.trim(), peer).await {
            if let Err(e) = socket.send_to(reply.encode().as_bytes(), peer).await {
                warn!(peer = %peer, error = %e, "control reply failed");
            }
        }
    }
    info!("udp listener stopped");
}
