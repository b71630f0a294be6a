use super::registry::Registry;
use kt_protocol::{EventType, NotificationEvent, Task};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("send to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Pushes [`NotificationEvent`]s to registered endpoints.
///
/// Shares its socket with the UDP listener so replies and notifications
/// leave from the same port.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Registry,
    socket: Arc<UdpSocket>,
}

impl Dispatcher {
    pub fn new(registry: Registry, socket: Arc<UdpSocket>) -> Self {
        Dispatcher { registry, socket }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Send one event to `user_id` if it is registered.
    ///
    /// Returns `true` when a datagram was sent. An unregistered user and a
    /// failed send both return `false`; failures are logged, never raised.
    pub async fn notify(&self, user_id: i64, event_type: EventType, task: Option<&Task>) -> bool {
        let Some(addr) = self.registry.lookup(user_id).await else {
            debug!(user_id, event_type = %event_type, "user not registered, skipping notification");
            return false;
        };
        let event = NotificationEvent::new(event_type, task);
        match self.send_event(addr, &event).await {
            Ok(()) => {
                debug!(user_id, event_type = %event_type, peer = %addr, "notification sent");
                true
            }
            Err(e) => {
                warn!(user_id, event_type = %event_type, error = %e, "notification failed");
                false
            }
        }
    }

    /// Send the event to every registered user. Returns how many sends
    /// succeeded.
    pub async fn broadcast(&self, event_type: EventType, task: Option<&Task>) -> usize {
        let mut delivered = 0;
        for (user_id, _) in self.registry.snapshot().await {
            if self.notify(user_id, event_type, task).await {
                delivered += 1;
            }
        }
        delivered
    }

    async fn send_event(
        &self,
        addr: SocketAddr,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(event)?;
        self.socket
            .send_to(&payload, addr)
            .await
            .map_err(|source| NotifyError::Send { addr, source })?;
        Ok(())
    }
}
