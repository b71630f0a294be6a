use super::registry::Registry;
use kt_protocol::{ControlMessage, ControlParseError, ControlReply};
use std::net::SocketAddr;
use tracing::{info, warn};

pub const INVALID_USER_ID: &str = "Invalid userId";

/// Apply one control datagram to the registry.
///
/// Returns the reply to send back to `peer`, or `None` for unrecognized
/// input (which gets no reply).
pub async fn process(registry: &Registry, text: &str, peer: SocketAddr) -> Option<ControlReply> {
    match ControlMessage::parse(text) {
        Ok(ControlMessage::Register(user_id)) => {
            registry.register(user_id, peer).await;
            let registered = registry.len().await;
            info!(user_id, peer = %peer, registered, "client registered");
            Some(ControlReply::Registered)
        }
        Ok(ControlMessage::Unregister(user_id)) => {
            registry.unregister(user_id).await;
            let registered = registry.len().await;
            info!(user_id, peer = %peer, registered, "client unregistered");
            Some(ControlReply::Unregistered)
        }
        Ok(ControlMessage::Ping) => Some(ControlReply::Pong),
        Err(ControlParseError::InvalidUserId(raw)) => {
            warn!(peer = %peer, user_id = %raw, "control message with invalid user id");
            Some(ControlReply::Error(INVALID_USER_ID.to_owned()))
        }
        Err(ControlParseError::Unrecognized(raw)) => {
            warn!(peer = %peer, message = %raw, "unrecognized control message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9000))
    }

    #[tokio::test]
    async fn register_stores_sender_address() {
        let registry = Registry::new();
        let reply = process(&registry, "REGISTER:7", peer()).await;
        assert_eq!(reply, Some(ControlReply::Registered));
        assert_eq!(registry.lookup(7).await, Some(peer()));
    }

    #[tokio::test]
    async fn unregister_removes_and_confirms() {
        let registry = Registry::new();
        registry.register(7, peer()).await;
        let reply = process(&registry, "UNREGISTER:7\n", peer()).await;
        assert_eq!(reply, Some(ControlReply::Unregistered));
        assert_eq!(registry.lookup(7).await, None);
    }

    #[tokio::test]
    async fn unregister_of_unknown_user_still_confirms() {
        let registry = Registry::new();
        let reply = process(&registry, "UNREGISTER:99", peer()).await;
        assert_eq!(reply, Some(ControlReply::Unregistered));
    }

    #[tokio::test]
    async fn ping_does_not_touch_registry() {
        let registry = Registry::new();
        assert_eq!(process(&registry, "PING", peer()).await, Some(ControlReply::Pong));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn bad_user_id_replies_error() {
        let registry = Registry::new();
        for text in ["REGISTER:abc", "UNREGISTER:", "REGISTER:99999999999999999999"] {
            let reply = process(&registry, text, peer()).await;
            assert_eq!(
                reply.map(|r| r.encode()).as_deref(),
                Some("ERROR:Invalid userId"),
                "input {text:?}"
            );
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_command_gets_no_reply() {
        let registry = Registry::new();
        assert_eq!(process(&registry, "HELLO", peer()).await, None);
        assert_eq!(process(&registry, "", peer()).await, None);
    }
}
