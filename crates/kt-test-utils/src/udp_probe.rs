use kt_protocol::{ControlMessage, NotificationEvent};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// A loopback UDP endpoint standing in for a notification subscriber.
pub struct UdpProbe {
    socket: UdpSocket,
}

impl UdpProbe {
    pub async fn bind() -> std::io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        Ok(UdpProbe { socket })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket
            .local_addr()
            .expect("local_addr always succeeds after bind")
    }

    pub async fn send(&self, to: SocketAddr, text: &str) -> std::io::Result<()> {
        self.socket.send_to(text.as_bytes(), to).await?;
        Ok(())
    }

    /// Send a control message and wait for the reply text.
    pub async fn request(&self, to: SocketAddr, text: &str, wait: Duration) -> Option<String> {
        self.send(to, text).await.ok()?;
        self.recv_text(wait).await
    }

    /// Send an encoded control message and wait for the reply text.
    pub async fn control(
        &self,
        to: SocketAddr,
        message: &ControlMessage,
        wait: Duration,
    ) -> Option<String> {
        self.request(to, &message.encode(), wait).await
    }

    /// Next datagram as text, or `None` if nothing arrives within `wait`.
    pub async fn recv_text(&self, wait: Duration) -> Option<String> {
        let mut buf = vec![0u8; 65_536];
        match timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, _from))) => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
            _ => None,
        }
    }

    /// Next datagram decoded as a notification.
    pub async fn recv_event(&self, wait: Duration) -> Option<NotificationEvent> {
        let text = self.recv_text(wait).await?;
        serde_json::from_str(&text).ok()
    }

    /// Collect every datagram that arrives until `wait` passes with silence.
    pub async fn drain_events(&self, wait: Duration) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv_event(wait).await {
            events.push(event);
        }
        events
    }
}
