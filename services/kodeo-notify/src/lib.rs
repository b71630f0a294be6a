//! Notification subscriber for a kodeo-server UDP channel.
//!
//! A [`Subscriber`] owns one UDP socket, registers any number of user ids
//! from it and yields the task events the server pushes to them. Control
//! replies that arrive while waiting for events are skipped; events that
//! arrive while waiting for a control reply are queued.

pub mod cli;

use kt_protocol::{ControlMessage, EventType, NotificationEvent};
use std::collections::VecDeque;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

pub const DEFAULT_REPLY_WAIT: Duration = Duration::from_secs(2);
const RECV_BUFFER_BYTES: usize = 65_536;
const MAX_TITLE_CHARS: usize = 60;

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("no reply to {0}")]
    NoReply(String),
    #[error("server rejected {request}: {reason}")]
    Rejected { request: String, reason: String },
    #[error("unexpected reply '{0}'")]
    UnexpectedReply(String),
}

/// One datagram from the server, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// `REGISTERED:OK`, `UNREGISTERED:OK`, `PONG` or `ERROR:<reason>`.
    Reply(String),
    Event(NotificationEvent),
}

pub fn classify(text: &str) -> Option<Incoming> {
    let text = text.trim();
    if text.starts_with("REGISTERED:")
        || text.starts_with("UNREGISTERED:")
        || text.starts_with("ERROR:")
        || text == "PONG"
    {
        return Some(Incoming::Reply(text.to_owned()));
    }
    serde_json::from_str(text).ok().map(Incoming::Event)
}

pub struct Subscriber {
    socket: UdpSocket,
    server: SocketAddr,
    users: Vec<i64>,
    pending: VecDeque<NotificationEvent>,
    reply_wait: Duration,
}

impl Subscriber {
    /// Bind an ephemeral socket of the same family as `server`.
    pub async fn connect(server: SocketAddr) -> Result<Self, SubscribeError> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Subscriber {
            socket,
            server,
            users: Vec::new(),
            pending: VecDeque::new(),
            reply_wait: DEFAULT_REPLY_WAIT,
        })
    }

    #[must_use]
    pub fn with_reply_wait(mut self, wait: Duration) -> Self {
        self.reply_wait = wait;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SubscribeError> {
        Ok(self.socket.local_addr()?)
    }

    /// User ids currently registered from this socket.
    pub fn users(&self) -> &[i64] {
        &self.users
    }

    pub async fn register(&mut self, user_id: i64) -> Result<(), SubscribeError> {
        let message = ControlMessage::Register(user_id);
        let reply = self.request(&message).await?;
        expect_reply(&message, &reply, "REGISTERED:")?;
        if !self.users.contains(&user_id) {
            self.users.push(user_id);
        }
        Ok(())
    }

    pub async fn unregister(&mut self, user_id: i64) -> Result<(), SubscribeError> {
        let message = ControlMessage::Unregister(user_id);
        let reply = self.request(&message).await?;
        expect_reply(&message, &reply, "UNREGISTERED:")?;
        self.users.retain(|&id| id != user_id);
        Ok(())
    }

    /// Unregister every user, logging failures. Returns how many the server
    /// confirmed.
    pub async fn unregister_all(&mut self) -> usize {
        let mut confirmed = 0;
        for user_id in self.users.clone() {
            match self.unregister(user_id).await {
                Ok(()) => confirmed += 1,
                Err(e) => warn!(user_id, error = %e, "unregister failed"),
            }
        }
        confirmed
    }

    pub async fn ping(&mut self) -> Result<(), SubscribeError> {
        let message = ControlMessage::Ping;
        let reply = self.request(&message).await?;
        expect_reply(&message, &reply, "PONG")
    }

    /// Wait for the next notification. Cancel-safe.
    pub async fn next_event(&mut self) -> Result<NotificationEvent, SubscribeError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        loop {
            let text = self.recv_text().await?;
            match classify(&text) {
                Some(Incoming::Event(event)) => return Ok(event),
                Some(Incoming::Reply(reply)) => debug!(reply = %reply, "stray control reply"),
                None => warn!(payload = %text, "unrecognized datagram"),
            }
        }
    }

    async fn request(&mut self, message: &ControlMessage) -> Result<String, SubscribeError> {
        let encoded = message.encode();
        self.socket.send_to(encoded.as_bytes(), self.server).await?;
        let deadline = Instant::now() + self.reply_wait;
        loop {
            let Ok(text) = timeout_at(deadline, self.recv_text()).await else {
                return Err(SubscribeError::NoReply(encoded));
            };
            match classify(&text?) {
                Some(Incoming::Reply(reply)) => return Ok(reply),
                Some(Incoming::Event(event)) => self.pending.push_back(event),
                None => debug!(request = %encoded, "ignoring unrecognized datagram"),
            }
        }
    }

    async fn recv_text(&self) -> Result<String, SubscribeError> {
        let mut buf = vec![0u8; RECV_BUFFER_BYTES];
        let (n, _from) = self.socket.recv_from(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }
}

fn expect_reply(message: &ControlMessage, reply: &str, ok: &str) -> Result<(), SubscribeError> {
    if reply.starts_with(ok) {
        return Ok(());
    }
    match reply.strip_prefix("ERROR:") {
        Some(reason) => Err(SubscribeError::Rejected {
            request: message.encode(),
            reason: reason.to_owned(),
        }),
        None => Err(SubscribeError::UnexpectedReply(reply.to_owned())),
    }
}

/// Human label for an event type.
pub fn event_label(event_type: EventType) -> &'static str {
    match event_type {
        EventType::TaskAssigned => "Tarea Asignada",
        EventType::TaskCreated => "Tarea Creada",
        EventType::TaskUpdated => "Tarea Actualizada",
        EventType::TaskDeleted => "Tarea Eliminada",
    }
}

/// One-line summary: label, task id, title (clipped) and author.
pub fn describe(event: &NotificationEvent) -> String {
    let mut line = event_label(event.event_type).to_owned();
    if let Some(id) = event.task_id {
        line.push_str(&format!(" #{id}"));
    }
    if let Some(title) = &event.task_title {
        line.push_str(&format!(" \"{}\"", clip(title, MAX_TITLE_CHARS)));
    }
    let author = event
        .task
        .as_ref()
        .and_then(|t| t.created_by_username.as_deref())
        .unwrap_or("Sistema");
    line.push_str(&format!(" (de {author})"));
    line
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let kept: String = text.chars().take(max_chars - 3).collect();
    format!("{kept}...")
}
