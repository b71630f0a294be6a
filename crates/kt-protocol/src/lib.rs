// kt-protocol: Wire types shared by the task server and its clients.
//
// HTTP bodies are camelCase JSON. UDP control messages are plaintext
// `COMMAND[:argument]` datagrams; notification datagrams are JSON objects
// tagged by a `type` field.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
        }
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// A stored task as returned by the task routes and embedded in notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub category: Option<String>,
    pub created_by: i64,
    pub created_by_username: Option<String>,
    /// Legacy single-assignee column; `assigned_users` is authoritative.
    pub assigned_to: Option<i64>,
    #[serde(default)]
    pub assigned_users: Vec<i64>,
    /// Positional with `assigned_users`; an id with no user row gets `""`.
    #[serde(default)]
    pub assigned_users_names: Vec<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// True when `user_id` created the task or is one of its assignees.
    pub fn is_visible_to(&self, user_id: i64) -> bool {
        self.created_by == user_id
            || self.assigned_to == Some(user_id)
            || self.assigned_users.contains(&user_id)
    }
}

/// Client-supplied task fields.
///
/// Used as the body of `POST /api/tasks` (where `title` is required) and of
/// `PUT /api/tasks/{id}` (where every absent field leaves the stored value
/// untouched). Server-owned fields such as `createdBy` are ignored if sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFields {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<i64>,
    #[serde(default)]
    pub assigned_users: Option<Vec<i64>>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Users and auth
// ---------------------------------------------------------------------------

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Body of `POST /api/auth/register`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Body of `POST /api/auth/login`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Response body shared by register and login.
///
/// Register fills `user_id`; login additionally fills the token and profile
/// fields. `success == false` carries only the message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl AuthResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        AuthResponse {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Error envelope used by every non-2xx JSON response: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ---------------------------------------------------------------------------
// UDP control channel
// ---------------------------------------------------------------------------

/// An inbound control datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Register(i64),
    Unregister(i64),
    Ping,
}

/// Why a control datagram could not be classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlParseError {
    /// A REGISTER/UNREGISTER whose argument is not a 64-bit integer.
    InvalidUserId(String),
    /// Anything that is not a known command.
    Unrecognized(String),
}

impl std::fmt::Display for ControlParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlParseError::InvalidUserId(s) => write!(f, "invalid user id '{}'", s),
            ControlParseError::Unrecognized(s) => write!(f, "unrecognized control message '{}'", s),
        }
    }
}

impl std::error::Error for ControlParseError {}

pub const REGISTER_PREFIX: &str = "REGISTER:";
pub const UNREGISTER_PREFIX: &str = "UNREGISTER:";
pub const PING: &str = "PING";

impl ControlMessage {
    /// Classify a datagram payload. Surrounding whitespace is ignored.
    pub fn parse(text: &str) -> Result<Self, ControlParseError> {
        let text = text.trim();
        if let Some(arg) = text.strip_prefix(REGISTER_PREFIX) {
            return parse_user_id(arg).map(ControlMessage::Register);
        }
        if let Some(arg) = text.strip_prefix(UNREGISTER_PREFIX) {
            return parse_user_id(arg).map(ControlMessage::Unregister);
        }
        if text == PING {
            return Ok(ControlMessage::Ping);
        }
        Err(ControlParseError::Unrecognized(text.to_owned()))
    }

    pub fn encode(&self) -> String {
        match self {
            ControlMessage::Register(id) => format!("{}{}", REGISTER_PREFIX, id),
            ControlMessage::Unregister(id) => format!("{}{}", UNREGISTER_PREFIX, id),
            ControlMessage::Ping => PING.to_owned(),
        }
    }
}

fn parse_user_id(arg: &str) -> Result<i64, ControlParseError> {
    let arg = arg.trim();
    arg.parse::<i64>()
        .map_err(|_| ControlParseError::InvalidUserId(arg.to_owned()))
}

/// Server reply to a control datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Registered,
    Unregistered,
    Pong,
    Error(String),
}

impl ControlReply {
    pub fn encode(&self) -> String {
        match self {
            ControlReply::Registered => "REGISTERED:OK".to_owned(),
            ControlReply::Unregistered => "UNREGISTERED:OK".to_owned(),
            ControlReply::Pong => "PONG".to_owned(),
            ControlReply::Error(reason) => format!("ERROR:{}", reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications (server -> client datagrams)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskAssigned,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TaskCreated => "task_created",
            EventType::TaskUpdated => "task_updated",
            EventType::TaskDeleted => "task_deleted",
            EventType::TaskAssigned => "task_assigned",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification pushed to a registered UDP endpoint.
///
/// ```json
/// {
///   "type": "task_assigned", "timestamp": 1718000000000,
///   "taskId": 5, "taskTitle": "X", "task": { ... }
/// }
/// ```
///
/// `taskId`, `taskTitle` and `task` are omitted when the event carries no
/// task snapshot (e.g. `task_deleted`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Epoch milliseconds at construction.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
}

impl NotificationEvent {
    pub fn new(event_type: EventType, task: Option<&Task>) -> Self {
        NotificationEvent {
            event_type,
            timestamp: Utc::now().timestamp_millis(),
            task_id: task.map(|t| t.id),
            task_title: task.map(|t| t.title.clone()),
            task: task.cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_parse_accepts_known_commands() {
        assert_eq!(
            ControlMessage::parse("REGISTER:42"),
            Ok(ControlMessage::Register(42))
        );
        assert_eq!(
            ControlMessage::parse("UNREGISTER: 7\n"),
            Ok(ControlMessage::Unregister(7))
        );
        assert_eq!(ControlMessage::parse("PING"), Ok(ControlMessage::Ping));
    }

    #[test]
    fn control_parse_rejects_bad_user_id() {
        assert_eq!(
            ControlMessage::parse("REGISTER:abc"),
            Err(ControlParseError::InvalidUserId("abc".to_owned()))
        );
    }

    #[test]
    fn control_parse_is_case_sensitive() {
        assert!(matches!(
            ControlMessage::parse("ping"),
            Err(ControlParseError::Unrecognized(_))
        ));
    }

    #[test]
    fn control_message_wire_text() {
        assert_eq!(ControlMessage::Register(42).encode(), "REGISTER:42");
        assert_eq!(ControlMessage::Unregister(7).encode(), "UNREGISTER:7");
        assert_eq!(ControlMessage::Ping.encode(), "PING");
        let sent = ControlMessage::Register(-3);
        assert_eq!(ControlMessage::parse(&sent.encode()), Ok(sent));
    }

    #[test]
    fn control_reply_wire_text() {
        assert_eq!(ControlReply::Registered.encode(), "REGISTERED:OK");
        assert_eq!(ControlReply::Unregistered.encode(), "UNREGISTERED:OK");
        assert_eq!(ControlReply::Pong.encode(), "PONG");
        assert_eq!(
            ControlReply::Error("Invalid userId".to_owned()).encode(),
            "ERROR:Invalid userId"
        );
    }

    #[test]
    fn deleted_event_omits_task_fields() {
        let event = NotificationEvent::new(EventType::TaskDeleted, None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_deleted");
        assert!(json.get("taskId").is_none());
        assert!(json.get("task").is_none());
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }
}
