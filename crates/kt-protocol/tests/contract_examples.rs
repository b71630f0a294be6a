/// Contract tests: fixed JSON documents that clients already send or expect
/// must keep decoding into (and encoding from) the Rust types.
use kt_protocol::{
    AuthResponse, ErrorBody, EventType, NotificationEvent, RegisterRequest, Task, TaskFields,
    TaskStatus,
};

const TASK_JSON: &str = r#"{
    "id": 5,
    "title": "X",
    "description": null,
    "status": "IN_PROGRESS",
    "category": "work",
    "createdBy": 1,
    "createdByUsername": "alice",
    "assignedTo": null,
    "assignedUsers": [2, 3],
    "assignedUsersNames": ["bob", "carol"],
    "dueDate": "2024-06-01",
    "createdAt": "2024-05-01T10:00:00Z",
    "updatedAt": "2024-05-02T10:00:00Z",
    "completedAt": null
}"#;

#[test]
fn task_document_decodes() {
    let task: Task = serde_json::from_str(TASK_JSON).expect("task json");
    assert_eq!(task.id, 5);
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assigned_users, vec![2, 3]);
    assert!(task.is_visible_to(1));
    assert!(task.is_visible_to(3));
    assert!(!task.is_visible_to(4));

    let reencoded = serde_json::to_value(&task).unwrap();
    let original: serde_json::Value = serde_json::from_str(TASK_JSON).unwrap();
    assert_eq!(reencoded, original);
}

#[test]
fn partial_task_fields_leave_absent_keys_as_none() {
    let fields: TaskFields = serde_json::from_str(r#"{"status":"COMPLETED"}"#).unwrap();
    assert_eq!(fields.status, Some(TaskStatus::Completed));
    assert!(fields.title.is_none());
    assert!(fields.assigned_users.is_none());
}

#[test]
fn task_fields_ignore_server_owned_keys() {
    let fields: TaskFields =
        serde_json::from_str(r#"{"title":"t","createdBy":99,"id":12}"#).unwrap();
    assert_eq!(fields.title.as_deref(), Some("t"));
}

#[test]
fn register_request_uses_camel_case() {
    let req: RegisterRequest = serde_json::from_str(
        r#"{"username":"u","email":"e@x","password":"secret1","firstName":"F","lastName":"L"}"#,
    )
    .unwrap();
    assert_eq!(req.first_name.as_deref(), Some("F"));
    assert_eq!(req.last_name.as_deref(), Some("L"));
}

#[test]
fn failed_auth_response_carries_only_success_and_message() {
    let json = serde_json::to_value(AuthResponse::failure("nope")).unwrap();
    assert_eq!(json, serde_json::json!({"success": false, "message": "nope"}));
}

#[test]
fn error_body_shape() {
    let json = serde_json::to_string(&ErrorBody {
        error: "Ruta no encontrada".to_owned(),
    })
    .unwrap();
    assert_eq!(json, r#"{"error":"Ruta no encontrada"}"#);
}

#[test]
fn assigned_notification_carries_task_id_and_title() {
    let task: Task = serde_json::from_str(TASK_JSON).unwrap();
    let event = NotificationEvent::new(EventType::TaskAssigned, Some(&task));
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "task_assigned");
    assert_eq!(json["taskId"], 5);
    assert_eq!(json["taskTitle"], "X");
    assert_eq!(json["task"]["assignedUsers"], serde_json::json!([2, 3]));
}
