//! Task mutations push UDP notifications to registered users.

use kodeo_server::config::Config;
use kodeo_server::{ServerHandle, start};
use kt_protocol::{ControlMessage, EventType};
use kt_test_utils::{TestRequest, UdpProbe, register_and_login};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(300);

async fn start_server() -> ServerHandle {
    let config = Config {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        udp_port: 0,
        udp_enabled: true,
        token_secret: Some("notifications".to_owned()),
        ..Config::default()
    };
    start(&config).await.expect("server starts")
}

/// A logged-in user with a registered notification endpoint.
struct Subscriber {
    id: i64,
    token: String,
    probe: UdpProbe,
}

async fn subscribe(server: &ServerHandle, username: &str) -> Subscriber {
    let (id, token) = register_and_login(server.tcp_addr, username).await;
    let probe = UdpProbe::bind().await.unwrap();
    let udp: SocketAddr = server.udp_addr.expect("udp enabled");
    let reply = probe.control(udp, &ControlMessage::Register(id), WAIT).await;
    assert_eq!(reply.as_deref(), Some("REGISTERED:OK"));
    Subscriber { id, token, probe }
}

#[tokio::test]
async fn create_notifies_assignees_then_creator() {
    let server = start_server().await;
    let creator = subscribe(&server, "ana").await;
    let second = subscribe(&server, "bob").await;
    let third = subscribe(&server, "cy").await;

    let created = TestRequest::post("/api/tasks")
        .bearer(&creator.token)
        .json(&json!({
            "title": "Plan sprint",
            "assignedUsers": [second.id, third.id, creator.id]
        }))
        .send(server.tcp_addr)
        .await;
    assert_eq!(created.status, 201);
    let task_id = created.json()["id"].as_i64().unwrap();

    for assignee in [&second, &third] {
        let events = assignee.probe.drain_events(QUIET).await;
        assert_eq!(events.len(), 1, "assignee {} events: {:?}", assignee.id, events);
        assert_eq!(events[0].event_type, EventType::TaskAssigned);
        assert_eq!(events[0].task_id, Some(task_id));
        assert_eq!(events[0].task_title.as_deref(), Some("Plan sprint"));
        assert!(events[0].timestamp > 0);
    }

    // The creator is also in the assignee list but is never told it was assigned.
    let events = creator.probe.drain_events(QUIET).await;
    assert_eq!(events.len(), 1, "creator events: {:?}", events);
    assert_eq!(events[0].event_type, EventType::TaskCreated);
    let snapshot = events[0].task.as_ref().expect("task snapshot");
    assert_eq!(snapshot.created_by, creator.id);

    server.shutdown().await;
}

#[tokio::test]
async fn update_notifies_assignees_and_updater() {
    let server = start_server().await;
    let owner = subscribe(&server, "ana").await;
    let helper = subscribe(&server, "bob").await;

    let task = TestRequest::post("/api/tasks")
        .bearer(&owner.token)
        .json(&json!({"title": "Fix bug"}))
        .send(server.tcp_addr)
        .await
        .json();
    owner.probe.drain_events(QUIET).await;

    let resp = TestRequest::put(&format!("/api/tasks/{}", task["id"]))
        .bearer(&owner.token)
        .json(&json!({"assignedUsers": [helper.id], "status": "IN_PROGRESS"}))
        .send(server.tcp_addr)
        .await;
    assert_eq!(resp.status, 200);

    let helper_event = helper.probe.recv_event(WAIT).await.expect("assigned event");
    assert_eq!(helper_event.event_type, EventType::TaskAssigned);
    let owner_event = owner.probe.recv_event(WAIT).await.expect("updated event");
    assert_eq!(owner_event.event_type, EventType::TaskUpdated);
    assert_eq!(
        owner_event.task.map(|t| t.assigned_users),
        Some(vec![helper.id])
    );

    server.shutdown().await;
}

#[tokio::test]
async fn delete_by_creator_sends_task_deleted_without_snapshot() {
    let server = start_server().await;
    let owner = subscribe(&server, "ana").await;

    let task = TestRequest::post("/api/tasks")
        .bearer(&owner.token)
        .json(&json!({"title": "Temp"}))
        .send(server.tcp_addr)
        .await
        .json();
    owner.probe.drain_events(QUIET).await;

    let resp = TestRequest::delete(&format!("/api/tasks/{}", task["id"]))
        .bearer(&owner.token)
        .send(server.tcp_addr)
        .await;
    assert_eq!(resp.status, 204);

    let event = owner.probe.recv_event(WAIT).await.expect("deleted event");
    assert_eq!(event.event_type, EventType::TaskDeleted);
    assert!(event.task.is_none());
    assert!(event.task_id.is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn delete_by_non_creator_is_403_and_silent() {
    let server = start_server().await;
    let owner = subscribe(&server, "ana").await;
    let other = subscribe(&server, "bob").await;

    let task = TestRequest::post("/api/tasks")
        .bearer(&owner.token)
        .json(&json!({"title": "Keep", "assignedUsers": [other.id]}))
        .send(server.tcp_addr)
        .await
        .json();
    owner.probe.drain_events(QUIET).await;
    other.probe.drain_events(QUIET).await;

    let resp = TestRequest::delete(&format!("/api/tasks/{}", task["id"]))
        .bearer(&other.token)
        .send(server.tcp_addr)
        .await;
    assert_eq!(resp.status, 403);

    assert!(owner.probe.drain_events(QUIET).await.is_empty());
    assert!(other.probe.drain_events(QUIET).await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn unregistered_user_gets_nothing() {
    let server = start_server().await;
    let owner = subscribe(&server, "ana").await;
    let udp = server.udp_addr.unwrap();
    let reply = owner
        .probe
        .control(udp, &ControlMessage::Unregister(owner.id), WAIT)
        .await;
    assert_eq!(reply.as_deref(), Some("UNREGISTERED:OK"));

    let resp = TestRequest::post("/api/tasks")
        .bearer(&owner.token)
        .json(&json!({"title": "Quiet"}))
        .send(server.tcp_addr)
        .await;
    assert_eq!(resp.status, 201);
    assert!(owner.probe.drain_events(QUIET).await.is_empty());

    server.shutdown().await;
}
