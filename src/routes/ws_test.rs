use super::*;
use crate::state::test_helpers::{editor, guest, round_table, test_app_state};
use serde_json::{Value, json};
use tokio::time::{Duration, timeout};

fn session(name: &str) -> (Session, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(64);
    (Session::new(editor(name), tx), rx)
}

async fn call(state: &AppState, session: &mut Session, syscall: &str, data: Value) -> Frame {
    let data: Data = serde_json::from_value(data).expect("object payload");
    let text = serde_json::to_string(&Frame::request(syscall, data)).expect("encode");
    let mut frames = process_inbound_text(state, session, &text).await;
    assert_eq!(frames.len(), 1, "one reply per request");
    frames.remove(0)
}

async fn join(state: &AppState, session: &mut Session, plan_id: Uuid) -> Frame {
    let reply = call(state, session, "plan:join", json!({ "plan_id": plan_id.to_string() })).await;
    assert_eq!(reply.status, Status::Done, "join failed: {:?}", reply.data);
    reply
}

/// Wait for a relay frame with `syscall`, skipping unrelated notifications.
async fn recv_syscall(rx: &mut mpsc::Receiver<Frame>, syscall: &str) -> Frame {
    timeout(Duration::from_millis(500), async {
        loop {
            let frame = rx.recv().await.expect("relay channel closed");
            if frame.syscall == syscall {
                return frame;
            }
        }
    })
    .await
    .expect("relay frame timed out")
}

async fn assert_no_syscall(rx: &mut mpsc::Receiver<Frame>, syscall: &str) {
    let _ = timeout(Duration::from_millis(80), async {
        while let Some(frame) = rx.recv().await {
            assert_ne!(frame.syscall, syscall, "unexpected relay frame");
        }
    })
    .await;
}

#[test]
fn editor_params_fall_back_to_defaults() {
    let mut params = HashMap::new();
    params.insert("user_id".to_string(), "not-a-uuid".to_string());
    params.insert("name".to_string(), "   ".to_string());
    let editor = editor_from_params(&params);
    assert_eq!(editor.display_name, DEFAULT_DISPLAY_NAME);
    assert_eq!(editor.color, DEFAULT_COLOR);

    let user_id = Uuid::new_v4();
    params.insert("user_id".to_string(), user_id.to_string());
    params.insert("name".to_string(), " Ana ".to_string());
    params.insert("color".to_string(), "#ff0000".to_string());
    let editor = editor_from_params(&params);
    assert_eq!(editor.user_id, user_id);
    assert_eq!(editor.display_name, "Ana");
    assert_eq!(editor.color, "#ff0000");
}

#[tokio::test]
async fn invalid_json_gets_gateway_error() {
    let state = test_app_state();
    let (mut ana, _rx) = session("Ana");
    let frames = process_inbound_text(&state, &mut ana, "{not json").await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].syscall, "gateway:error");
}

#[tokio::test]
async fn unknown_prefix_and_unjoined_ops_are_errors() {
    let state = test_app_state();
    let (mut ana, _rx) = session("Ana");

    let reply = call(&state, &mut ana, "cursor:move", json!({})).await;
    assert_eq!(reply.status, Status::Error);

    let reply = call(&state, &mut ana, "table:list", json!({})).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.str_field("message"), Some("must join a plan first"));
}

#[tokio::test]
async fn join_replies_with_snapshot_and_presence() {
    let state = test_app_state();
    let plan_id = Uuid::new_v4();
    let (mut ana, _rx) = session("Ana");

    let reply = join(&state, &mut ana, plan_id).await;
    assert_eq!(reply.plan_id, Some(plan_id));
    assert_eq!(reply.data["tables"], json!([]));
    assert_eq!(reply.data["venue"]["width"], json!(1800.0));
    assert_eq!(reply.data["presence"][0]["display_name"], json!("Ana"));
    assert_eq!(reply.data["leases"], json!([]));
    assert!(state.plans.read().await.contains_key(&plan_id));
}

#[tokio::test]
async fn lease_guards_table_edits_between_sessions() {
    let state = test_app_state();
    let plan_id = Uuid::new_v4();
    let (mut ana, _ana_rx) = session("Ana");
    let (mut ben, _ben_rx) = session("Ben");
    join(&state, &mut ana, plan_id).await;
    join(&state, &mut ben, plan_id).await;

    let table = serde_json::to_value(round_table("T1", 300.0, 300.0, 8)).unwrap();
    let reply = call(&state, &mut ana, "table:create", json!({ "table": table })).await;
    assert_eq!(reply.status, Status::Done);

    // No lease yet.
    let reply = call(&state, &mut ana, "table:update", json!({ "id": "T1", "patch": { "x": 420.0 } })).await;
    assert_eq!(reply.str_field("code"), Some("E_LEASE_LOST"));

    let reply = call(&state, &mut ana, "lease:acquire", json!({ "resource_id": "T1" })).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["lease"]["display_name"], json!("Ana"));

    let denied = call(&state, &mut ben, "lease:acquire", json!({ "resource_id": "T1" })).await;
    assert_eq!(denied.status, Status::Error);
    assert_eq!(denied.str_field("code"), Some("E_LEASE_DENIED"));
    assert_eq!(denied.str_field("holder_name"), Some("Ana"));
    assert_eq!(denied.data["retryable"], json!(true));

    let reply = call(&state, &mut ana, "table:update", json!({ "id": "T1", "patch": { "x": 420.0 } })).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["table"]["x"], json!(420.0));

    let reply = call(&state, &mut ana, "lease:release", json!({ "resource_id": "T1" })).await;
    assert_eq!(reply.data["released"], json!(true));

    let reply = call(&state, &mut ben, "lease:acquire", json!({ "resource_id": "T1" })).await;
    assert_eq!(reply.status, Status::Done);
}

#[tokio::test]
async fn part_releases_leases_and_presence() {
    let state = test_app_state();
    let plan_id = Uuid::new_v4();
    let (mut ana, _ana_rx) = session("Ana");
    let (mut ben, _ben_rx) = session("Ben");
    join(&state, &mut ana, plan_id).await;
    join(&state, &mut ben, plan_id).await;

    call(&state, &mut ana, "lease:acquire", json!({ "resource_id": "T1" })).await;
    call(&state, &mut ana, "lease:acquire", json!({ "resource_type": "area", "resource_id": "stage" })).await;

    let reply = call(&state, &mut ana, "plan:part", json!({})).await;
    assert_eq!(reply.status, Status::Done);

    let leases = call(&state, &mut ben, "lease:list", json!({})).await;
    assert_eq!(leases.data["leases"], json!([]));
    let presence = call(&state, &mut ben, "presence:list", json!({})).await;
    let names: Vec<&str> = presence.data["presence"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["display_name"].as_str())
        .collect();
    assert_eq!(names, vec!["Ben"]);
}

#[tokio::test]
async fn committed_changes_reach_peers_but_not_the_writer() {
    let state = test_app_state();
    let plan_id = Uuid::new_v4();
    let (mut ana, mut ana_rx) = session("Ana");
    let (mut ben, mut ben_rx) = session("Ben");
    join(&state, &mut ana, plan_id).await;
    join(&state, &mut ben, plan_id).await;

    let table = serde_json::to_value(round_table("T1", 300.0, 300.0, 8)).unwrap();
    call(&state, &mut ana, "table:create", json!({ "table": table })).await;

    let frame = recv_syscall(&mut ben_rx, "table:snapshot").await;
    assert_eq!(frame.data["tables"][0]["id"], json!("T1"));
    assert_eq!(frame.from, Some(ana.client_id().to_string()));
    assert_no_syscall(&mut ana_rx, "table:snapshot").await;
}

#[tokio::test]
async fn presence_focus_updates_active_tab() {
    let state = test_app_state();
    let plan_id = Uuid::new_v4();
    let (mut ana, _rx) = session("Ana");
    join(&state, &mut ana, plan_id).await;

    let reply = call(&state, &mut ana, "presence:focus", json!({ "active_tab": "seating" })).await;
    assert_eq!(reply.data["entry"]["active_tab"], json!("seating"));
}

#[tokio::test]
async fn unknown_layout_pattern_is_validation_error() {
    let state = test_app_state();
    let (mut ana, _rx) = session("Ana");
    join(&state, &mut ana, Uuid::new_v4()).await;

    let reply = call(&state, &mut ana, "layout:generate", json!({ "pattern": "spiral" })).await;
    assert_eq!(reply.str_field("code"), Some("E_VALIDATION"));

    let reply = call(&state, &mut ana, "layout:undo", json!({})).await;
    assert_eq!(reply.str_field("code"), Some("E_HISTORY_EMPTY"));
}

#[tokio::test]
async fn guest_roster_flows_into_layout_and_recommendations() {
    let state = test_app_state();
    let (mut ana, _rx) = session("Ana");
    join(&state, &mut ana, Uuid::new_v4()).await;

    let guests = serde_json::to_value(vec![
        guest("g1", Some("T1"), 1),
        guest("g2", Some("T2"), 0),
        guest("g3", None, 0),
    ])
    .unwrap();
    let reply = call(&state, &mut ana, "guest:import", json!({ "guests": guests })).await;
    assert_eq!(reply.data["imported"], json!(3));

    let reply = call(&state, &mut ana, "layout:generate", json!({ "pattern": "columns" })).await;
    assert_eq!(reply.status, Status::Done, "{:?}", reply.data);
    assert_eq!(reply.data["tables"].as_array().map(Vec::len), Some(2));
    assert_eq!(reply.data["unassigned"][0]["id"], json!("g3"));

    let reply = call(&state, &mut ana, "guest:assign", json!({ "guest_id": "g3", "table_ref": "T2" })).await;
    assert_eq!(reply.data["guest"]["table_ref"], json!("T2"));

    let reply = call(&state, &mut ana, "recommend:guest", json!({ "guest_id": "g3" })).await;
    assert_eq!(reply.status, Status::Done);
    assert!(reply.data["recommendations"].is_array());

    let reply = call(&state, &mut ana, "recommend:guest", json!({ "guest_id": "nobody" })).await;
    assert_eq!(reply.str_field("code"), Some("E_GUEST_NOT_FOUND"));

    let reply = call(&state, &mut ana, "recommend:auto", json!({})).await;
    assert_eq!(reply.status, Status::Done, "{:?}", reply.data);
    assert_eq!(reply.data["assignments"], json!([]));
    assert_eq!(reply.data["unplaced"], json!([]));
}

#[tokio::test]
async fn venue_is_read_or_replaced() {
    let state = test_app_state();
    let (mut ana, _rx) = session("Ana");
    join(&state, &mut ana, Uuid::new_v4()).await;

    let reply = call(&state, &mut ana, "plan:venue", json!({ "venue": { "width": 0.0, "height": 10.0 } })).await;
    assert_eq!(reply.str_field("code"), Some("E_VALIDATION"));

    call(&state, &mut ana, "plan:venue", json!({ "venue": { "width": 900.0, "height": 600.0, "min_aisle": 60.0 } })).await;
    let reply = call(&state, &mut ana, "plan:venue", json!({})).await;
    assert_eq!(reply.data["venue"]["width"], json!(900.0));
}
