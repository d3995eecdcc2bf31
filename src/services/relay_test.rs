use super::*;
use serde_json::json;

fn change(key: String, value: Option<serde_json::Value>, writer: Option<Uuid>) -> StoreChange {
    StoreChange { key, value, writer }
}

#[test]
fn echo_is_skipped_once_per_registration() {
    let mut echoes = EchoFilter::new();
    let (writer, other) = (Uuid::new_v4(), Uuid::new_v4());

    echoes.register(writer, "plan/x/tables");
    echoes.register(writer, "plan/x/tables");
    assert_eq!(echoes.pending(), 2);

    assert!(!echoes.should_skip(other, "plan/x/tables"));
    assert!(!echoes.should_skip(writer, "plan/x/areas"));
    assert!(echoes.should_skip(writer, "plan/x/tables"));
    assert!(echoes.should_skip(writer, "plan/x/tables"));
    assert!(!echoes.should_skip(writer, "plan/x/tables"));
}

#[test]
fn forget_cancels_a_registration() {
    let mut echoes = EchoFilter::new();
    let writer = Uuid::new_v4();
    echoes.register(writer, "k");
    echoes.forget(writer, "k");
    assert_eq!(echoes.pending(), 0);
    assert!(!echoes.should_skip(writer, "k"));
}

#[test]
fn table_change_maps_to_snapshot() {
    let plan = Uuid::new_v4();
    let writer = Uuid::new_v4();
    let frame = change_frame(plan, &change(keys::tables(plan), Some(json!([{"id": "T1"}])), Some(writer))).unwrap();
    assert_eq!(frame.syscall, "table:snapshot");
    assert_eq!(frame.plan_id, Some(plan));
    assert_eq!(frame.from, Some(writer.to_string()));
    assert_eq!(frame.data["tables"], json!([{"id": "T1"}]));

    // A deleted collection is an empty one.
    let frame = change_frame(plan, &change(keys::tables(plan), None, None)).unwrap();
    assert_eq!(frame.data["tables"], json!([]));
    assert!(frame.from.is_none());
}

#[test]
fn lease_change_carries_resource() {
    let plan = Uuid::new_v4();
    let frame = change_frame(plan, &change(keys::lease(plan, "table", "T7"), None, None)).unwrap();
    assert_eq!(frame.syscall, "lease:changed");
    assert_eq!(frame.str_field("resource_type"), Some("table"));
    assert_eq!(frame.str_field("resource_id"), Some("T7"));
    assert!(frame.data["lease"].is_null());
}

#[test]
fn presence_and_documents_map_to_their_syscalls() {
    let plan = Uuid::new_v4();
    let client = Uuid::new_v4();
    let cases = [
        (keys::presence(plan, client), "presence:changed"),
        (keys::venue(plan), "plan:venue"),
        (keys::areas(plan), "plan:areas"),
        (keys::seats(plan), "plan:seats"),
        (keys::guests(plan), "guest:snapshot"),
    ];
    for (key, syscall) in cases {
        let frame = change_frame(plan, &change(key, Some(json!({})), None)).unwrap();
        assert_eq!(frame.syscall, syscall);
    }

    let frame = change_frame(plan, &change(keys::presence(plan, client), None, None)).unwrap();
    assert_eq!(frame.str_field("client_id"), Some(client.to_string().as_str()));
}

#[test]
fn unknown_keys_are_ignored() {
    let plan = Uuid::new_v4();
    assert!(change_frame(plan, &change(format!("plan/{plan}/scratch"), None, None)).is_none());
    assert!(change_frame(plan, &change("other/key".into(), None, None)).is_none());
}
