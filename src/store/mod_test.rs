use super::*;
use crate::frame::ErrorCode;

#[test]
fn key_kind_and_plan_id_are_recoverable() {
    let plan_id = Uuid::new_v4();
    let key = keys::lease(plan_id, "table", "T1");
    assert_eq!(keys::kind(&key), Some("lease"));
    assert_eq!(keys::plan_id(&key), Some(plan_id));
    assert_eq!(keys::kind(&keys::tables(plan_id)), Some("tables"));
    assert_eq!(keys::kind(&keys::presence(plan_id, Uuid::new_v4())), Some("presence"));
    assert!(key.starts_with(&keys::lease_prefix(plan_id)));
}

#[test]
fn plan_ids_are_distinct_per_plan() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let mut all = vec![keys::tables(a), keys::venue(a), keys::presence(b, Uuid::new_v4()), "other/x".to_string()];
    all.sort();
    let ids = keys::plan_ids(&all);
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a) && ids.contains(&b));
}

#[test]
fn foreign_keys_have_no_kind() {
    assert_eq!(keys::kind("other/thing"), None);
    assert_eq!(keys::plan_id("plan/not-a-uuid/tables"), None);
}

#[test]
fn unavailable_is_retryable_codec_is_not() {
    assert!(StoreError::Unavailable("down".into()).retryable());
    assert_eq!(StoreError::Unavailable("down".into()).error_code(), "E_STORE_UNAVAILABLE");
    let codec = StoreError::from(serde_json::from_str::<u8>("x").unwrap_err());
    assert!(!codec.retryable());
}
