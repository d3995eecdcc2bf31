use super::*;
use crate::frame::ErrorCode;
use crate::state::test_helpers::{editor, guest, round_table, test_app_state};
use tokio::time::{Duration, timeout};

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::services::guests::StoreGuestDirectory;
use crate::store::{MemoryStore, Mutator, Store, Subscription};

/// Memory store where another editor commits tables right after the first
/// tables read, as if racing a joining client.
struct RacingWrite {
    inner: MemoryStore,
    raced: AtomicBool,
}

#[async_trait]
impl Store for RacingWrite {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let value = self.inner.get(key).await?;
        if key.ends_with("/tables") && !self.raced.swap(true, Ordering::SeqCst) {
            let tables = serde_json::to_value(vec![round_table("T7", 400.0, 400.0, 8)])?;
            self.inner
                .read_modify_write(key, Some(Uuid::new_v4()), Box::new(move |_| Write::Put(tables)))
                .await?;
        }
        Ok(value)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
        self.inner.list_prefix(prefix).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_keys(prefix).await
    }

    async fn read_modify_write(
        &self,
        key: &str,
        writer: Option<Uuid>,
        mutator: Mutator<'_>,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        self.inner.read_modify_write(key, writer, mutator).await
    }

    fn subscribe(&self, prefix: &str) -> Subscription {
        self.inner.subscribe(prefix)
    }
}

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("relay frame timed out")
        .expect("client channel closed")
}

async fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
    assert!(timeout(Duration::from_millis(80), rx.recv()).await.is_err(), "expected no frame");
}

async fn seed(state: &AppState, plan_id: Uuid, tables: Vec<Table>) {
    crate::store::put_json(state.store.as_ref(), &keys::tables(plan_id), None, &tables)
        .await
        .unwrap();
}

fn spread(n: usize) -> Vec<Table> {
    #[allow(clippy::cast_precision_loss)]
    let tables = (0..n)
        .map(|i| round_table(&format!("T{i}"), 200.0 + 250.0 * i as f64, 300.0, 8))
        .collect();
    tables
}

// =============================================================================
// JOIN / PART
// =============================================================================

#[tokio::test]
async fn join_returns_snapshot_and_last_part_evicts() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    seed(&state, plan, spread(2)).await;

    let (tx, _rx) = mpsc::channel(8);
    let ana = editor("Ana");
    let snapshot = join_plan(&state, plan, ana.client_id, tx).await.unwrap();
    assert_eq!(snapshot.tables.len(), 2);
    assert_eq!(snapshot.venue, Venue::default());
    assert!(state.plans.read().await.get(&plan).is_some_and(|p| p.relay.is_some()));

    part_plan(&state, plan, ana.client_id).await;
    assert!(state.plans.read().await.get(&plan).is_none());
}

#[tokio::test]
async fn commit_during_first_join_reaches_the_joiner() {
    let store: Arc<dyn Store> = Arc::new(RacingWrite { inner: MemoryStore::new(), raced: AtomicBool::new(false) });
    let guests = Arc::new(StoreGuestDirectory::new(store.clone()));
    let state = AppState::new(store, guests, EngineConfig::default());
    let plan = Uuid::new_v4();

    let (tx, mut rx) = mpsc::channel(8);
    let snapshot = join_plan(&state, plan, editor("Ana").client_id, tx).await.unwrap();
    assert!(snapshot.tables.is_empty());

    let frame = recv_frame(&mut rx).await;
    assert_eq!(frame.syscall, "table:snapshot");
    assert_eq!(frame.data["tables"][0]["id"], serde_json::json!("T7"));
}

#[tokio::test]
async fn relay_suppresses_self_echo_once() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let (ana, ben) = (editor("Ana"), editor("Ben"));
    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    join_plan(&state, plan, ana.client_id, tx_a).await.unwrap();
    join_plan(&state, plan, ben.client_id, tx_b).await.unwrap();

    create_table(&state, plan, &ana, round_table("T1", 200.0, 200.0, 8))
        .await
        .unwrap();

    let frame = recv_frame(&mut rx_b).await;
    assert_eq!(frame.syscall, "table:snapshot");
    assert_eq!(frame.plan_id, Some(plan));
    assert_eq!(frame.from, Some(ana.client_id.to_string()));
    assert_no_frame(&mut rx_a).await;
    assert_eq!(state.plans.read().await[&plan].echoes.pending(), 0);

    // A write by someone else reaches Ana.
    create_table(&state, plan, &ben, round_table("T2", 500.0, 200.0, 8))
        .await
        .unwrap();
    assert_eq!(recv_frame(&mut rx_a).await.syscall, "table:snapshot");
}

#[tokio::test]
async fn rejected_write_leaves_no_pending_echo() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");
    let (tx, _rx) = mpsc::channel(8);
    join_plan(&state, plan, ana.client_id, tx).await.unwrap();

    create_table(&state, plan, &ana, round_table("T1", 200.0, 200.0, 8))
        .await
        .unwrap();
    let err = create_table(&state, plan, &ana, round_table("T1", 900.0, 200.0, 8))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E_VALIDATION");

    // Give the relay a chance to consume the one real echo.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.plans.read().await[&plan].echoes.pending(), 0);
}

// =============================================================================
// SINGLE-TABLE MUTATIONS
// =============================================================================

#[tokio::test]
async fn create_assigns_id_and_rejects_non_finite() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");

    let created = create_table(&state, plan, &ana, round_table("", 100.0, 100.0, 8))
        .await
        .unwrap();
    assert!(!created.id.is_empty());

    let err = create_table(&state, plan, &ana, round_table("bad", f64::NAN, 100.0, 8))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E_NON_FINITE");
    assert_eq!(load_tables(&state, plan).await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_requires_live_lease() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let (ana, ben) = (editor("Ana"), editor("Ben"));
    seed(&state, plan, spread(1)).await;

    let patch = TablePatch { x: Some(640.0), ..TablePatch::default() };
    let err = update_table(&state, plan, &ana, "T0", &patch).await.unwrap_err();
    assert_eq!(err.error_code(), "E_LEASE_LOST");

    state.leases.acquire(plan, TABLE_RESOURCE, "T0", &ana).await.unwrap();
    let moved = update_table(&state, plan, &ana, "T0", &patch).await.unwrap();
    assert!((moved.x - 640.0).abs() < f64::EPSILON);

    let err = update_table(&state, plan, &ben, "T0", &patch).await.unwrap_err();
    assert!(matches!(err, PlanError::Lease(LeaseError::Lost { .. })));
}

#[tokio::test]
async fn update_with_non_finite_leaves_store_untouched() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");
    seed(&state, plan, spread(1)).await;
    state.leases.acquire(plan, TABLE_RESOURCE, "T0", &ana).await.unwrap();

    let patch = TablePatch { y: Some(f64::INFINITY), ..TablePatch::default() };
    let err = update_table(&state, plan, &ana, "T0", &patch).await.unwrap_err();
    assert_eq!(err.error_code(), "E_NON_FINITE");
    assert!((load_tables(&state, plan).await.unwrap()[0].y - 300.0).abs() < f64::EPSILON);
}

#[test]
fn patch_deserializes_partial_fields_and_shape() {
    let patch: TablePatch = serde_json::from_value(serde_json::json!({
        "x": 10.0,
        "shape": "rect",
        "width": 200.0,
        "height": 80.0,
        "locked": true,
    }))
    .unwrap();
    assert_eq!(patch.shape, Some(TableShape::Rect { width: 200.0, height: 80.0 }));
    assert_eq!(patch.locked, Some(true));
    assert!(patch.y.is_none());

    let mut table = round_table("T", 0.0, 0.0, 8);
    patch.apply(&mut table);
    assert!(table.locked);
    assert!((table.x - 10.0).abs() < f64::EPSILON);

    let plain: TablePatch = serde_json::from_value(serde_json::json!({ "name": "Rose" })).unwrap();
    assert!(plain.shape.is_none());
}

#[tokio::test]
async fn delete_requires_lease_and_existing_table() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");
    seed(&state, plan, spread(2)).await;

    assert!(delete_table(&state, plan, &ana, "T1").await.is_err());
    state.leases.acquire(plan, TABLE_RESOURCE, "T1", &ana).await.unwrap();
    delete_table(&state, plan, &ana, "T1").await.unwrap();
    assert_eq!(load_tables(&state, plan).await.unwrap().len(), 1);

    let err = delete_table(&state, plan, &ana, "T1").await.unwrap_err();
    assert!(matches!(err, PlanError::TableNotFound(_)));
}

// =============================================================================
// BULK MUTATIONS
// =============================================================================

#[tokio::test]
async fn collapsed_replace_is_rejected_and_previous_kept() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");
    seed(&state, plan, spread(4)).await;

    let collapsed: Vec<Table> = (0..10).map(|i| round_table(&format!("C{i}"), 50.0, 50.0, 8)).collect();
    let err = replace_tables(&state, plan, &ana, collapsed, "import").await.unwrap_err();
    assert_eq!(err.error_code(), "E_STATE_REJECTED");

    let stored = load_tables(&state, plan).await.unwrap();
    assert_eq!(stored, spread(4));
}

#[tokio::test]
async fn replace_rejects_duplicate_ids() {
    let state = test_app_state();
    let tables = vec![round_table("A", 100.0, 100.0, 8), round_table("A", 400.0, 100.0, 8)];
    let err = replace_tables(&state, Uuid::new_v4(), &editor("Ana"), tables, "import")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E_VALIDATION");
}

#[tokio::test]
async fn generate_commits_layout_from_roster() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");
    let roster: Vec<Guest> = (0..12)
        .map(|i| guest(&format!("g{i}"), Some(format!("Table {}", i % 4).as_str()), 0))
        .collect();
    state.guests.import(plan, roster, None).await.unwrap();

    let outcome = generate_layout(&state, plan, &ana, LayoutPattern::Circular).await.unwrap();
    assert_eq!(outcome.tables.len(), 4);
    assert_eq!(load_tables(&state, plan).await.unwrap(), outcome.tables);
}

#[tokio::test]
async fn generate_without_assignments_commits_nothing() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    seed(&state, plan, spread(2)).await;
    state
        .guests
        .import(plan, vec![guest("g", None, 0)], None)
        .await
        .unwrap();

    let outcome = generate_layout(&state, plan, &editor("Ana"), LayoutPattern::Columns)
        .await
        .unwrap();
    assert!(outcome.tables.is_empty());
    assert_eq!(load_tables(&state, plan).await.unwrap().len(), 2);
}

#[tokio::test]
async fn undo_and_redo_walk_committed_collections() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");
    let (tx, _rx) = mpsc::channel(64);
    join_plan(&state, plan, ana.client_id, tx).await.unwrap();

    assert!(matches!(undo(&state, plan, &ana).await, Err(PlanError::HistoryEmpty("undo"))));

    create_table(&state, plan, &ana, round_table("A", 200.0, 200.0, 8)).await.unwrap();
    create_table(&state, plan, &ana, round_table("B", 500.0, 200.0, 8)).await.unwrap();

    let after_undo = undo(&state, plan, &ana).await.unwrap();
    assert_eq!(after_undo.len(), 1);
    assert_eq!(load_tables(&state, plan).await.unwrap().len(), 1);

    let after_redo = redo(&state, plan, &ana).await.unwrap();
    assert_eq!(after_redo.len(), 2);
    assert!(matches!(redo(&state, plan, &ana).await, Err(PlanError::HistoryEmpty("redo"))));

    undo(&state, plan, &ana).await.unwrap();
    undo(&state, plan, &ana).await.unwrap();
    assert!(load_tables(&state, plan).await.unwrap().is_empty());
}

#[tokio::test]
async fn racing_undos_of_one_step_keep_older_history() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let (ana, ben) = (editor("Ana"), editor("Ben"));
    let (tx, _rx) = mpsc::channel(64);
    join_plan(&state, plan, ana.client_id, tx).await.unwrap();

    create_table(&state, plan, &ana, round_table("A", 200.0, 200.0, 8)).await.unwrap();
    create_table(&state, plan, &ana, round_table("B", 500.0, 200.0, 8)).await.unwrap();

    // Both editors peeked the same target before either committed.
    let target = state.plans.read().await[&plan].history.peek_undo().cloned().unwrap();
    commit_bulk(&state, plan, &ana, target.clone(), "undo", Step::Undo).await.unwrap();
    commit_bulk(&state, plan, &ben, target, "undo", Step::Undo).await.unwrap();

    {
        let plans = state.plans.read().await;
        let history = &plans[&plan].history;
        assert_eq!(history.undo_len(), 1);
        assert_eq!(history.redo_len(), 1);
    }

    undo(&state, plan, &ana).await.unwrap();
    assert!(load_tables(&state, plan).await.unwrap().is_empty());
}

#[tokio::test]
async fn undo_into_collapsed_state_is_rejected() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");
    let (tx, _rx) = mpsc::channel(64);
    join_plan(&state, plan, ana.client_id, tx).await.unwrap();

    // A collapsed collection that predates the guard, as if written directly.
    let collapsed: Vec<Table> = (0..6).map(|i| round_table(&format!("C{i}"), 10.0, 10.0, 8)).collect();
    seed(&state, plan, collapsed).await;
    replace_tables(&state, plan, &ana, spread(6), "import").await.unwrap();

    let err = undo(&state, plan, &ana).await.unwrap_err();
    assert_eq!(err.error_code(), "E_STATE_REJECTED");
    assert_eq!(load_tables(&state, plan).await.unwrap(), spread(6));
    assert_eq!(state.plans.read().await[&plan].history.undo_len(), 1);
}

// =============================================================================
// VENUE, AREAS, SEATS
// =============================================================================

#[tokio::test]
async fn venue_must_be_valid() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");

    let bad = Venue { width: 0.0, height: 800.0, min_aisle: 100.0 };
    assert_eq!(set_venue(&state, plan, &ana, bad).await.unwrap_err().error_code(), "E_VALIDATION");

    let good = Venue { width: 1000.0, height: 800.0, min_aisle: 80.0 };
    set_venue(&state, plan, &ana, good).await.unwrap();
    assert_eq!(load_venue(&state, plan).await.unwrap(), good);
}

#[tokio::test]
async fn seats_must_be_finite() {
    let state = test_app_state();
    let seats = vec![Seat { id: "1".into(), x: f64::NAN, y: 0.0, guest_id: None }];
    let err = set_seats(&state, Uuid::new_v4(), &editor("Ana"), seats).await.unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)));
}

// =============================================================================
// CONFLICTS AND RECOMMENDATIONS
// =============================================================================

#[tokio::test]
async fn conflicts_read_current_documents() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    seed(&state, plan, vec![round_table("T1", 200.0, 200.0, 2)]).await;
    state
        .guests
        .import(plan, vec![guest("a", Some("T1"), 3)], None)
        .await
        .unwrap();

    let found = conflicts(&state, plan).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].overflow, Some(2));
}

#[tokio::test]
async fn recommend_unknown_guest_is_not_found() {
    let state = test_app_state();
    let err = recommend_for_guest(&state, Uuid::new_v4(), "ghost").await.unwrap_err();
    assert_eq!(err.error_code(), "E_GUEST_NOT_FOUND");
}

#[tokio::test]
async fn auto_assign_writes_assignments_to_the_roster() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    seed(&state, plan, vec![round_table("T1", 200.0, 200.0, 2), round_table("T2", 600.0, 200.0, 2)]).await;
    state
        .guests
        .import(plan, vec![guest("a", None, 1), guest("b", None, 0), guest("c", None, 0), guest("d", None, 0)], None)
        .await
        .unwrap();

    let assigned = auto_assign(&state, plan, &editor("Ana")).await.unwrap();
    assert_eq!(assigned.assignments.len(), 3);
    assert_eq!(assigned.unplaced, vec!["d".to_string()]);

    let roster = state.guests.list_guests(plan).await.unwrap();
    let refs: Vec<Option<&str>> = roster.iter().map(Guest::table_ref).collect();
    assert_eq!(refs, vec![Some("T1"), Some("T2"), Some("T2"), None]);
    assert!(conflicts(&state, plan).await.unwrap().is_empty());
}

#[tokio::test]
async fn reassign_action_writes_back_assignment() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    seed(&state, plan, vec![round_table("T1", 200.0, 200.0, 1), round_table("T2", 600.0, 200.0, 4)]).await;
    state
        .guests
        .import(plan, vec![guest("a", Some("T1"), 0), guest("b", Some("T1"), 0)], None)
        .await
        .unwrap();

    let fixes = suggest_fixes(&state, plan).await.unwrap();
    assert_eq!(fixes.len(), 1);
    let applied = apply_action(&state, plan, &editor("Ana"), &fixes[0]).await.unwrap();
    let Applied::Reassigned { guest } = applied else {
        panic!("expected a reassignment");
    };
    assert_eq!(guest.table_ref(), Some("T2"));
    assert!(conflicts(&state, plan).await.unwrap().is_empty());
}

#[tokio::test]
async fn fix_position_goes_through_the_lease() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let (ana, ben) = (editor("Ana"), editor("Ben"));
    seed(&state, plan, vec![round_table("T1", 5000.0, 200.0, 8)]).await;
    let action = SuggestedAction::FixPosition { table_id: "T1".into(), x: 300.0, y: 200.0 };

    state.leases.acquire(plan, TABLE_RESOURCE, "T1", &ben).await.unwrap();
    let err = apply_action(&state, plan, &ana, &action).await.unwrap_err();
    assert_eq!(err.error_code(), "E_LEASE_DENIED");
    state.leases.release(plan, TABLE_RESOURCE, "T1", ben.client_id).await.unwrap();

    let Applied::Moved { table } = apply_action(&state, plan, &ana, &action).await.unwrap() else {
        panic!("expected a move");
    };
    assert!((table.x - 300.0).abs() < f64::EPSILON);
    // The temporary lease is gone again.
    assert!(state.leases.list(plan).await.unwrap().is_empty());
}

#[tokio::test]
async fn fix_position_keeps_a_lease_the_editor_already_held() {
    let state = test_app_state();
    let plan = Uuid::new_v4();
    let ana = editor("Ana");
    seed(&state, plan, vec![round_table("T1", 5000.0, 200.0, 8)]).await;
    state.leases.acquire(plan, TABLE_RESOURCE, "T1", &ana).await.unwrap();

    let action = SuggestedAction::FixPosition { table_id: "T1".into(), x: 300.0, y: 200.0 };
    apply_action(&state, plan, &ana, &action).await.unwrap();
    assert!(state.leases.holds(plan, TABLE_RESOURCE, "T1", ana.client_id).await.unwrap());
}

#[tokio::test]
async fn focus_action_changes_nothing() {
    let state = test_app_state();
    let action = SuggestedAction::FocusTable { table_id: "T1".into() };
    let applied = apply_action(&state, Uuid::new_v4(), &editor("Ana"), &action).await.unwrap();
    assert!(matches!(applied, Applied::Focused { ref table_id } if table_id == "T1"));
}
