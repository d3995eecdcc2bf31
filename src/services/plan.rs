//! Plan service — join/part and every mutation of plan documents.
//!
//! DESIGN
//! ======
//! The store holds the authoritative documents; this module is the only
//! writer of tables, venue, areas and seats. Each mutation is one
//! read-modify-write on one document. The mutator decides from the value it
//! reads, so a rejected write (missing table, guard failure) never commits.
//!
//! Single-table edits require the caller's live lease on `("table", id)`.
//! Bulk replaces (import, layout generation, undo, redo) skip per-table
//! leases and pass the state guard inside the mutator instead.
//!
//! LIFECYCLE
//! =========
//! The first client to join a plan starts its change relay; the last one to
//! part drops the live plan state, which aborts the relay. Undo history lives
//! with the live plan state and is only recorded while a plan has clients.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame};
use crate::geometry::is_degenerate;
use crate::services::guard::GuardError;
use crate::services::guests::GuestError;
use crate::services::layout::{self, LayoutOutcome, LayoutPattern};
use crate::services::lease::LeaseError;
use crate::services::recommend::{self, AutoAssignPlan, FixContext, ScoredTable, SuggestedAction};
use crate::services::relay;
use crate::services::validate::{self, Conflict};
use crate::state::{AppState, Area, Editor, Guest, PlanState, Seat, Table, TableShape, Venue};
use crate::store::{StoreError, Write, get_json, keys};

/// Resource type of table leases.
pub const TABLE_RESOURCE: &str = "table";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("guest not found: {0}")]
    GuestNotFound(String),
    #[error("nothing to {0}")]
    HistoryEmpty(&'static str),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Guest(#[from] GuestError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for PlanError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::TableNotFound(_) => "E_TABLE_NOT_FOUND",
            Self::GuestNotFound(_) => "E_GUEST_NOT_FOUND",
            Self::HistoryEmpty(_) => "E_HISTORY_EMPTY",
            Self::Lease(e) => e.error_code(),
            Self::Guard(e) => e.error_code(),
            Self::Guest(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Lease(e) => e.retryable(),
            Self::Guest(e) => e.retryable(),
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }

    fn details(&self) -> Data {
        match self {
            Self::Lease(e) => e.details(),
            _ => Data::new(),
        }
    }
}

/// Everything a client needs to render a plan on join.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSnapshot {
    pub venue: Venue,
    pub tables: Vec<Table>,
    pub areas: Vec<Area>,
    pub seats: Vec<Seat>,
}

/// Partial table edit. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TablePatch {
    pub name: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    #[serde(flatten)]
    pub shape: Option<TableShape>,
    pub rotation: Option<f64>,
    pub seat_capacity: Option<u32>,
    pub auto_capacity: Option<bool>,
    pub locked: Option<bool>,
    pub vip: Option<bool>,
}

impl TablePatch {
    fn apply(&self, table: &mut Table) {
        if let Some(name) = &self.name {
            table.name.clone_from(name);
        }
        if let Some(x) = self.x {
            table.x = x;
        }
        if let Some(y) = self.y {
            table.y = y;
        }
        if let Some(shape) = self.shape {
            table.shape = shape;
        }
        if let Some(rotation) = self.rotation {
            table.rotation = rotation;
        }
        if let Some(capacity) = self.seat_capacity {
            table.seat_capacity = capacity;
        }
        if let Some(auto) = self.auto_capacity {
            table.auto_capacity = auto;
        }
        if let Some(locked) = self.locked {
            table.locked = locked;
        }
        if let Some(vip) = self.vip {
            table.vip = vip;
        }
    }
}

/// Result of applying a suggested action.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "applied", rename_all = "kebab-case")]
pub enum Applied {
    Reassigned { guest: Guest },
    Moved { table: Table },
    Focused { table_id: String },
}

/// How a committed table collection moves the undo history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Record,
    Undo,
    Redo,
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a plan. Starts the relay for the first client, then returns the
/// current documents.
///
/// # Errors
///
/// Returns a store error if the documents cannot be read.
pub async fn join_plan(
    state: &AppState,
    plan_id: Uuid,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<PlanSnapshot, PlanError> {
    {
        let mut plans = state.plans.write().await;
        let plan = plans
            .entry(plan_id)
            .or_insert_with(|| PlanState::new(state.config.history_limit));
        if plan.relay.is_none() {
            plan.relay = Some(relay::spawn_relay(state.clone(), plan_id));
        }
        plan.clients.insert(client_id, tx);
        info!(%plan_id, %client_id, clients = plan.clients.len(), "client joined plan");
    }

    // Read only once subscribed: any later commit reaches the client.
    match load_snapshot(state, plan_id).await {
        Ok(snapshot) => Ok(snapshot),
        Err(e) => {
            part_plan(state, plan_id, client_id).await;
            Err(e)
        }
    }
}

/// Leave a plan. The last client out drops the live plan state.
pub async fn part_plan(state: &AppState, plan_id: Uuid, client_id: Uuid) {
    let mut plans = state.plans.write().await;
    let Some(plan) = plans.get_mut(&plan_id) else {
        return;
    };
    plan.clients.remove(&client_id);
    info!(%plan_id, %client_id, remaining = plan.clients.len(), "client left plan");

    if plan.clients.is_empty() {
        plans.remove(&plan_id);
        info!(%plan_id, "evicted live plan state");
    }
}

// =============================================================================
// READS
// =============================================================================

/// # Errors
///
/// Returns a store error if the read or decode fails.
pub async fn load_tables(state: &AppState, plan_id: Uuid) -> Result<Vec<Table>, PlanError> {
    Ok(get_json(state.store.as_ref(), &keys::tables(plan_id))
        .await?
        .unwrap_or_default())
}

/// Venue of a plan, the default hall when none was configured.
///
/// # Errors
///
/// Returns a store error if the read or decode fails.
pub async fn load_venue(state: &AppState, plan_id: Uuid) -> Result<Venue, PlanError> {
    Ok(get_json(state.store.as_ref(), &keys::venue(plan_id))
        .await?
        .unwrap_or_default())
}

/// # Errors
///
/// Returns a store error if the read or decode fails.
pub async fn load_areas(state: &AppState, plan_id: Uuid) -> Result<Vec<Area>, PlanError> {
    Ok(get_json(state.store.as_ref(), &keys::areas(plan_id))
        .await?
        .unwrap_or_default())
}

/// # Errors
///
/// Returns a store error if the read or decode fails.
pub async fn load_seats(state: &AppState, plan_id: Uuid) -> Result<Vec<Seat>, PlanError> {
    Ok(get_json(state.store.as_ref(), &keys::seats(plan_id))
        .await?
        .unwrap_or_default())
}

/// # Errors
///
/// Returns a store error if any document cannot be read.
pub async fn load_snapshot(state: &AppState, plan_id: Uuid) -> Result<PlanSnapshot, PlanError> {
    Ok(PlanSnapshot {
        venue: load_venue(state, plan_id).await?,
        tables: load_tables(state, plan_id).await?,
        areas: load_areas(state, plan_id).await?,
        seats: load_seats(state, plan_id).await?,
    })
}

// =============================================================================
// SINGLE-TABLE MUTATIONS
// =============================================================================

/// Add a table. An empty id is replaced with a fresh one.
///
/// # Errors
///
/// Returns `Validation` for a duplicate id and `NonFinite` for bad geometry.
pub async fn create_table(state: &AppState, plan_id: Uuid, editor: &Editor, mut table: Table) -> Result<Table, PlanError> {
    if table.id.trim().is_empty() {
        table.id = Uuid::new_v4().to_string();
    }
    ensure_finite(&table)?;

    let created = table.clone();
    commit_tables(state, plan_id, editor, Step::Record, move |tables| {
        if tables.iter().any(|t| t.id == table.id) {
            return Err(PlanError::Validation(format!("duplicate table id: {}", table.id)));
        }
        tables.push(table);
        Ok(())
    })
    .await?;

    info!(%plan_id, table_id = %created.id, client_id = %editor.client_id, "table created");
    Ok(created)
}

/// Move, resize, rotate, rename or re-flag a table the editor holds.
///
/// # Errors
///
/// Returns `Lost` without a live lease, `TableNotFound`, or `NonFinite`
/// when the edit would leave non-finite geometry.
pub async fn update_table(
    state: &AppState,
    plan_id: Uuid,
    editor: &Editor,
    table_id: &str,
    patch: &TablePatch,
) -> Result<Table, PlanError> {
    require_lease(state, plan_id, editor, table_id).await?;

    let mut updated: Option<Table> = None;
    commit_tables(state, plan_id, editor, Step::Record, |tables| {
        let Some(table) = tables.iter_mut().find(|t| t.id == table_id) else {
            return Err(PlanError::TableNotFound(table_id.to_string()));
        };
        patch.apply(table);
        ensure_finite(table)?;
        updated = Some(table.clone());
        Ok(())
    })
    .await?;

    updated.ok_or_else(|| PlanError::TableNotFound(table_id.to_string()))
}

/// Remove a table the editor holds.
///
/// # Errors
///
/// Returns `Lost` without a live lease and `TableNotFound`.
pub async fn delete_table(state: &AppState, plan_id: Uuid, editor: &Editor, table_id: &str) -> Result<(), PlanError> {
    require_lease(state, plan_id, editor, table_id).await?;

    commit_tables(state, plan_id, editor, Step::Record, |tables| {
        let before = tables.len();
        tables.retain(|t| t.id != table_id);
        if tables.len() == before {
            return Err(PlanError::TableNotFound(table_id.to_string()));
        }
        Ok(())
    })
    .await?;

    info!(%plan_id, table_id, client_id = %editor.client_id, "table deleted");
    Ok(())
}

// =============================================================================
// BULK MUTATIONS
// =============================================================================

/// Replace the whole table collection.
///
/// # Errors
///
/// Returns a guard error when the collection looks collapsed or has
/// non-finite geometry; the stored collection is then unchanged.
pub async fn replace_tables(
    state: &AppState,
    plan_id: Uuid,
    editor: &Editor,
    tables: Vec<Table>,
    reason: &str,
) -> Result<Vec<Table>, PlanError> {
    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = tables.iter().find(|t| !seen.insert(t.id.as_str())) {
        return Err(PlanError::Validation(format!("duplicate table id: {}", dup.id)));
    }
    commit_bulk(state, plan_id, editor, tables, reason, Step::Record).await
}

/// Generate a layout from the roster and commit it.
///
/// Nothing is committed when the roster has no table assignments.
///
/// # Errors
///
/// Returns a guard error if the generated collection is rejected.
pub async fn generate_layout(
    state: &AppState,
    plan_id: Uuid,
    editor: &Editor,
    pattern: LayoutPattern,
) -> Result<LayoutOutcome, PlanError> {
    let guests = state.guests.list_guests(plan_id).await?;
    let venue = load_venue(state, plan_id).await?;
    let outcome = layout::generate(&guests, pattern, &venue);

    if outcome.tables.is_empty() {
        info!(%plan_id, %pattern, status = %outcome.status, "layout generation produced no tables");
        return Ok(outcome);
    }
    commit_bulk(state, plan_id, editor, outcome.tables.clone(), "layout", Step::Record).await?;
    info!(%plan_id, %pattern, tables = outcome.tables.len(), unassigned = outcome.unassigned.len(), "layout generated");
    Ok(outcome)
}

/// Restore the collection before the last commit.
///
/// # Errors
///
/// Returns `HistoryEmpty` or a guard rejection.
pub async fn undo(state: &AppState, plan_id: Uuid, editor: &Editor) -> Result<Vec<Table>, PlanError> {
    let target = {
        let plans = state.plans.read().await;
        plans
            .get(&plan_id)
            .and_then(|p| p.history.peek_undo().cloned())
    };
    let Some(target) = target else {
        return Err(PlanError::HistoryEmpty("undo"));
    };
    commit_bulk(state, plan_id, editor, target, "undo", Step::Undo).await
}

/// Re-apply the last undone collection.
///
/// # Errors
///
/// Returns `HistoryEmpty` or a guard rejection.
pub async fn redo(state: &AppState, plan_id: Uuid, editor: &Editor) -> Result<Vec<Table>, PlanError> {
    let target = {
        let plans = state.plans.read().await;
        plans
            .get(&plan_id)
            .and_then(|p| p.history.peek_redo().cloned())
    };
    let Some(target) = target else {
        return Err(PlanError::HistoryEmpty("redo"));
    };
    commit_bulk(state, plan_id, editor, target, "redo", Step::Redo).await
}

async fn commit_bulk(
    state: &AppState,
    plan_id: Uuid,
    editor: &Editor,
    next: Vec<Table>,
    reason: &str,
    step: Step,
) -> Result<Vec<Table>, PlanError> {
    let guard = state.guard;
    let committed = next.clone();
    commit_tables(state, plan_id, editor, step, move |tables| {
        guard.check(plan_id, reason, &next, tables.as_slice())?;
        *tables = next;
        Ok(())
    })
    .await?;
    Ok(committed)
}

// =============================================================================
// VENUE, AREAS, SEATS
// =============================================================================

/// # Errors
///
/// Returns `Validation` unless width and height are positive and every
/// value is finite.
pub async fn set_venue(state: &AppState, plan_id: Uuid, editor: &Editor, venue: Venue) -> Result<Venue, PlanError> {
    if !venue.is_valid() {
        return Err(PlanError::Validation(format!(
            "venue needs finite width, height > 0 and min_aisle >= 0, got {}x{} aisle {}",
            venue.width, venue.height, venue.min_aisle
        )));
    }
    put_document(state, plan_id, editor, &keys::venue(plan_id), &venue).await?;
    info!(%plan_id, width = venue.width, height = venue.height, min_aisle = venue.min_aisle, "venue configured");
    Ok(venue)
}

/// Replace the hall areas. Degenerate polygons are stored but ignored by
/// the validator.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub async fn set_areas(state: &AppState, plan_id: Uuid, editor: &Editor, areas: Vec<Area>) -> Result<Vec<Area>, PlanError> {
    let degenerate = areas.iter().filter(|a| is_degenerate(&a.points)).count();
    if degenerate > 0 {
        warn!(%plan_id, degenerate, "areas include degenerate polygons");
    }
    put_document(state, plan_id, editor, &keys::areas(plan_id), &areas).await?;
    Ok(areas)
}

/// # Errors
///
/// Returns `Validation` for a seat with a non-finite coordinate.
pub async fn set_seats(state: &AppState, plan_id: Uuid, editor: &Editor, seats: Vec<Seat>) -> Result<Vec<Seat>, PlanError> {
    if let Some(bad) = seats.iter().find(|s| !s.x.is_finite() || !s.y.is_finite()) {
        return Err(PlanError::Validation(format!("seat {} has a non-finite position", bad.id)));
    }
    put_document(state, plan_id, editor, &keys::seats(plan_id), &seats).await?;
    Ok(seats)
}

// =============================================================================
// CONFLICTS AND RECOMMENDATIONS
// =============================================================================

/// Current banquet conflicts, memoized on the plan's documents.
///
/// # Errors
///
/// Returns a store error if any input cannot be read.
pub async fn conflicts(state: &AppState, plan_id: Uuid) -> Result<Arc<Vec<Conflict>>, PlanError> {
    let tables = load_tables(state, plan_id).await?;
    let areas = load_areas(state, plan_id).await?;
    let venue = load_venue(state, plan_id).await?;
    let guests = state.guests.list_guests(plan_id).await?;
    Ok(state.conflicts.validate(&tables, &areas, &guests, &venue))
}

/// Current ceremony seat conflicts.
///
/// # Errors
///
/// Returns a store error if any input cannot be read.
pub async fn seat_conflicts(state: &AppState, plan_id: Uuid) -> Result<Vec<Conflict>, PlanError> {
    let seats = load_seats(state, plan_id).await?;
    let areas = load_areas(state, plan_id).await?;
    Ok(validate::validate_seats(&seats, &areas))
}

/// Best tables for one guest.
///
/// # Errors
///
/// Returns `GuestNotFound` or a store error.
pub async fn recommend_for_guest(state: &AppState, plan_id: Uuid, guest_id: &str) -> Result<Vec<ScoredTable>, PlanError> {
    let tables = load_tables(state, plan_id).await?;
    let areas = load_areas(state, plan_id).await?;
    let venue = load_venue(state, plan_id).await?;
    let guests = state.guests.list_guests(plan_id).await?;
    let Some(guest) = guests.iter().find(|g| g.id == guest_id) else {
        return Err(PlanError::GuestNotFound(guest_id.to_string()));
    };

    let conflicts = state.conflicts.validate(&tables, &areas, &guests, &venue);
    let metas = recommend::table_meta(&tables, &guests, &conflicts);
    Ok(recommend::recommend(guest, &metas))
}

/// Seat every guest without a table and write the assignments back to the
/// guest directory. Returns what was assigned and who could not be placed.
///
/// # Errors
///
/// Returns a store or guest-directory error. Assignments written before a
/// failing one stay written.
pub async fn auto_assign(state: &AppState, plan_id: Uuid, editor: &Editor) -> Result<AutoAssignPlan, PlanError> {
    let tables = load_tables(state, plan_id).await?;
    let areas = load_areas(state, plan_id).await?;
    let venue = load_venue(state, plan_id).await?;
    let guests = state.guests.list_guests(plan_id).await?;

    let conflicts = state.conflicts.validate(&tables, &areas, &guests, &venue);
    let metas = recommend::table_meta(&tables, &guests, &conflicts);
    let plan = recommend::auto_assign(&guests, &metas);

    for assignment in &plan.assignments {
        state
            .guests
            .update_assignment(plan_id, &assignment.guest_id, Some(assignment.table_id.as_str()), Some(editor.client_id))
            .await?;
    }
    info!(%plan_id, assigned = plan.assignments.len(), unplaced = plan.unplaced.len(), "guests auto-assigned");
    Ok(plan)
}

/// Proposed fixes for every current conflict. Nothing is applied.
///
/// # Errors
///
/// Returns a store error if any input cannot be read.
pub async fn suggest_fixes(state: &AppState, plan_id: Uuid) -> Result<Vec<SuggestedAction>, PlanError> {
    let tables = load_tables(state, plan_id).await?;
    let areas = load_areas(state, plan_id).await?;
    let venue = load_venue(state, plan_id).await?;
    let guests = state.guests.list_guests(plan_id).await?;

    let conflicts = state.conflicts.validate(&tables, &areas, &guests, &venue);
    let metas = recommend::table_meta(&tables, &guests, &conflicts);
    let ctx = FixContext { tables: &tables, guests: &guests, areas: &areas, venue: &venue };
    Ok(recommend::suggest_fixes(&conflicts, &metas, &ctx))
}

/// Apply one suggested action on behalf of `editor`.
///
/// A position fix goes through the table lease: it is acquired for the move
/// and released afterwards unless the editor already held it.
///
/// # Errors
///
/// Returns `Denied` when another editor holds the table, or any error of
/// the underlying mutation.
pub async fn apply_action(
    state: &AppState,
    plan_id: Uuid,
    editor: &Editor,
    action: &SuggestedAction,
) -> Result<Applied, PlanError> {
    match action {
        SuggestedAction::Reassign { guest_id, to_table_id, .. } => {
            let guest = state
                .guests
                .update_assignment(plan_id, guest_id, Some(to_table_id.as_str()), Some(editor.client_id))
                .await?;
            info!(%plan_id, %guest_id, %to_table_id, "guest reassigned");
            Ok(Applied::Reassigned { guest })
        }
        SuggestedAction::FixPosition { table_id, x, y } => {
            let held = state
                .leases
                .holds(plan_id, TABLE_RESOURCE, table_id, editor.client_id)
                .await?;
            if !held {
                state
                    .leases
                    .acquire(plan_id, TABLE_RESOURCE, table_id, editor)
                    .await?;
            }

            let patch = TablePatch { x: Some(*x), y: Some(*y), ..TablePatch::default() };
            let result = update_table(state, plan_id, editor, table_id, &patch).await;

            if !held {
                if let Err(e) = state
                    .leases
                    .release(plan_id, TABLE_RESOURCE, table_id, editor.client_id)
                    .await
                {
                    warn!(error = %e, %plan_id, %table_id, "lease release after fix failed");
                }
            }
            Ok(Applied::Moved { table: result? })
        }
        SuggestedAction::FocusTable { table_id } => Ok(Applied::Focused { table_id: table_id.clone() }),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn ensure_finite(table: &Table) -> Result<(), PlanError> {
    if table.has_finite_geometry() {
        Ok(())
    } else {
        Err(GuardError::NonFinite { table_id: table.id.clone() }.into())
    }
}

async fn require_lease(state: &AppState, plan_id: Uuid, editor: &Editor, table_id: &str) -> Result<(), PlanError> {
    let held = state
        .leases
        .holds(plan_id, TABLE_RESOURCE, table_id, editor.client_id)
        .await?;
    if held {
        Ok(())
    } else {
        Err(LeaseError::Lost { resource_type: TABLE_RESOURCE.to_string(), resource_id: table_id.to_string() }.into())
    }
}

/// One read-modify-write on the table collection. `edit` runs on a copy of
/// the stored collection; an error leaves the store untouched.
async fn commit_tables<F>(state: &AppState, plan_id: Uuid, editor: &Editor, step: Step, edit: F) -> Result<(), PlanError>
where
    F: FnOnce(&mut Vec<Table>) -> Result<(), PlanError> + Send,
{
    let key = keys::tables(plan_id);
    register_echo(state, plan_id, editor.client_id, &key).await;

    let mut previous: Option<Vec<Table>> = None;
    let mut applied: Option<Vec<Table>> = None;
    let mut failure: Option<PlanError> = None;
    let result = state
        .store
        .read_modify_write(
            &key,
            Some(editor.client_id),
            Box::new(|current| {
                let stored: Vec<Table> = match current.map(|v| serde_json::from_value(v.clone())).transpose() {
                    Ok(tables) => tables.unwrap_or_default(),
                    Err(e) => {
                        failure = Some(StoreError::Codec(e).into());
                        return Write::Keep;
                    }
                };
                let mut next = stored.clone();
                if let Err(e) = edit(&mut next) {
                    failure = Some(e);
                    return Write::Keep;
                }
                match serde_json::to_value(&next) {
                    Ok(value) => {
                        previous = Some(stored);
                        applied = Some(next);
                        Write::Put(value)
                    }
                    Err(e) => {
                        failure = Some(StoreError::Codec(e).into());
                        Write::Keep
                    }
                }
            }),
        )
        .await;

    let committed = result.is_ok() && failure.is_none();
    let mut plans = state.plans.write().await;
    let live = plans.get_mut(&plan_id);
    match (live, previous, applied) {
        (Some(plan), Some(previous), Some(applied)) if committed => {
            let moved = match step {
                Step::Record => {
                    plan.history.record(previous);
                    true
                }
                Step::Undo => plan.history.undone(&applied, previous),
                Step::Redo => plan.history.redone(&applied, previous),
            };
            if !moved {
                debug!(%plan_id, ?step, "history target already applied by another editor");
            }
        }
        (Some(plan), ..) => plan.echoes.forget(editor.client_id, &key),
        (None, ..) => {}
    }
    drop(plans);

    result?;
    failure.map_or(Ok(()), Err)
}

/// Unconditional write of a whole plan document, tagged with the editor.
async fn put_document<T: Serialize + Sync>(
    state: &AppState,
    plan_id: Uuid,
    editor: &Editor,
    key: &str,
    value: &T,
) -> Result<(), PlanError> {
    register_echo(state, plan_id, editor.client_id, key).await;
    let result = crate::store::put_json(state.store.as_ref(), key, Some(editor.client_id), value).await;
    if result.is_err() {
        if let Some(plan) = state.plans.write().await.get_mut(&plan_id) {
            plan.echoes.forget(editor.client_id, key);
        }
    }
    Ok(result?)
}

async fn register_echo(state: &AppState, plan_id: Uuid, client_id: Uuid, key: &str) {
    if let Some(plan) = state.plans.write().await.get_mut(&plan_id) {
        plan.echoes.register(client_id, key);
    }
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;
