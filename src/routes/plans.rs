//! Read-only plan routes for export and reporting collaborators.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::services::guests::GuestError;
use crate::services::lease::LeaseError;
use crate::services::plan::{self, PlanError};
use crate::services::recommend::ScoredTable;
use crate::services::validate::Conflict;
use crate::state::{AppState, PresenceEntry, Table};

#[derive(Deserialize)]
pub struct RecommendQuery {
    pub guest_id: String,
}

/// `GET /api/plans/{id}/tables` — current table collection.
pub async fn list_tables(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Vec<Table>>, StatusCode> {
    let tables = plan::load_tables(&state, plan_id)
        .await
        .map_err(plan_error_to_status)?;
    Ok(Json(tables))
}

/// `GET /api/plans/{id}/conflicts` — banquet conflicts of the current state.
pub async fn list_conflicts(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Vec<Conflict>>, StatusCode> {
    let conflicts = plan::conflicts(&state, plan_id)
        .await
        .map_err(plan_error_to_status)?;
    Ok(Json(conflicts.as_ref().clone()))
}

/// `GET /api/plans/{id}/presence` — live editors.
pub async fn list_presence(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Vec<PresenceEntry>>, StatusCode> {
    let entries = state
        .presence
        .list(plan_id)
        .await
        .map_err(|e| plan_error_to_status(e.into()))?;
    Ok(Json(entries))
}

/// `GET /api/plans/{id}/recommendations?guest_id=` — best tables for a guest.
pub async fn recommendations(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Query(query): Query<RecommendQuery>,
) -> Result<Json<Vec<ScoredTable>>, StatusCode> {
    let scored = plan::recommend_for_guest(&state, plan_id, &query.guest_id)
        .await
        .map_err(plan_error_to_status)?;
    Ok(Json(scored))
}

pub(crate) fn plan_error_to_status(err: PlanError) -> StatusCode {
    match err {
        PlanError::Validation(_) | PlanError::Guest(GuestError::Duplicate(_)) => StatusCode::BAD_REQUEST,
        PlanError::TableNotFound(_) | PlanError::GuestNotFound(_) | PlanError::Guest(GuestError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        PlanError::HistoryEmpty(_)
        | PlanError::Lease(LeaseError::Denied { .. } | LeaseError::Lost { .. }) => StatusCode::CONFLICT,
        PlanError::Guard(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PlanError::Store(_) | PlanError::Lease(LeaseError::Store(_)) | PlanError::Guest(GuestError::Store(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
#[path = "plans_test.rs"]
mod tests;
