//! Guest directory — boundary to the guest-management collaborator.
//!
//! DESIGN
//! ======
//! The engine only reads the roster and writes back one field per guest,
//! `table_ref`. `StoreGuestDirectory` keeps the roster as a single document
//! under `plan/{id}/guests` so a plan can run without an external roster
//! service; the write-back is one read-modify-write on that document.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::state::Guest;
use crate::store::{Store, StoreError, Write, get_json, keys};

#[derive(Debug, thiserror::Error)]
pub enum GuestError {
    #[error("guest not found: {0}")]
    NotFound(String),
    #[error("duplicate guest id: {0}")]
    Duplicate(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for GuestError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_GUEST_NOT_FOUND",
            Self::Duplicate(_) => "E_VALIDATION",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait GuestDirectory: Send + Sync {
    /// Full roster of a plan, in roster order.
    async fn list_guests(&self, plan_id: Uuid) -> Result<Vec<Guest>, GuestError>;

    /// Write back one guest's table reference. `None` unassigns.
    async fn update_assignment(
        &self,
        plan_id: Uuid,
        guest_id: &str,
        table_ref: Option<&str>,
        writer: Option<Uuid>,
    ) -> Result<Guest, GuestError>;

    /// Replace the roster wholesale.
    async fn import(&self, plan_id: Uuid, guests: Vec<Guest>, writer: Option<Uuid>) -> Result<usize, GuestError>;
}

/// Roster kept as a plan document in the shared store.
pub struct StoreGuestDirectory {
    store: Arc<dyn Store>,
}

impl StoreGuestDirectory {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl GuestDirectory for StoreGuestDirectory {
    async fn list_guests(&self, plan_id: Uuid) -> Result<Vec<Guest>, GuestError> {
        Ok(get_json::<Vec<Guest>>(self.store.as_ref(), &keys::guests(plan_id))
            .await?
            .unwrap_or_default())
    }

    async fn update_assignment(
        &self,
        plan_id: Uuid,
        guest_id: &str,
        table_ref: Option<&str>,
        writer: Option<Uuid>,
    ) -> Result<Guest, GuestError> {
        let table_ref = table_ref.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string);
        let mut updated: Option<Guest> = None;
        let mut codec: Option<serde_json::Error> = None;

        self.store
            .read_modify_write(
                &keys::guests(plan_id),
                writer,
                Box::new(|current| {
                    let Some(value) = current else {
                        return Write::Keep;
                    };
                    let mut roster: Vec<Guest> = match serde_json::from_value(value.clone()) {
                        Ok(r) => r,
                        Err(e) => {
                            codec = Some(e);
                            return Write::Keep;
                        }
                    };
                    let Some(guest) = roster.iter_mut().find(|g| g.id == guest_id) else {
                        return Write::Keep;
                    };
                    guest.table_ref = table_ref;
                    updated = Some(guest.clone());
                    match serde_json::to_value(&roster) {
                        Ok(v) => Write::Put(v),
                        Err(e) => {
                            codec = Some(e);
                            updated = None;
                            Write::Keep
                        }
                    }
                }),
            )
            .await?;

        if let Some(e) = codec {
            return Err(StoreError::Codec(e).into());
        }
        updated.ok_or_else(|| GuestError::NotFound(guest_id.to_string()))
    }

    async fn import(&self, plan_id: Uuid, guests: Vec<Guest>, writer: Option<Uuid>) -> Result<usize, GuestError> {
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = guests.iter().find(|g| !seen.insert(g.id.as_str())) {
            return Err(GuestError::Duplicate(dup.id.clone()));
        }
        let count = guests.len();
        let encoded = serde_json::to_value(&guests).map_err(StoreError::from)?;
        self.store
            .read_modify_write(&keys::guests(plan_id), writer, Box::new(move |_| Write::Put(encoded)))
            .await?;
        info!(%plan_id, count, "guest roster imported");
        Ok(count)
    }
}

#[cfg(test)]
#[path = "guests_test.rs"]
mod tests;
