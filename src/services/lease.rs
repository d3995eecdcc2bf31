//! Lease service — exclusive, time-bounded holds on plan resources.
//!
//! DESIGN
//! ======
//! One lease document per resource under `plan/{id}/lease/{type}/{id}`.
//! Every state transition is a single store read-modify-write, so two
//! acquires on the same resource serialize and at most one wins. Validity is
//! purely time based: a lease is live while `now - acquired_at < ttl`, which
//! lets any client reclaim an orphan without a disconnect signal.
//!
//! `acquire` never waits. It grants, or it reports who holds the resource and
//! how long until the hold lapses.
//!
//! Held leases are renewed by a `LeaseHandle` that owns its heartbeat task.
//! Renewal that finds the lease gone or stolen stops the heartbeat.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::frame::{Data, ErrorCode, now_ms};
use crate::services::heartbeat::{self, Beat, HeartbeatHandle, RetryPolicy};
use crate::state::{Editor, Lease};
use crate::store::{Store, StoreError, Write, keys};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("{resource_type} {resource_id} is locked by {holder_name}")]
    Denied {
        resource_type: String,
        resource_id: String,
        holder_name: String,
        holder_client_id: Uuid,
        expires_in_ms: i64,
    },
    #[error("lease on {resource_type} {resource_id} is no longer held")]
    Lost { resource_type: String, resource_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for LeaseError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Denied { .. } => "E_LEASE_DENIED",
            Self::Lost { .. } => "E_LEASE_LOST",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Denied { .. } => true,
            Self::Lost { .. } => false,
            Self::Store(e) => e.retryable(),
        }
    }

    fn details(&self) -> Data {
        let Self::Denied { holder_name, holder_client_id, expires_in_ms, .. } = self else {
            return Data::new();
        };
        Data::from([
            ("holder_name".to_string(), holder_name.clone().into()),
            ("holder_client_id".to_string(), holder_client_id.to_string().into()),
            ("expires_in_ms".to_string(), (*expires_in_ms).into()),
        ])
    }
}

/// Outcome of a lease mutator, captured out of the store's critical section.
enum Decision {
    Granted,
    Denied(Lease),
    Missing,
}

#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl LeaseManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn ttl_ms(&self) -> i64 {
        self.config.lease_ttl_ms
    }

    /// Acquire a lease for `editor`.
    ///
    /// # Errors
    ///
    /// Returns `Denied` when another client holds a live lease.
    pub async fn acquire(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        editor: &Editor,
    ) -> Result<Lease, LeaseError> {
        self.acquire_at(plan_id, resource_type, resource_id, editor, now_ms())
            .await
    }

    /// `acquire` with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `Denied` when another client holds a live lease at `now`.
    pub async fn acquire_at(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        editor: &Editor,
        now: i64,
    ) -> Result<Lease, LeaseError> {
        let key = keys::lease(plan_id, resource_type, resource_id);
        let lease = Lease {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            holder_client_id: editor.client_id,
            holder_user_id: editor.user_id,
            display_name: editor.display_name.clone(),
            acquired_at: now,
        };
        let encoded = serde_json::to_value(&lease).map_err(StoreError::from)?;
        let ttl = self.config.lease_ttl_ms;
        let client_id = editor.client_id;

        let mut decision = Decision::Missing;
        self.store
            .read_modify_write(
                &key,
                Some(client_id),
                Box::new(|current| match decode(current) {
                    Some(held) if held.holder_client_id != client_id && held.is_live(now, ttl) => {
                        decision = Decision::Denied(held);
                        Write::Keep
                    }
                    _ => {
                        decision = Decision::Granted;
                        Write::Put(encoded)
                    }
                }),
            )
            .await?;

        match decision {
            Decision::Denied(held) => Err(LeaseError::Denied {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                expires_in_ms: ttl - (now - held.acquired_at),
                holder_name: held.display_name,
                holder_client_id: held.holder_client_id,
            }),
            Decision::Granted | Decision::Missing => {
                info!(%plan_id, resource_type, resource_id, client_id = %editor.client_id, "lease granted");
                Ok(lease)
            }
        }
    }

    /// Extend a held lease.
    ///
    /// # Errors
    ///
    /// Returns `Lost` when the lease is absent or held by another client.
    pub async fn renew(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        client_id: Uuid,
    ) -> Result<Lease, LeaseError> {
        self.renew_at(plan_id, resource_type, resource_id, client_id, now_ms())
            .await
    }

    /// `renew` with an explicit clock. An expired lease that nobody reclaimed
    /// is still renewable by its holder.
    ///
    /// # Errors
    ///
    /// Returns `Lost` when the lease is absent or held by another client.
    pub async fn renew_at(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        client_id: Uuid,
        now: i64,
    ) -> Result<Lease, LeaseError> {
        let key = keys::lease(plan_id, resource_type, resource_id);
        let mut renewed: Option<Lease> = None;
        self.store
            .read_modify_write(
                &key,
                Some(client_id),
                Box::new(|current| {
                    let Some(mut held) = decode(current) else {
                        return Write::Keep;
                    };
                    if held.holder_client_id != client_id {
                        return Write::Keep;
                    }
                    held.acquired_at = now;
                    match serde_json::to_value(&held) {
                        Ok(value) => {
                            renewed = Some(held);
                            Write::Put(value)
                        }
                        Err(_) => Write::Keep,
                    }
                }),
            )
            .await?;

        renewed.ok_or_else(|| LeaseError::Lost {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
        })
    }

    /// Release a lease. Deletes only when `client_id` holds it or it has
    /// expired; returns whether a document was removed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction fails.
    pub async fn release(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        client_id: Uuid,
    ) -> Result<bool, LeaseError> {
        self.release_at(plan_id, resource_type, resource_id, client_id, now_ms())
            .await
    }

    /// `release` with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction fails.
    pub async fn release_at(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        client_id: Uuid,
        now: i64,
    ) -> Result<bool, LeaseError> {
        let key = keys::lease(plan_id, resource_type, resource_id);
        let ttl = self.config.lease_ttl_ms;
        let mut decision = Decision::Missing;
        self.store
            .read_modify_write(
                &key,
                Some(client_id),
                Box::new(|current| {
                    let Some(held) = decode(current) else {
                        return if current.is_some() { Write::Delete } else { Write::Keep };
                    };
                    if held.holder_client_id == client_id || !held.is_live(now, ttl) {
                        decision = Decision::Granted;
                        Write::Delete
                    } else {
                        decision = Decision::Denied(held);
                        Write::Keep
                    }
                }),
            )
            .await?;

        Ok(matches!(decision, Decision::Granted))
    }

    /// Whether `client_id` holds a live lease on the resource.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn holds(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        client_id: Uuid,
    ) -> Result<bool, LeaseError> {
        self.holds_at(plan_id, resource_type, resource_id, client_id, now_ms())
            .await
    }

    /// `holds` with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn holds_at(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        client_id: Uuid,
        now: i64,
    ) -> Result<bool, LeaseError> {
        let key = keys::lease(plan_id, resource_type, resource_id);
        let current = self.store.get(&key).await?;
        Ok(decode(current.as_ref())
            .is_some_and(|held| held.holder_client_id == client_id && held.is_live(now, self.config.lease_ttl_ms)))
    }

    /// Live leases of a plan, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    pub async fn list(&self, plan_id: Uuid) -> Result<Vec<Lease>, LeaseError> {
        self.list_at(plan_id, now_ms()).await
    }

    /// `list` with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    pub async fn list_at(&self, plan_id: Uuid, now: i64) -> Result<Vec<Lease>, LeaseError> {
        let docs = self.store.list_prefix(&keys::lease_prefix(plan_id)).await?;
        Ok(docs
            .iter()
            .filter_map(|(_, value)| decode(Some(value)))
            .filter(|lease| lease.is_live(now, self.config.lease_ttl_ms))
            .collect())
    }

    /// Delete every expired lease under `prefix`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails. Individual deletes that
    /// fail are logged and skipped.
    pub async fn sweep_expired_at(&self, prefix: &str, now: i64) -> Result<usize, LeaseError> {
        let ttl = self.config.lease_ttl_ms;
        let docs = self.store.list_prefix(prefix).await?;
        let mut removed = 0;
        for (key, value) in docs {
            if keys::kind(&key) != Some("lease") {
                continue;
            }
            if decode(Some(&value)).is_some_and(|lease| lease.is_live(now, ttl)) {
                continue;
            }
            let mut deleted = false;
            let result = self
                .store
                .read_modify_write(
                    &key,
                    None,
                    Box::new(|current| match decode(current) {
                        Some(lease) if lease.is_live(now, ttl) => Write::Keep,
                        _ if current.is_none() => Write::Keep,
                        _ => {
                            deleted = true;
                            Write::Delete
                        }
                    }),
                )
                .await;
            match result {
                Ok(_) if deleted => removed += 1,
                Ok(_) => {}
                Err(e) => warn!(error = %e, %key, "lease sweep delete failed"),
            }
        }
        Ok(removed)
    }

    /// Acquire and start renewing. The returned handle owns the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `Denied` when another client holds a live lease.
    pub async fn hold(
        &self,
        plan_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        editor: &Editor,
    ) -> Result<LeaseHandle, LeaseError> {
        let lease = self
            .acquire(plan_id, resource_type, resource_id, editor)
            .await?;
        let heartbeat = self.spawn_renewal(plan_id, &lease);
        Ok(LeaseHandle { manager: self.clone(), plan_id, lease, heartbeat: Some(heartbeat) })
    }

    fn spawn_renewal(&self, plan_id: Uuid, lease: &Lease) -> HeartbeatHandle {
        let manager = self.clone();
        let resource_type = lease.resource_type.clone();
        let resource_id = lease.resource_id.clone();
        let client_id = lease.holder_client_id;
        let policy = RetryPolicy::new(self.config.heartbeat_retries, self.config.heartbeat_retry_base_ms);
        heartbeat::spawn("lease", self.config.lease_renew_interval(), policy, move || {
            let manager = manager.clone();
            let resource_type = resource_type.clone();
            let resource_id = resource_id.clone();
            async move {
                match manager
                    .renew(plan_id, &resource_type, &resource_id, client_id)
                    .await
                {
                    Ok(_) => Ok(Beat::Continue),
                    Err(LeaseError::Lost { .. }) => {
                        warn!(%plan_id, resource_type, resource_id, %client_id, "lease lost; renewal stopped");
                        Ok(Beat::Stop)
                    }
                    Err(e) => Err(e),
                }
            }
        })
    }
}

fn decode(value: Option<&serde_json::Value>) -> Option<Lease> {
    value.and_then(|v| serde_json::from_value(v.clone()).ok())
}

// =============================================================================
// HANDLE
// =============================================================================

/// A held lease with its renewal task. Dropping the handle stops renewal;
/// the lease then lapses after one TTL. Call `release` to free it at once.
pub struct LeaseHandle {
    manager: LeaseManager,
    plan_id: Uuid,
    lease: Lease,
    heartbeat: Option<HeartbeatHandle>,
}

impl LeaseHandle {
    #[must_use]
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    #[must_use]
    pub fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    /// Whether the renewal task is still running.
    #[must_use]
    pub fn is_renewing(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop renewal and release the lease.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    pub async fn release(mut self) -> Result<bool, LeaseError> {
        self.heartbeat.take();
        self.manager
            .release(
                self.plan_id,
                &self.lease.resource_type,
                &self.lease.resource_id,
                self.lease.holder_client_id,
            )
            .await
    }
}

#[cfg(test)]
#[path = "lease_test.rs"]
mod tests;
