//! Document store — transactional read-modify-write plus change feed.
//!
//! ARCHITECTURE
//! ============
//! All coordination between editors happens through this trait. Every shared
//! document (table collection, areas, venue, each lease, each presence entry)
//! is one JSON value under one key. `read_modify_write` is atomic per key;
//! there is no ordering guarantee across keys.
//!
//! DESIGN
//! ======
//! Mutators are synchronous closures run inside the store's critical section
//! and must not block. They decide the outcome (`Keep`, `Put`, `Delete`) from
//! the current value alone; callers capture any richer result through the
//! closure's environment. Every committed change is published to subscribers
//! tagged with the writer's client id for self-echo suppression.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) | Self::Database(_) => "E_STORE_UNAVAILABLE",
            Self::Codec(_) => "E_STORE_CODEC",
        }
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::Codec(_))
    }
}

/// Decision returned by a mutator.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Leave the document untouched. No change is published.
    Keep,
    Put(serde_json::Value),
    Delete,
}

/// Mutator run inside the per-key critical section.
pub type Mutator<'a> = Box<dyn FnOnce(Option<&serde_json::Value>) -> Write + Send + 'a>;

/// A committed change, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    /// New value, `None` when the document was deleted.
    pub value: Option<serde_json::Value>,
    /// Client that performed the write, if tagged.
    pub writer: Option<Uuid>,
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// All documents whose key starts with `prefix`, sorted by key.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError>;

    /// Keys under `prefix`, sorted, without reading their documents.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically read the document under `key`, apply `mutator`, and commit
    /// its decision. Returns the value after the call.
    async fn read_modify_write(
        &self,
        key: &str,
        writer: Option<Uuid>,
        mutator: Mutator<'_>,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    /// Subscribe to changes under `prefix`. Delivery is at-least-once.
    fn subscribe(&self, prefix: &str) -> Subscription;
}

// =============================================================================
// TYPED HELPERS
// =============================================================================

/// Read and decode a document.
///
/// # Errors
///
/// Returns `Codec` if the stored value does not decode as `T`.
pub async fn get_json<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and unconditionally write a document.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn Store,
    key: &str,
    writer: Option<Uuid>,
    value: &T,
) -> Result<(), StoreError> {
    let encoded = serde_json::to_value(value)?;
    store
        .read_modify_write(key, writer, Box::new(move |_| Write::Put(encoded)))
        .await?;
    Ok(())
}

/// Unconditionally delete a document.
///
/// # Errors
///
/// Returns a store error if the delete fails.
pub async fn delete(store: &dyn Store, key: &str, writer: Option<Uuid>) -> Result<(), StoreError> {
    store
        .read_modify_write(key, writer, Box::new(|_| Write::Delete))
        .await?;
    Ok(())
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Prefix-filtered view of a store's change feed.
pub struct Subscription {
    prefix: String,
    rx: broadcast::Receiver<StoreChange>,
}

impl Subscription {
    #[must_use]
    pub fn new(prefix: impl Into<String>, rx: broadcast::Receiver<StoreChange>) -> Self {
        Self { prefix: prefix.into(), rx }
    }

    /// Next change under the prefix. `None` once the store is gone.
    ///
    /// A lagging subscriber skips the changes it missed; the next change for
    /// each key carries the full document, so consumers converge.
    pub async fn recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.key.starts_with(&self.prefix) => return Some(change),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(prefix = %self.prefix, skipped, "store subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// =============================================================================
// KEYS
// =============================================================================

/// Key layout for per-plan documents.
pub mod keys {
    use uuid::Uuid;

    #[must_use]
    pub fn plan_prefix(plan_id: Uuid) -> String {
        format!("plan/{plan_id}/")
    }

    #[must_use]
    pub fn venue(plan_id: Uuid) -> String {
        format!("plan/{plan_id}/venue")
    }

    #[must_use]
    pub fn tables(plan_id: Uuid) -> String {
        format!("plan/{plan_id}/tables")
    }

    #[must_use]
    pub fn areas(plan_id: Uuid) -> String {
        format!("plan/{plan_id}/areas")
    }

    #[must_use]
    pub fn seats(plan_id: Uuid) -> String {
        format!("plan/{plan_id}/seats")
    }

    #[must_use]
    pub fn guests(plan_id: Uuid) -> String {
        format!("plan/{plan_id}/guests")
    }

    #[must_use]
    pub fn lease_prefix(plan_id: Uuid) -> String {
        format!("plan/{plan_id}/lease/")
    }

    #[must_use]
    pub fn lease(plan_id: Uuid, resource_type: &str, resource_id: &str) -> String {
        format!("plan/{plan_id}/lease/{resource_type}/{resource_id}")
    }

    #[must_use]
    pub fn presence_prefix(plan_id: Uuid) -> String {
        format!("plan/{plan_id}/presence/")
    }

    #[must_use]
    pub fn presence(plan_id: Uuid, client_id: Uuid) -> String {
        format!("plan/{plan_id}/presence/{client_id}")
    }

    /// Document kind of a plan key: `tables`, `lease`, `presence`, ...
    #[must_use]
    pub fn kind(key: &str) -> Option<&str> {
        let rest = key.strip_prefix("plan/")?;
        let (_, tail) = rest.split_once('/')?;
        Some(tail.split('/').next().unwrap_or(tail))
    }

    /// Distinct plan ids among `keys`, in order.
    #[must_use]
    pub fn plan_ids<'a>(keys: impl IntoIterator<Item = &'a String>) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = keys.into_iter().filter_map(|key| plan_id(key)).collect();
        ids.dedup();
        ids
    }

    /// Plan id embedded in a key.
    #[must_use]
    pub fn plan_id(key: &str) -> Option<Uuid> {
        let rest = key.strip_prefix("plan/")?;
        let (id, _) = rest.split_once('/')?;
        id.parse().ok()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
