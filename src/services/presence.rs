//! Presence service — who is editing a plan right now.
//!
//! DESIGN
//! ======
//! Each connected editor owns one entry under `plan/{id}/presence/{client}`
//! and rewrites it on a fixed heartbeat and on every tab change. Nothing
//! expires entries actively: readers filter out anything older than the
//! staleness window and delete what they filtered, so a crashed client
//! disappears from every view without a disconnect signal.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::frame::now_ms;
use crate::services::heartbeat::{self, Beat, HeartbeatHandle, RetryPolicy};
use crate::state::{Editor, PresenceEntry};
use crate::store::{Store, StoreError, Write, keys};

#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Write the editor's entry with the current time.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    pub async fn heartbeat(
        &self,
        plan_id: Uuid,
        editor: &Editor,
        active_tab: Option<&str>,
    ) -> Result<PresenceEntry, StoreError> {
        self.heartbeat_at(plan_id, editor, active_tab, now_ms()).await
    }

    /// `heartbeat` with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    pub async fn heartbeat_at(
        &self,
        plan_id: Uuid,
        editor: &Editor,
        active_tab: Option<&str>,
        now: i64,
    ) -> Result<PresenceEntry, StoreError> {
        let entry = PresenceEntry {
            client_id: editor.client_id,
            user_id: editor.user_id,
            display_name: editor.display_name.clone(),
            color: editor.color.clone(),
            active_tab: active_tab.map(str::to_string),
            last_heartbeat_at: now,
        };
        let encoded = serde_json::to_value(&entry)?;
        self.store
            .read_modify_write(
                &keys::presence(plan_id, editor.client_id),
                Some(editor.client_id),
                Box::new(move |_| Write::Put(encoded)),
            )
            .await?;
        Ok(entry)
    }

    /// Live entries sorted by display name. Stale entries seen on the way
    /// are deleted.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    pub async fn list(&self, plan_id: Uuid) -> Result<Vec<PresenceEntry>, StoreError> {
        self.list_at(plan_id, now_ms()).await
    }

    /// `list` with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    pub async fn list_at(&self, plan_id: Uuid, now: i64) -> Result<Vec<PresenceEntry>, StoreError> {
        let docs = self.store.list_prefix(&keys::presence_prefix(plan_id)).await?;
        let mut live = Vec::with_capacity(docs.len());
        for (key, value) in docs {
            match serde_json::from_value::<PresenceEntry>(value) {
                Ok(entry) if self.is_live(&entry, now) => live.push(entry),
                _ => {
                    self.collect(&key, now).await;
                }
            }
        }
        live.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        Ok(live)
    }

    /// Remove the editor's own entry.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    pub async fn leave(&self, plan_id: Uuid, client_id: Uuid) -> Result<(), StoreError> {
        crate::store::delete(self.store.as_ref(), &keys::presence(plan_id, client_id), Some(client_id)).await
    }

    /// Delete every stale entry under `prefix`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    pub async fn sweep_stale_at(&self, prefix: &str, now: i64) -> Result<usize, StoreError> {
        let docs = self.store.list_prefix(prefix).await?;
        let mut removed = 0;
        for (key, value) in docs {
            if keys::kind(&key) != Some("presence") {
                continue;
            }
            let live = serde_json::from_value::<PresenceEntry>(value).is_ok_and(|entry| self.is_live(&entry, now));
            if !live && self.collect(&key, now).await {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Start heartbeating for `editor`. Writes the first entry immediately.
    ///
    /// # Errors
    ///
    /// Returns a store error if the first write fails.
    pub async fn join(&self, plan_id: Uuid, editor: Editor) -> Result<PresenceHandle, StoreError> {
        self.heartbeat(plan_id, &editor, None).await?;
        let tab = Arc::new(Mutex::new(None::<String>));
        let tracker = self.clone();
        let beat_editor = editor.clone();
        let beat_tab = tab.clone();
        let policy = RetryPolicy::new(self.config.heartbeat_retries, self.config.heartbeat_retry_base_ms);
        let heartbeat = heartbeat::spawn("presence", self.config.presence_heartbeat(), policy, move || {
            let tracker = tracker.clone();
            let editor = beat_editor.clone();
            let tab = beat_tab.clone();
            async move {
                let active_tab = tab.lock().await.clone();
                tracker
                    .heartbeat(plan_id, &editor, active_tab.as_deref())
                    .await
                    .map(|_| Beat::Continue)
            }
        });
        Ok(PresenceHandle { tracker: self.clone(), plan_id, editor, tab, heartbeat: Some(heartbeat) })
    }

    fn is_live(&self, entry: &PresenceEntry, now: i64) -> bool {
        now - entry.last_heartbeat_at < self.config.presence_ttl_ms
    }

    /// Delete `key` if it is still stale (or undecodable) at commit time.
    async fn collect(&self, key: &str, now: i64) -> bool {
        let ttl = self.config.presence_ttl_ms;
        let mut deleted = false;
        let result = self
            .store
            .read_modify_write(
                key,
                None,
                Box::new(|current| {
                    let Some(value) = current else {
                        return Write::Keep;
                    };
                    let stale = serde_json::from_value::<PresenceEntry>(value.clone())
                        .map_or(true, |entry| now - entry.last_heartbeat_at >= ttl);
                    if stale {
                        deleted = true;
                        Write::Delete
                    } else {
                        Write::Keep
                    }
                }),
            )
            .await;
        if let Err(e) = result {
            warn!(error = %e, key, "presence collect failed");
        } else if deleted {
            debug!(key, "stale presence collected");
        }
        deleted
    }
}

/// A joined editor's presence. Dropping it stops the heartbeat; the entry
/// then goes stale on its own. Call `leave` on graceful shutdown.
pub struct PresenceHandle {
    tracker: PresenceTracker,
    plan_id: Uuid,
    editor: Editor,
    tab: Arc<Mutex<Option<String>>>,
    heartbeat: Option<HeartbeatHandle>,
}

impl PresenceHandle {
    #[must_use]
    pub fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    /// Record a tab change and heartbeat immediately.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    pub async fn focus(&self, active_tab: Option<&str>) -> Result<PresenceEntry, StoreError> {
        *self.tab.lock().await = active_tab.map(str::to_string);
        self.tracker
            .heartbeat(self.plan_id, &self.editor, active_tab)
            .await
    }

    /// Stop heartbeating and remove the entry.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    pub async fn leave(mut self) -> Result<(), StoreError> {
        self.heartbeat.take();
        self.tracker
            .leave(self.plan_id, self.editor.client_id)
            .await
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
