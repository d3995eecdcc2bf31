//! Postgres-backed store.
//!
//! DESIGN
//! ======
//! Documents live in `plan_documents`. Read-modify-write runs inside a
//! transaction that first takes a transaction-scoped advisory lock on the key,
//! which serializes writers even when the row does not exist yet (a plain
//! `SELECT ... FOR UPDATE` locks nothing in that case).
//!
//! Commits emit `pg_notify` with `{key, writer}` only; payloads are size
//! limited, so a listener task re-reads the document and republishes it on
//! the local change feed. Every process attached to the same database sees
//! every change, its own included.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Mutator, Store, StoreChange, StoreError, Subscription, Write};

const NOTIFY_CHANNEL: &str = "plan_documents";
const CHANGE_FEED_CAPACITY: usize = 4096;
const LISTENER_RETRY_MS: u64 = 500;

#[derive(Debug, Serialize, Deserialize)]
struct NotifyPayload {
    key: String,
    writer: Option<Uuid>,
}

pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<StoreChange>,
    listener: JoinHandle<()>,
}

impl PgStore {
    /// Wrap a migrated pool and start the notification listener.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let listener = spawn_listener(pool.clone(), changes.clone());
        Self { pool, changes, listener }
    }
}

impl Drop for PgStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        fetch_value(&self.pool, key).await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            r"SELECT key, value FROM plan_documents WHERE key LIKE $1 ESCAPE '\' ORDER BY key",
        )
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let keys = sqlx::query_scalar::<_, String>(
            r"SELECT key FROM plan_documents WHERE key LIKE $1 ESCAPE '\' ORDER BY key",
        )
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn read_modify_write(
        &self,
        key: &str,
        writer: Option<Uuid>,
        mutator: Mutator<'_>,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        let current: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT value FROM plan_documents WHERE key = $1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        let after = match mutator(current.as_ref()) {
            Write::Keep => {
                tx.commit().await?;
                return Ok(current);
            }
            Write::Put(value) => {
                sqlx::query(
                    "INSERT INTO plan_documents (key, value, writer, updated_at) VALUES ($1, $2, $3, now()) \
                     ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, writer = EXCLUDED.writer, updated_at = now()",
                )
                .bind(key)
                .bind(&value)
                .bind(writer)
                .execute(&mut *tx)
                .await?;
                Some(value)
            }
            Write::Delete => {
                let result = sqlx::query("DELETE FROM plan_documents WHERE key = $1")
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    tx.commit().await?;
                    return Ok(None);
                }
                None
            }
        };

        let payload = serde_json::to_string(&NotifyPayload { key: key.to_string(), writer })?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(payload)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(after)
    }

    fn subscribe(&self, prefix: &str) -> Subscription {
        Subscription::new(prefix, self.changes.subscribe())
    }
}

// =============================================================================
// LISTENER
// =============================================================================

fn spawn_listener(pool: PgPool, changes: broadcast::Sender<StoreChange>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(error = %e, "store listener connect failed; retrying");
                    tokio::time::sleep(Duration::from_millis(LISTENER_RETRY_MS)).await;
                    continue;
                }
            };
            if let Err(e) = listener.listen(NOTIFY_CHANNEL).await {
                error!(error = %e, "store listener subscribe failed; retrying");
                tokio::time::sleep(Duration::from_millis(LISTENER_RETRY_MS)).await;
                continue;
            }
            info!(channel = NOTIFY_CHANNEL, "store listener attached");

            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => notification,
                    Err(e) => {
                        warn!(error = %e, "store listener recv failed; reconnecting");
                        break;
                    }
                };
                let payload: NotifyPayload = match serde_json::from_str(notification.payload()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "store listener got malformed payload");
                        continue;
                    }
                };
                match fetch_value(&pool, &payload.key).await {
                    Ok(value) => {
                        let _ = changes.send(StoreChange { key: payload.key, value, writer: payload.writer });
                    }
                    Err(e) => warn!(error = %e, key = %payload.key, "store listener re-read failed"),
                }
            }
            tokio::time::sleep(Duration::from_millis(LISTENER_RETRY_MS)).await;
        }
    })
}

// =============================================================================
// HELPERS
// =============================================================================

async fn fetch_value(pool: &PgPool, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
    let value: Option<serde_json::Value> = sqlx::query_scalar("SELECT value FROM plan_documents WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// `LIKE` pattern matching keys that start with `prefix`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
