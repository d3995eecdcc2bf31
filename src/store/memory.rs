//! In-process store. Used when no database is configured and by tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use super::{Mutator, Store, StoreChange, StoreError, Subscription, Write};

const CHANGE_FEED_CAPACITY: usize = 1024;

pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, serde_json::Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { docs: Mutex::new(BTreeMap::new()), changes }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.docs.lock().await.get(key).cloned())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn read_modify_write(
        &self,
        key: &str,
        writer: Option<Uuid>,
        mutator: Mutator<'_>,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let mut docs = self.docs.lock().await;
        let decision = mutator(docs.get(key));
        let change = match decision {
            Write::Keep => None,
            Write::Put(value) => {
                docs.insert(key.to_string(), value.clone());
                Some(StoreChange { key: key.to_string(), value: Some(value), writer })
            }
            Write::Delete => docs
                .remove(key)
                .map(|_| StoreChange { key: key.to_string(), value: None, writer }),
        };
        let after = docs.get(key).cloned();

        // Published under the lock so per-key delivery order matches commit order.
        if let Some(change) = change {
            let _ = self.changes.send(change);
        }
        Ok(after)
    }

    fn subscribe(&self, prefix: &str) -> Subscription {
        Subscription::new(prefix, self.changes.subscribe())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
