//! Change relay — store change feed to connected clients.
//!
//! DESIGN
//! ======
//! One relay task per live plan subscribes to `plan/{id}/` and turns every
//! committed change into a notification frame for each connected client.
//! Delivery is best effort: a client whose channel is full misses the frame
//! and converges on the next change to the same document.
//!
//! Self-echo suppression: a writer registers the `(client, key)` pair before
//! it commits and forgets it if the commit changed nothing. The first change
//! that matches a pending pair is not sent back to that writer.

use std::collections::HashMap;

use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::state::AppState;
use crate::store::{StoreChange, keys};

// =============================================================================
// ECHO FILTER
// =============================================================================

/// Pending self-echoes per `(writer, key)`.
#[derive(Debug, Default)]
pub struct EchoFilter {
    pending: HashMap<(Uuid, String), usize>,
}

impl EchoFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect one echo of a write by `writer` to `key`.
    pub fn register(&mut self, writer: Uuid, key: &str) {
        *self.pending.entry((writer, key.to_string())).or_default() += 1;
    }

    /// Drop one expected echo; the write it belonged to changed nothing.
    pub fn forget(&mut self, writer: Uuid, key: &str) {
        self.take(writer, key);
    }

    /// Whether this change is the writer's own echo. Consumes the match.
    pub fn should_skip(&mut self, writer: Uuid, key: &str) -> bool {
        self.take(writer, key)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.values().sum()
    }

    fn take(&mut self, writer: Uuid, key: &str) -> bool {
        let slot = (writer, key.to_string());
        let Some(count) = self.pending.get_mut(&slot) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.pending.remove(&slot);
        }
        true
    }
}

// =============================================================================
// CHANGE FRAMES
// =============================================================================

/// Notification frame for a committed change, `None` for keys clients do
/// not follow.
#[must_use]
pub fn change_frame(plan_id: Uuid, change: &StoreChange) -> Option<Frame> {
    let value = change.value.clone().unwrap_or(serde_json::Value::Null);
    let list = || change.value.clone().unwrap_or_else(|| serde_json::json!([]));
    let mut data = Data::new();

    let syscall = match keys::kind(&change.key)? {
        "tables" => {
            data.insert("tables".into(), list());
            "table:snapshot"
        }
        "venue" => {
            data.insert("venue".into(), value);
            "plan:venue"
        }
        "areas" => {
            data.insert("areas".into(), list());
            "plan:areas"
        }
        "seats" => {
            data.insert("seats".into(), list());
            "plan:seats"
        }
        "guests" => {
            data.insert("guests".into(), list());
            "guest:snapshot"
        }
        "lease" => {
            let tail = change.key.strip_prefix(&keys::lease_prefix(plan_id))?;
            let (resource_type, resource_id) = tail.split_once('/')?;
            data.insert("resource_type".into(), serde_json::json!(resource_type));
            data.insert("resource_id".into(), serde_json::json!(resource_id));
            data.insert("lease".into(), value);
            "lease:changed"
        }
        "presence" => {
            let client_id = change.key.strip_prefix(&keys::presence_prefix(plan_id))?;
            data.insert("client_id".into(), serde_json::json!(client_id));
            data.insert("entry".into(), value);
            "presence:changed"
        }
        _ => return None,
    };

    let mut frame = Frame::notify(syscall, plan_id, data);
    if let Some(writer) = change.writer {
        frame = frame.with_from(writer.to_string());
    }
    Some(frame)
}

// =============================================================================
// RELAY TASK
// =============================================================================

/// Spawn the relay for one plan. Runs until aborted or the store goes away.
pub fn spawn_relay(state: AppState, plan_id: Uuid) -> JoinHandle<()> {
    let mut subscription = state.store.subscribe(&keys::plan_prefix(plan_id));
    tokio::spawn(async move {
        info!(%plan_id, "relay started");
        while let Some(change) = subscription.recv().await {
            let Some(frame) = change_frame(plan_id, &change) else {
                continue;
            };
            fan_out(&state, plan_id, &change, &frame).await;
        }
        info!(%plan_id, "relay stopped: change feed closed");
    })
}

async fn fan_out(state: &AppState, plan_id: Uuid, change: &StoreChange, frame: &Frame) {
    let mut plans = state.plans.write().await;
    let Some(plan) = plans.get_mut(&plan_id) else {
        return;
    };

    let echo_of = change
        .writer
        .filter(|writer| plan.echoes.should_skip(*writer, &change.key));
    if let Some(writer) = echo_of {
        debug!(%plan_id, %writer, key = %change.key, "suppressed self-echo");
    }

    for (client_id, tx) in &plan.clients {
        if echo_of == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
