//! Sweeper — periodic collection of expired leases and stale presence.
//!
//! DESIGN
//! ======
//! Leases and presence entries expire logically on read, so correctness never
//! depends on this task. It only keeps the store from accumulating dead
//! documents from clients that vanished without releasing anything.

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::frame::now_ms;
use crate::state::AppState;
use crate::store::keys;

/// Every plan document lives under this prefix.
const PLANS_PREFIX: &str = "plan/";

/// Removal counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub leases: usize,
    pub presence: usize,
}

/// Spawn the background sweeper. Returns a handle for shutdown.
pub fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.sweep_interval());
        loop {
            interval.tick().await;
            let report = sweep_at(&state, now_ms()).await;
            if report == SweepReport::default() {
                debug!("sweep found nothing to collect");
            } else {
                info!(leases = report.leases, presence = report.presence, "sweep collected expired documents");
            }
        }
    })
}

/// Run one sweep as of `now`. Failures are logged and counted as zero.
///
/// Only key names are listed across plans; documents are read per plan
/// under the lease and presence prefixes.
pub async fn sweep_at(state: &AppState, now: i64) -> SweepReport {
    let plan_keys = match state.store.list_keys(PLANS_PREFIX).await {
        Ok(found) => found,
        Err(e) => {
            error!(error = %e, "sweep listing failed");
            return SweepReport::default();
        }
    };
    let mut report = SweepReport::default();
    for plan_id in keys::plan_ids(&plan_keys) {
        report.leases += state
            .leases
            .sweep_expired_at(&keys::lease_prefix(plan_id), now)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, %plan_id, "lease sweep failed");
                0
            });
        report.presence += state
            .presence
            .sweep_stale_at(&keys::presence_prefix(plan_id), now)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, %plan_id, "presence sweep failed");
                0
            });
    }
    report
}

#[cfg(test)]
#[path = "sweeper_test.rs"]
mod tests;
