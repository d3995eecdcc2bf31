//! Heartbeat tasks — periodic store writes owned by a scoped handle.
//!
//! DESIGN
//! ======
//! Lease renewals and presence heartbeats share one loop: tick on a fixed
//! interval, retry a failed tick with linear back-off, stop when the tick
//! reports the resource is gone. The task belongs to a `HeartbeatHandle`;
//! dropping the handle aborts the task, so a released lease or a closed
//! connection can never leave a timer running.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of one successful heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    Continue,
    /// The resource is gone or owned by someone else. End the loop.
    Stop,
}

/// Retry policy for a single tick.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(attempts: usize, base_ms: u64) -> Self {
        Self { attempts: attempts.max(1), base: Duration::from_millis(base_ms) }
    }
}

/// Owner of a running heartbeat task. Aborts the task on drop.
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a heartbeat that calls `tick` every `interval`. The first tick fires
/// one interval after spawning; callers perform the initial write themselves.
pub fn spawn<F, Fut, E>(label: &'static str, interval: Duration, policy: RetryPolicy, mut tick: F) -> HeartbeatHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Beat, E>> + Send,
    E: Display + Send,
{
    let task = tokio::spawn(async move {
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            match run_tick(label, policy, &mut tick).await {
                Some(Beat::Continue) | None => {}
                Some(Beat::Stop) => {
                    debug!(heartbeat = label, "heartbeat stopped");
                    return;
                }
            }
        }
    });
    HeartbeatHandle { task }
}

/// One tick with retries. `None` when every attempt failed; the next tick
/// tries again.
async fn run_tick<F, Fut, E>(label: &'static str, policy: RetryPolicy, tick: &mut F) -> Option<Beat>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Beat, E>>,
    E: Display,
{
    for attempt in 1..=policy.attempts {
        match tick().await {
            Ok(beat) => return Some(beat),
            Err(e) => {
                warn!(heartbeat = label, attempt, error = %e, "heartbeat tick failed");
                if attempt < policy.attempts {
                    let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
                    tokio::time::sleep(policy.base.saturating_mul(factor)).await;
                }
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
