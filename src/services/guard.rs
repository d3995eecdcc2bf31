//! State guard — refuses bulk table writes that look like a collapsed layout.
//!
//! DESIGN
//! ======
//! A wholesale replace of the table collection that piles most tables onto a
//! handful of coordinates is far more likely to be a partial write racing a
//! re-render than a deliberate edit. The guard rejects such a collection so
//! the previous one stays authoritative. It also refuses any table with a
//! non-finite coordinate or dimension.
//!
//! Single-table moves never pass through here.

use std::collections::HashSet;

use tracing::warn;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::state::Table;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GuardError {
    #[error("rejected layout: {unique} distinct positions among {tables} tables")]
    StateRejected { tables: usize, unique: usize },
    #[error("table {table_id} has non-finite geometry")]
    NonFinite { table_id: String },
}

impl crate::frame::ErrorCode for GuardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::StateRejected { .. } => "E_STATE_REJECTED",
            Self::NonFinite { .. } => "E_NON_FINITE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateGuard {
    /// Collections of this size or smaller are never rejected.
    pub min_tables: usize,
    pub unique_ratio: f64,
}

impl Default for StateGuard {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl StateGuard {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self { min_tables: config.guard_min_tables, unique_ratio: config.guard_unique_ratio }
    }

    /// Check a replacement collection. On rejection the caller keeps
    /// `_previous` as the authoritative state.
    ///
    /// # Errors
    ///
    /// Returns `NonFinite` for the first table with non-finite geometry and
    /// `StateRejected` when distinct positions fall below the ratio.
    pub fn validate_bulk_write(&self, next: &[Table], _previous: &[Table]) -> Result<(), GuardError> {
        if let Some(bad) = next.iter().find(|t| !t.has_finite_geometry()) {
            return Err(GuardError::NonFinite { table_id: bad.id.clone() });
        }
        if next.len() <= self.min_tables {
            return Ok(());
        }

        let unique = distinct_positions(next);
        #[allow(clippy::cast_precision_loss)]
        let (unique_f, threshold) = (unique as f64, self.unique_ratio * next.len() as f64);
        if unique_f < threshold {
            return Err(GuardError::StateRejected { tables: next.len(), unique });
        }
        Ok(())
    }

    /// `validate_bulk_write` plus the diagnostic event on rejection.
    ///
    /// # Errors
    ///
    /// Same as `validate_bulk_write`.
    pub fn check(&self, plan_id: Uuid, reason: &str, next: &[Table], previous: &[Table]) -> Result<(), GuardError> {
        let result = self.validate_bulk_write(next, previous);
        if let Err(e) = &result {
            warn!(
                %plan_id,
                reason,
                tables = next.len(),
                previous_tables = previous.len(),
                unique_positions = distinct_positions(next),
                threshold = self.unique_ratio,
                error = %e,
                "state guard rejected bulk write"
            );
        }
        result
    }
}

/// Number of distinct `(x, y)` pairs, compared bit-exactly (`-0.0 == 0.0`).
#[must_use]
pub fn distinct_positions(tables: &[Table]) -> usize {
    tables
        .iter()
        .map(|t| ((t.x + 0.0).to_bits(), (t.y + 0.0).to_bits()))
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
