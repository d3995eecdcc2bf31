//! Frame — the wire envelope of the plan editor protocol.
//!
//! DESIGN
//! ======
//! A frame is one JSON text message. Requests carry a `prefix:op` syscall;
//! the server answers each with exactly one terminal frame (`done` or
//! `error`) whose `parent_id` names the request. Committed store changes
//! reach clients as parentless `request` frames scoped to a plan.
//!
//! Payloads are a flat string-keyed map. Handlers pull typed values out of
//! it with `parse_field` / `require_str`, whose failures are themselves
//! `ErrorCode`s so they render like any other rejected request.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload map of a frame.
pub type Data = HashMap<String, serde_json::Value>;

/// Position of a frame in a request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Item,
    Done,
    Error,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Epoch milliseconds at construction.
    #[serde(default)]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    /// Client id of the connection that originated the frame or change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

/// Epoch milliseconds. The single clock of leases, presence and frames.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Typed errors that can be rendered as an error frame.
pub trait ErrorCode: std::fmt::Display {
    /// Stable `E_*` code clients switch on.
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }

    /// Extra payload merged into the error frame.
    fn details(&self) -> Data {
        Data::new()
    }
}

/// A request payload that lacks a field or carries a malformed one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("{0} required")]
    Missing(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ErrorCode for FieldError {
    fn error_code(&self) -> &'static str {
        "E_VALIDATION"
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Frame {
    /// New request frame.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            plan_id: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Server-pushed notification for everyone following `plan_id`.
    pub fn notify(syscall: impl Into<String>, plan_id: Uuid, data: Data) -> Self {
        Self { plan_id: Some(plan_id), ..Self::request(syscall, data) }
    }

    /// Terminal success without payload.
    #[must_use]
    pub fn done(&self) -> Self {
        self.respond(Status::Done, Data::new())
    }

    /// Terminal success carrying `data`.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.respond(Status::Done, data)
    }

    /// Terminal failure with a bare message and no code.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert("message".into(), serde_json::Value::String(message.into()));
        self.respond(Status::Error, data)
    }

    /// Terminal failure rendered from a typed error: `code`, `message`,
    /// `retryable`, plus the error's own details.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = err.details();
        data.insert("code".into(), err.error_code().into());
        data.insert("message".into(), err.to_string().into());
        data.insert("retryable".into(), err.retryable().into());
        self.respond(Status::Error, data)
    }

    fn respond(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            plan_id: self.plan_id,
            from: None,
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }

    #[must_use]
    pub fn with_plan_id(mut self, plan_id: Uuid) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// PAYLOAD ACCESS
// =============================================================================

impl Frame {
    /// Syscall namespace, e.g. `table` in `table:update`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }

    /// Syscall operation, e.g. `update` in `table:update`.
    #[must_use]
    pub fn op(&self) -> &str {
        self.syscall.split_once(':').map_or("", |(_, op)| op)
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(serde_json::Value::as_str)
    }

    /// Non-blank string field.
    ///
    /// # Errors
    ///
    /// `Missing` when absent, not a string, or blank.
    pub fn require_str(&self, key: &str) -> Result<&str, FieldError> {
        self.str_field(key)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| FieldError::Missing(key.to_string()))
    }

    /// Deserialize one payload field.
    ///
    /// # Errors
    ///
    /// `Missing` when absent, `Invalid` when it does not decode as `T`.
    pub fn parse_field<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, FieldError> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| FieldError::Missing(key.to_string()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| FieldError::Invalid { field: key.to_string(), reason: e.to_string() })
    }

    /// The plan a request names, from the envelope or a `plan_id` field.
    #[must_use]
    pub fn target_plan(&self) -> Option<Uuid> {
        self.plan_id
            .or_else(|| self.str_field("plan_id").and_then(|s| s.parse().ok()))
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
