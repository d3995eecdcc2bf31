//! Shared application state and the plan data model.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. The
//! authoritative documents (tables, areas, venue, leases, presence) live in
//! the `Store`; `plans` only holds per-process live state for each plan that
//! has connected clients: their outbound channels, the change relay task,
//! the undo history and the self-echo filter.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::frame::Frame;
use crate::geometry::{Point, Rect, circle_bounds, rotated_rect_bounds};
use crate::services::guard::StateGuard;
use crate::services::guests::GuestDirectory;
use crate::services::history::History;
use crate::services::lease::LeaseManager;
use crate::services::presence::PresenceTracker;
use crate::services::relay::EchoFilter;
use crate::services::validate::ConflictCache;
use crate::store::Store;

// =============================================================================
// VENUE
// =============================================================================

pub const DEFAULT_VENUE_WIDTH: f64 = 1800.0;
pub const DEFAULT_VENUE_HEIGHT: f64 = 1200.0;
pub const DEFAULT_MIN_AISLE: f64 = 100.0;

/// Bounding rectangle of the hall and the clearance required around objects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_min_aisle")]
    pub min_aisle: f64,
}

fn default_min_aisle() -> f64 {
    DEFAULT_MIN_AISLE
}

impl Default for Venue {
    fn default() -> Self {
        Self { width: DEFAULT_VENUE_WIDTH, height: DEFAULT_VENUE_HEIGHT, min_aisle: DEFAULT_MIN_AISLE }
    }
}

impl Venue {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.width.is_finite()
            && self.height.is_finite()
            && self.min_aisle.is_finite()
            && self.width > 0.0
            && self.height > 0.0
            && self.min_aisle >= 0.0
    }
}

// =============================================================================
// TABLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum TableShape {
    Circle { diameter: f64 },
    Rect { width: f64, height: f64 },
}

/// A placed banquet table. `x, y` is the center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(flatten)]
    pub shape: TableShape,
    /// Degrees, clockwise. Only affects rectangular tables.
    #[serde(default)]
    pub rotation: f64,
    /// Zero means unbounded.
    #[serde(default)]
    pub seat_capacity: u32,
    #[serde(default)]
    pub auto_capacity: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub vip: bool,
}

impl Table {
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x, self.y)
    }

    #[must_use]
    pub fn has_finite_geometry(&self) -> bool {
        let dims_ok = match self.shape {
            TableShape::Circle { diameter } => diameter.is_finite() && diameter >= 0.0,
            TableShape::Rect { width, height } => {
                width.is_finite() && height.is_finite() && width >= 0.0 && height >= 0.0
            }
        };
        self.x.is_finite() && self.y.is_finite() && self.rotation.is_finite() && dims_ok
    }

    /// Axis-aligned bounding box of the table footprint.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        match self.shape {
            TableShape::Circle { diameter } => circle_bounds(self.center(), diameter / 2.0),
            TableShape::Rect { width, height } => rotated_rect_bounds(self.center(), width, height, self.rotation),
        }
    }

    /// Display name, falling back to the id.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

// =============================================================================
// AREAS AND SEATS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaKind {
    Boundary,
    Obstacle,
    Door,
}

/// Polygonal region of the hall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(default)]
    pub id: String,
    pub kind: AreaKind,
    pub points: Vec<Point>,
}

/// A ceremony chair. Not capacity bearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub guest_id: Option<String>,
}

// =============================================================================
// GUEST
// =============================================================================

/// Roster entry owned by the guest directory. This engine only writes back
/// `table_ref`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Guest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Table id or table name.
    #[serde(default)]
    pub table_ref: Option<String>,
    #[serde(default)]
    pub companions: u32,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Household or party the guest arrives with.
    #[serde(default)]
    pub companion_group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dietary: Option<String>,
    #[serde(default)]
    pub vip: bool,
}

impl Guest {
    /// Seats the guest occupies: themself plus companions.
    #[must_use]
    pub fn party_size(&self) -> u32 {
        1 + self.companions
    }

    #[must_use]
    pub fn table_ref(&self) -> Option<&str> {
        self.table_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

// =============================================================================
// LEASE AND PRESENCE DOCUMENTS
// =============================================================================

/// Exclusive, time-bounded hold on one resource. One document per resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub resource_type: String,
    pub resource_id: String,
    pub holder_client_id: Uuid,
    pub holder_user_id: Uuid,
    pub display_name: String,
    /// Epoch milliseconds of the last acquire or renew.
    pub acquired_at: i64,
}

impl Lease {
    #[must_use]
    pub fn is_live(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.acquired_at < ttl_ms
    }
}

/// Heartbeat-backed record of one connected editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub active_tab: Option<String>,
    pub last_heartbeat_at: i64,
}

/// Identity of an editor session, carried by every mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Editor {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub color: String,
}

// =============================================================================
// PLAN STATE
// =============================================================================

/// Per-plan live state for this process.
pub struct PlanState {
    /// Connected clients: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Change relay task, running while any client is connected.
    pub relay: Option<JoinHandle<()>>,
    /// Undo/redo snapshots of the table collection.
    pub history: History,
    /// Pending self-echoes per writer.
    pub echoes: EchoFilter,
}

impl PlanState {
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self { clients: HashMap::new(), relay: None, history: History::new(history_limit), echoes: EchoFilter::new() }
    }
}

impl Drop for PlanState {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub guests: Arc<dyn GuestDirectory>,
    pub config: EngineConfig,
    pub plans: Arc<RwLock<HashMap<Uuid, PlanState>>>,
    pub leases: LeaseManager,
    pub presence: PresenceTracker,
    pub guard: StateGuard,
    pub conflicts: ConflictCache,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, guests: Arc<dyn GuestDirectory>, config: EngineConfig) -> Self {
        Self {
            leases: LeaseManager::new(store.clone(), config),
            presence: PresenceTracker::new(store.clone(), config),
            guard: StateGuard::from_config(&config),
            conflicts: ConflictCache::new(),
            plans: Arc::new(RwLock::new(HashMap::new())),
            store,
            guests,
            config,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
