//! Constraint validator — derives layout conflicts from current plan state.
//!
//! DESIGN
//! ======
//! Conflicts are never stored; every read recomputes them from tables, areas,
//! guests and venue. Per table the checks run in priority order and stop at
//! the first hit: perimeter, obstacle, spacing. Overbooking is an independent
//! pass over all tables.
//!
//! Degenerate polygons are treated as absent: a boundary that cannot enclose
//! anything imposes no perimeter, an obstacle without area blocks nothing.
//!
//! `ConflictCache` memoizes `validate` by a SHA-256 fingerprint of its
//! serialized inputs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::geometry::{Point, Rect, is_degenerate, point_in_polygon, polygon_bounds, rect_in_polygon};
use crate::state::{Area, AreaKind, Guest, Seat, Table, Venue};

const CACHE_CAPACITY: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Perimeter,
    Obstacle,
    Spacing,
    Overbooking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub table_id: String,
    pub message: String,
    /// Seats over capacity; overbooking only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow: Option<u32>,
}

impl Conflict {
    fn new(kind: ConflictKind, table_id: &str, message: String) -> Self {
        Self { kind, table_id: table_id.to_string(), message, overflow: None }
    }
}

/// Usable hall geometry extracted from the area list.
pub(crate) struct Hall<'a> {
    pub(crate) boundary: Option<&'a [Point]>,
    pub(crate) obstacles: Vec<Rect>,
}

impl<'a> Hall<'a> {
    pub(crate) fn from_areas(areas: &'a [Area]) -> Self {
        let mut boundary = None;
        let mut obstacles = Vec::new();
        for area in areas {
            if is_degenerate(&area.points) {
                warn!(area_id = %area.id, kind = ?area.kind, points = area.points.len(), "ignoring degenerate area");
                continue;
            }
            match area.kind {
                AreaKind::Boundary if boundary.is_none() => boundary = Some(area.points.as_slice()),
                AreaKind::Boundary => {}
                AreaKind::Obstacle | AreaKind::Door => obstacles.extend(polygon_bounds(&area.points)),
            }
        }
        Self { boundary, obstacles }
    }
}

// =============================================================================
// TABLES
// =============================================================================

/// Table a guest reference points at: by id first, then by name.
#[must_use]
pub fn resolve_table<'a>(table_ref: &str, tables: &'a [Table]) -> Option<&'a Table> {
    tables
        .iter()
        .find(|t| t.id == table_ref)
        .or_else(|| tables.iter().find(|t| !t.name.is_empty() && t.name.trim() == table_ref))
}

/// Seats used per table id: `Σ (1 + companions)` over guests that resolve
/// to it.
#[must_use]
pub fn occupancy(tables: &[Table], guests: &[Guest]) -> HashMap<String, u32> {
    let mut used: HashMap<String, u32> = HashMap::new();
    for guest in guests {
        let Some(table) = guest.table_ref().and_then(|r| resolve_table(r, tables)) else {
            continue;
        };
        *used.entry(table.id.clone()).or_default() += guest.party_size();
    }
    used
}

/// Recompute every conflict for a banquet layout.
#[must_use]
pub fn validate(tables: &[Table], areas: &[Area], guests: &[Guest], venue: &Venue) -> Vec<Conflict> {
    let hall = Hall::from_areas(areas);
    let half_aisle = venue.min_aisle.max(0.0) / 2.0;
    let boxes: Vec<Option<Rect>> = tables
        .iter()
        .map(|t| t.has_finite_geometry().then(|| t.bounds()))
        .collect();

    let mut out = Vec::new();
    for (i, table) in tables.iter().enumerate() {
        let Some(bounds) = boxes[i] else {
            continue;
        };

        if let Some(boundary) = hall.boundary {
            if !rect_in_polygon(&bounds, boundary) {
                out.push(Conflict::new(
                    ConflictKind::Perimeter,
                    &table.id,
                    format!("table {} is outside the venue boundary", table.label()),
                ));
                continue;
            }
        }

        let padded = bounds.pad(half_aisle);
        if hall.obstacles.iter().any(|o| padded.overlaps(o)) {
            out.push(Conflict::new(
                ConflictKind::Obstacle,
                &table.id,
                format!("table {} collides with an obstacle or door", table.label()),
            ));
            continue;
        }

        let crowded = boxes.iter().enumerate().any(|(j, other)| {
            j != i && tables[j].id != table.id && other.is_some_and(|b| padded.overlaps(&b.pad(half_aisle)))
        });
        if crowded {
            out.push(Conflict::new(
                ConflictKind::Spacing,
                &table.id,
                format!("table {} is closer than {} to another table", table.label(), venue.min_aisle),
            ));
        }
    }

    let used = occupancy(tables, guests);
    for table in tables {
        let seated = used.get(&table.id).copied().unwrap_or(0);
        if table.seat_capacity > 0 && seated > table.seat_capacity {
            let overflow = seated - table.seat_capacity;
            out.push(Conflict {
                overflow: Some(overflow),
                ..Conflict::new(
                    ConflictKind::Overbooking,
                    &table.id,
                    format!(
                        "table {} is overbooked by {overflow} ({seated}/{})",
                        table.label(),
                        table.seat_capacity
                    ),
                )
            });
        }
    }
    out
}

// =============================================================================
// CEREMONY SEATS
// =============================================================================

/// Conflict id of a ceremony seat.
#[must_use]
pub fn seat_conflict_id(seat_id: &str) -> String {
    format!("S{seat_id}")
}

/// Perimeter and obstacle checks for ceremony seats, on points.
#[must_use]
pub fn validate_seats(seats: &[Seat], areas: &[Area]) -> Vec<Conflict> {
    let hall = Hall::from_areas(areas);
    let mut out = Vec::new();
    for seat in seats {
        let p = Point::new(seat.x, seat.y);
        if !p.is_finite() {
            continue;
        }
        let id = seat_conflict_id(&seat.id);
        if let Some(boundary) = hall.boundary {
            if !point_in_polygon(p, boundary) {
                out.push(Conflict::new(ConflictKind::Perimeter, &id, format!("seat {} is outside the boundary", seat.id)));
                continue;
            }
        }
        if hall.obstacles.iter().any(|o| o.contains_point(p)) {
            out.push(Conflict::new(ConflictKind::Obstacle, &id, format!("seat {} is on an obstacle or door", seat.id)));
        }
    }
    out
}

// =============================================================================
// MEMOIZATION
// =============================================================================

/// Shared memo of `validate` results keyed by input fingerprint.
#[derive(Clone, Default)]
pub struct ConflictCache {
    entries: Arc<Mutex<HashMap<[u8; 32], Arc<Vec<Conflict>>>>>,
}

impl ConflictCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `validate`, served from the memo when the inputs were seen before.
    #[must_use]
    pub fn validate(&self, tables: &[Table], areas: &[Area], guests: &[Guest], venue: &Venue) -> Arc<Vec<Conflict>> {
        let Some(key) = fingerprint(tables, areas, guests, venue) else {
            return Arc::new(validate(tables, areas, guests, venue));
        };
        if let Some(hit) = self.lock().get(&key) {
            return hit.clone();
        }

        let computed = Arc::new(validate(tables, areas, guests, venue));
        let mut entries = self.lock();
        if entries.len() >= CACHE_CAPACITY {
            entries.clear();
        }
        entries.insert(key, computed.clone());
        computed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<[u8; 32], Arc<Vec<Conflict>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fingerprint(tables: &[Table], areas: &[Area], guests: &[Guest], venue: &Venue) -> Option<[u8; 32]> {
    let encoded = serde_json::to_vec(&(tables, areas, guests, venue)).ok()?;
    Some(Sha256::digest(&encoded).into())
}

#[cfg(test)]
#[path = "validate_test.rs"]
mod tests;
