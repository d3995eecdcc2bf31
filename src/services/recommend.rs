//! Recommendation engine — guest-to-table scoring and conflict fixes.
//!
//! DESIGN
//! ======
//! Scoring is additive over one guest and one table summary (`TableMeta`).
//! A table that cannot seat the guest's whole party is excluded outright,
//! except the table the guest already sits at, which is scored with the
//! over-capacity penalty.
//! Fixes are proposals only; nothing here mutates plan state.
//!
//! Reassignments inside one `suggest_fixes` pass update the working copy of
//! the table summaries, so two displaced guests are never both sent to the
//! last free seat of the same table.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect, clamp_center, rect_in_polygon};
use crate::services::validate::{Conflict, ConflictKind, Hall, resolve_table};
use crate::state::{Area, Guest, Table, Venue};

/// Stand-in for "free seats" at a table with no capacity limit.
pub const UNBOUNDED_FREE: i64 = 999;
pub const MAX_RECOMMENDATIONS: usize = 3;
const SPOT_SEARCH_STEP: f64 = 20.0;

const BRIDE_SIDE: &[&str] = &["novia", "bride", "bride's"];
const GROOM_SIDE: &[&str] = &["novio", "groom", "groom's"];

// =============================================================================
// TYPES
// =============================================================================

/// Everything the scorer needs to know about one table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMeta {
    pub id: String,
    pub name: String,
    /// Zero means unbounded.
    pub capacity: u32,
    pub seated: u32,
    pub locked: bool,
    pub vip: bool,
    pub has_conflicts: bool,
    pub guest_ids: HashSet<String>,
    /// Seated guests per group, companion group and dietary tag.
    pub groups: HashMap<String, u32>,
    pub companion_groups: HashMap<String, u32>,
    pub dietary: HashMap<String, u32>,
}

impl TableMeta {
    fn add(&mut self, guest: &Guest) {
        self.seated += guest.party_size();
        self.guest_ids.insert(guest.id.clone());
        bump(&mut self.groups, guest.group.as_deref(), 1);
        bump(&mut self.companion_groups, guest.companion_group.as_deref(), 1);
        bump(&mut self.dietary, guest.dietary.as_deref(), 1);
    }

    fn remove(&mut self, guest: &Guest) {
        if !self.guest_ids.remove(&guest.id) {
            return;
        }
        self.seated = self.seated.saturating_sub(guest.party_size());
        bump(&mut self.groups, guest.group.as_deref(), -1);
        bump(&mut self.companion_groups, guest.companion_group.as_deref(), -1);
        bump(&mut self.dietary, guest.dietary.as_deref(), -1);
    }

    /// Free seats, or `UNBOUNDED_FREE` without a limit.
    #[must_use]
    pub fn free(&self) -> i64 {
        if self.capacity == 0 {
            UNBOUNDED_FREE
        } else {
            i64::from(self.capacity) - i64::from(self.seated)
        }
    }
}

fn bump(counts: &mut HashMap<String, u32>, key: Option<&str>, delta: i32) {
    let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
        return;
    };
    let key = key.to_lowercase();
    let entry = counts.entry(key.clone()).or_default();
    *entry = entry.saturating_add_signed(delta);
    if *entry == 0 {
        counts.remove(&key);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTable {
    pub table_id: String,
    pub table_name: String,
    pub score: i32,
    pub free: i64,
    pub reasons: Vec<String>,
}

/// A proposed fix. Never applied without an explicit call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum SuggestedAction {
    Reassign {
        guest_id: String,
        guest_name: String,
        from_table_id: String,
        to_table_id: String,
        to_table_name: String,
        score: i32,
    },
    FixPosition {
        table_id: String,
        x: f64,
        y: f64,
    },
    FocusTable {
        table_id: String,
    },
}

// =============================================================================
// TABLE SUMMARIES
// =============================================================================

/// Summaries for every table, in table order.
#[must_use]
pub fn table_meta(tables: &[Table], guests: &[Guest], conflicts: &[Conflict]) -> Vec<TableMeta> {
    let conflicted: HashSet<&str> = conflicts.iter().map(|c| c.table_id.as_str()).collect();
    let mut metas: Vec<TableMeta> = tables
        .iter()
        .map(|t| TableMeta {
            id: t.id.clone(),
            name: t.label().to_string(),
            capacity: t.seat_capacity,
            locked: t.locked,
            vip: t.vip,
            has_conflicts: conflicted.contains(t.id.as_str()),
            ..TableMeta::default()
        })
        .collect();
    let index: HashMap<String, usize> = metas.iter().enumerate().map(|(i, m)| (m.id.clone(), i)).collect();

    for guest in guests {
        let Some(table) = guest.table_ref().and_then(|r| resolve_table(r, tables)) else {
            continue;
        };
        if let Some(&i) = index.get(&table.id) {
            metas[i].add(guest);
        }
    }
    metas
}

// =============================================================================
// SCORING
// =============================================================================

/// Keyword heuristic: does the table name belong to the guest's side?
#[must_use]
pub fn side_matches(side: &str, table_name: &str) -> bool {
    let side = side.trim().to_lowercase();
    if side.is_empty() {
        return false;
    }
    let name = table_name.to_lowercase();
    let keywords: &[&str] = if BRIDE_SIDE.contains(&side.as_str()) {
        BRIDE_SIDE
    } else if GROOM_SIDE.contains(&side.as_str()) {
        GROOM_SIDE
    } else {
        return name.contains(&side);
    };
    keywords.iter().any(|k| name.contains(k))
}

fn co_seated(counts: &HashMap<String, u32>, key: Option<&str>) -> Option<u32> {
    let key = key.map(str::trim).filter(|k| !k.is_empty())?;
    Some(counts.get(&key.to_lowercase()).copied().unwrap_or(0))
}

/// Score one guest against one table. `None` when the party does not fit,
/// unless the guest is already seated there: an overbooked table keeps its
/// own guests and is penalized instead.
#[must_use]
pub fn score(guest: &Guest, meta: &TableMeta) -> Option<ScoredTable> {
    let seated_here = meta.guest_ids.contains(&guest.id);
    // Affinities and fit are judged as if this guest were not seated yet.
    let mut view = meta.clone();
    view.remove(guest);

    let party = i64::from(guest.party_size());
    let free = view.free();
    if free < party && !seated_here {
        return None;
    }

    let mut total: i32 = 0;
    let mut reasons = Vec::new();
    let remaining = free - party;

    if view.capacity > 0 {
        let fit = if remaining < 0 {
            0
        } else {
            i32::try_from((28 - 5 * remaining).max(0)).unwrap_or(0)
        };
        total += fit;
        reasons.push(format!("capacity fit +{fit}"));
        if remaining == 0 {
            total += 5;
            reasons.push("exact fit +5".to_string());
        }
    } else {
        total += 8;
        reasons.push("open capacity +8".to_string());
    }

    if guest.side.as_deref().is_some_and(|side| side_matches(side, &view.name)) {
        total += 12;
        reasons.push("same side +12".to_string());
    }

    if let Some(n) = co_seated(&view.groups, guest.group.as_deref()).filter(|n| *n > 0) {
        let bonus = i32::try_from((5 * n).min(15)).unwrap_or(15);
        total += bonus;
        reasons.push(format!("group +{bonus}"));
    }

    if let Some(n) = co_seated(&view.companion_groups, guest.companion_group.as_deref()).filter(|n| *n > 0) {
        let bonus = i32::try_from((4 + 4 * n).min(12)).unwrap_or(12);
        total += bonus;
        reasons.push(format!("companions +{bonus}"));
    }

    if let Some(n) = co_seated(&view.dietary, guest.dietary.as_deref()) {
        if n > 0 {
            let bonus = i32::try_from((4 + 2 * n).min(10)).unwrap_or(10);
            total += bonus;
            reasons.push(format!("dietary +{bonus}"));
        } else {
            total -= 6;
            reasons.push("dietary -6".to_string());
        }
    }

    if guest.vip {
        let bonus = if view.vip { 16 } else { 6 };
        total += bonus;
        reasons.push(format!("vip +{bonus}"));
    }

    if view.locked {
        total -= 8;
        reasons.push("locked -8".to_string());
    }
    if view.has_conflicts {
        total -= 14;
        reasons.push("open conflicts -14".to_string());
    }
    let over = i64::from(meta.seated) - i64::from(meta.capacity);
    if meta.capacity > 0 && over > 0 {
        let penalty = i32::try_from(18 * over).unwrap_or(i32::MAX);
        total = total.saturating_sub(penalty);
        reasons.push(format!("over capacity -{penalty}"));
    }

    Some(ScoredTable { table_id: view.id, table_name: view.name, score: total, free, reasons })
}

/// Best tables for a guest: non-negative scores, highest first, ties in
/// table order, at most three.
#[must_use]
pub fn recommend(guest: &Guest, metas: &[TableMeta]) -> Vec<ScoredTable> {
    ranked(guest, metas, None)
        .into_iter()
        .take(MAX_RECOMMENDATIONS)
        .collect()
}

/// One seat proposed by `auto_assign`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoAssignment {
    pub guest_id: String,
    pub table_id: String,
    pub table_name: String,
    pub score: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoAssignPlan {
    pub assignments: Vec<AutoAssignment>,
    /// Guests no table could take.
    pub unplaced: Vec<String>,
}

/// Seat every guest without a table reference. VIPs pick first, then roster
/// order. Each guest takes the best-ranked table, or any table the party
/// still fits when every score is negative. Occupancy is tracked across the
/// pass so later guests see the seats earlier ones took.
#[must_use]
pub fn auto_assign(guests: &[Guest], metas: &[TableMeta]) -> AutoAssignPlan {
    let mut working: Vec<TableMeta> = metas.to_vec();
    let mut pending: Vec<&Guest> = guests.iter().filter(|g| g.table_ref().is_none()).collect();
    pending.sort_by_key(|g| !g.vip);

    let mut plan = AutoAssignPlan::default();
    for guest in pending {
        let best = ranked(guest, &working, None).into_iter().next().or_else(|| {
            working
                .iter()
                .filter_map(|m| score(guest, m))
                .fold(None, |best: Option<ScoredTable>, s| match best {
                    Some(b) if b.score >= s.score => Some(b),
                    _ => Some(s),
                })
        });
        let Some(best) = best else {
            plan.unplaced.push(guest.id.clone());
            continue;
        };
        if let Some(target) = working.iter_mut().find(|m| m.id == best.table_id) {
            target.add(guest);
        }
        plan.assignments.push(AutoAssignment {
            guest_id: guest.id.clone(),
            table_id: best.table_id,
            table_name: best.table_name,
            score: best.score,
        });
    }
    plan
}

fn ranked(guest: &Guest, metas: &[TableMeta], exclude: Option<&str>) -> Vec<ScoredTable> {
    let mut scored: Vec<ScoredTable> = metas
        .iter()
        .filter(|m| exclude != Some(m.id.as_str()))
        .filter_map(|m| score(guest, m))
        .filter(|s| s.score >= 0)
        .collect();
    // Stable: equal scores keep table order.
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored
}

// =============================================================================
// FIXES
// =============================================================================

/// Context for position fixes.
pub struct FixContext<'a> {
    pub tables: &'a [Table],
    pub guests: &'a [Guest],
    pub areas: &'a [Area],
    pub venue: &'a Venue,
}

/// Propose one action set per conflict.
#[must_use]
pub fn suggest_fixes(conflicts: &[Conflict], metas: &[TableMeta], ctx: &FixContext<'_>) -> Vec<SuggestedAction> {
    let mut working: Vec<TableMeta> = metas.to_vec();
    let mut out = Vec::new();
    let mut positioned: HashSet<&str> = HashSet::new();

    for conflict in conflicts {
        match conflict.kind {
            ConflictKind::Overbooking => {
                reassign_overflow(conflict, ctx.guests, &mut working, &mut out);
            }
            ConflictKind::Perimeter | ConflictKind::Spacing | ConflictKind::Obstacle => {
                if !positioned.insert(conflict.table_id.as_str()) {
                    continue;
                }
                let Some(table) = ctx.tables.iter().find(|t| t.id == conflict.table_id) else {
                    continue;
                };
                let target = if conflict.kind == ConflictKind::Perimeter {
                    clamped_position(table, ctx.venue)
                } else {
                    find_free_spot(table, ctx.tables, ctx.areas, ctx.venue).unwrap_or_else(|| clamped_position(table, ctx.venue))
                };
                out.push(SuggestedAction::FixPosition { table_id: table.id.clone(), x: target.x, y: target.y });
                if conflict.kind == ConflictKind::Obstacle {
                    out.push(SuggestedAction::FocusTable { table_id: table.id.clone() });
                }
            }
        }
    }
    out
}

fn reassign_overflow(conflict: &Conflict, guests: &[Guest], working: &mut [TableMeta], out: &mut Vec<SuggestedAction>) {
    let overflow = conflict.overflow.unwrap_or(0);
    let Some(source) = working.iter().position(|m| m.id == conflict.table_id) else {
        return;
    };

    let mut candidates: Vec<&Guest> = guests
        .iter()
        .filter(|g| working[source].guest_ids.contains(&g.id))
        .collect();
    // VIPs move last.
    candidates.sort_by_key(|g| g.vip);

    let mut freed = 0;
    for guest in candidates {
        if freed >= overflow {
            break;
        }
        let best = ranked(guest, working, Some(conflict.table_id.as_str()))
            .into_iter()
            .next();
        let Some(best) = best else {
            continue;
        };
        let Some(target) = working.iter().position(|m| m.id == best.table_id) else {
            continue;
        };
        working[source].remove(guest);
        working[target].add(guest);
        freed += guest.party_size();
        out.push(SuggestedAction::Reassign {
            guest_id: guest.id.clone(),
            guest_name: guest.name.clone(),
            from_table_id: conflict.table_id.clone(),
            to_table_id: best.table_id,
            to_table_name: best.table_name,
            score: best.score,
        });
    }
}

/// Table center clamped inside the venue with a half-aisle margin.
#[must_use]
pub fn clamped_position(table: &Table, venue: &Venue) -> Point {
    let bounds = table.bounds();
    clamp_center(
        table.center(),
        bounds.width() / 2.0,
        bounds.height() / 2.0,
        venue.width,
        venue.height,
        venue.min_aisle.max(0.0) / 2.0,
    )
}

/// Nearest position, searched in rings of `SPOT_SEARCH_STEP`, where the
/// table fits inside venue and boundary and clears obstacles and other
/// tables by the minimum aisle.
#[must_use]
pub fn find_free_spot(table: &Table, tables: &[Table], areas: &[Area], venue: &Venue) -> Option<Point> {
    if !table.has_finite_geometry() {
        return None;
    }
    let hall = Hall::from_areas(areas);
    let half_aisle = venue.min_aisle.max(0.0) / 2.0;
    let bounds = table.bounds();
    let others: Vec<Rect> = tables
        .iter()
        .filter(|t| t.id != table.id && t.has_finite_geometry())
        .map(|t| t.bounds().pad(half_aisle))
        .collect();
    let venue_rect = Rect { min_x: 0.0, min_y: 0.0, max_x: venue.width, max_y: venue.height };

    let fits = |center: Point| {
        let moved = Rect::centered(center.x, center.y, bounds.width() / 2.0, bounds.height() / 2.0);
        let padded = moved.pad(half_aisle);
        venue_rect.contains_rect(&moved)
            && hall.boundary.is_none_or(|b| rect_in_polygon(&moved, b))
            && !hall.obstacles.iter().any(|o| padded.overlaps(o))
            && !others.iter().any(|o| padded.overlaps(o))
    };

    let origin = table.center();
    let reach = venue.width.max(venue.height);
    let mut radius = SPOT_SEARCH_STEP;
    while radius <= reach {
        let circumference = 2.0 * std::f64::consts::PI * radius;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let samples = ((circumference / SPOT_SEARCH_STEP).ceil() as usize).max(8);
        #[allow(clippy::cast_precision_loss)]
        let step = 2.0 * std::f64::consts::PI / samples as f64;
        for k in 0..samples {
            #[allow(clippy::cast_precision_loss)]
            let angle = k as f64 * step;
            let candidate = Point::new(origin.x + radius * angle.cos(), origin.y + radius * angle.sin());
            if fits(candidate) {
                return Some(candidate);
            }
        }
        radius += SPOT_SEARCH_STEP;
    }
    None
}

#[cfg(test)]
#[path = "recommend_test.rs"]
mod tests;
