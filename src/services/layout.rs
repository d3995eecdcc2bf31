//! Layout generator — seeds a table collection from the guest roster.
//!
//! DESIGN
//! ======
//! Pure: guests in, tables out. Guests are grouped by their table reference
//! into virtual tables sized by party (`1 + companions`); each pattern then
//! lays the virtual tables out as round tables of a fixed diameter. Every
//! position is clamped inside the venue, so no pattern can emit a table
//! outside the hall or a non-finite coordinate.
//!
//! The caller commits the result through the state guard like any other
//! bulk write.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::geometry::{Point, clamp_center};
use crate::state::{Guest, Table, TableShape, Venue};

pub const TABLE_DIAMETER: f64 = 120.0;
pub const DEFAULT_SEATS: u32 = 8;

const GRID_MARGIN_X: f64 = 120.0;
const GRID_MARGIN_Y: f64 = 160.0;
const GRID_SPACING: f64 = 120.0;
const MIN_SPACING: f64 = 100.0;
const CIRCLE_RADIUS_FACTOR: f64 = 0.35;
const AISLE_MARGIN_X: f64 = 100.0;
const AISLE_WIDTH: f64 = 250.0;
const EDGE_MARGIN: f64 = 120.0;
const CHEVRON_OFFSET: f64 = 80.0;
const RANDOM_MIN_DISTANCE: f64 = 150.0;
const RANDOM_ATTEMPTS: usize = 100;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutPattern {
    Columns,
    Circular,
    Aisle,
    UShape,
    Chevron,
    Random,
}

impl LayoutPattern {
    pub const ALL: [LayoutPattern; 6] = [
        LayoutPattern::Columns,
        LayoutPattern::Circular,
        LayoutPattern::Aisle,
        LayoutPattern::UShape,
        LayoutPattern::Chevron,
        LayoutPattern::Random,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Columns => "columns",
            Self::Circular => "circular",
            Self::Aisle => "aisle",
            Self::UShape => "u-shape",
            Self::Chevron => "chevron",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for LayoutPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown layout pattern: {0}")]
pub struct UnknownPattern(pub String);

impl crate::frame::ErrorCode for UnknownPattern {
    fn error_code(&self) -> &'static str {
        "E_VALIDATION"
    }
}

impl FromStr for LayoutPattern {
    type Err = UnknownPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPattern(s.to_string()))
    }
}

/// Guests sharing one table reference.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualTable {
    pub table_ref: String,
    pub guest_ids: Vec<String>,
    pub total_seats: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutOutcome {
    pub tables: Vec<Table>,
    /// Guests without a table reference, untouched by the generator.
    pub unassigned: Vec<Guest>,
    pub assigned: usize,
    pub status: String,
}

// =============================================================================
// GENERATE
// =============================================================================

/// Group guests by table reference, keeping first-seen order.
#[must_use]
pub fn group_by_table(guests: &[Guest]) -> (Vec<VirtualTable>, Vec<Guest>) {
    let mut order: Vec<VirtualTable> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut unassigned = Vec::new();

    for guest in guests {
        let Some(table_ref) = guest.table_ref() else {
            unassigned.push(guest.clone());
            continue;
        };
        let slot = *index.entry(table_ref).or_insert_with(|| {
            order.push(VirtualTable { table_ref: table_ref.to_string(), guest_ids: Vec::new(), total_seats: 0 });
            order.len() - 1
        });
        let table = &mut order[slot];
        table.guest_ids.push(guest.id.clone());
        table.total_seats += guest.party_size();
    }
    (order, unassigned)
}

/// Generate a layout with the thread-local RNG.
#[must_use]
pub fn generate(guests: &[Guest], pattern: LayoutPattern, venue: &Venue) -> LayoutOutcome {
    generate_with_rng(guests, pattern, venue, &mut rand::rng())
}

/// Generate a layout. `rng` only drives the `random` pattern.
#[must_use]
pub fn generate_with_rng<R: Rng + ?Sized>(
    guests: &[Guest],
    pattern: LayoutPattern,
    venue: &Venue,
    rng: &mut R,
) -> LayoutOutcome {
    let (virtual_tables, unassigned) = group_by_table(guests);
    let assigned = guests.len() - unassigned.len();

    if virtual_tables.is_empty() {
        let status = if guests.is_empty() {
            "no guests to build tables from".to_string()
        } else {
            format!("no table assignments among {} guests; nothing to lay out", guests.len())
        };
        return LayoutOutcome { tables: Vec::new(), unassigned, assigned, status };
    }

    let positions = place(pattern, virtual_tables.len(), venue, rng);
    let radius = TABLE_DIAMETER / 2.0;
    let tables: Vec<Table> = virtual_tables
        .into_iter()
        .zip(positions)
        .map(|(vt, p)| {
            let p = clamp_center(p, radius, radius, venue.width, venue.height, 0.0);
            Table {
                id: vt.table_ref.clone(),
                name: vt.table_ref,
                x: p.x,
                y: p.y,
                shape: TableShape::Circle { diameter: TABLE_DIAMETER },
                rotation: 0.0,
                seat_capacity: if vt.total_seats == 0 { DEFAULT_SEATS } else { vt.total_seats },
                auto_capacity: false,
                locked: false,
                vip: false,
            }
        })
        .collect();

    let status = format!("{} tables generated ({pattern}) with {assigned} guests assigned", tables.len());
    LayoutOutcome { tables, unassigned, assigned, status }
}

/// Raw centers for `n` tables. May fall outside the venue; callers clamp.
#[must_use]
pub fn place<R: Rng + ?Sized>(pattern: LayoutPattern, n: usize, venue: &Venue, rng: &mut R) -> Vec<Point> {
    if n == 0 {
        return Vec::new();
    }
    match pattern {
        LayoutPattern::Columns => columns(n, venue),
        LayoutPattern::Circular => circular(n, venue),
        LayoutPattern::Aisle => aisle(n, venue),
        LayoutPattern::UShape => u_shape(n, venue),
        LayoutPattern::Chevron => chevron(n, venue),
        LayoutPattern::Random => random(n, venue, rng),
    }
}

// =============================================================================
// PATTERNS
// =============================================================================

/// Most-square grid holding `n` cells: `(rows, cols)`.
#[must_use]
pub fn grid_dims(n: usize) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }
    let mut cols = 1;
    while cols * cols < n {
        cols += 1;
    }
    (n.div_ceil(cols), cols)
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(n: usize) -> f64 {
    n as f64
}

/// Spacing between `count` tables across `available`, never below
/// `MIN_SPACING` once the preferred spacing does not fit.
fn fitted_spacing(count: usize, available: f64) -> f64 {
    let needed = as_f64(count) * TABLE_DIAMETER + as_f64(count.saturating_sub(1)) * GRID_SPACING;
    if needed <= available {
        return GRID_SPACING;
    }
    let gaps = as_f64(count.saturating_sub(1).max(1));
    MIN_SPACING.max((available - as_f64(count) * TABLE_DIAMETER) / gaps)
}

fn columns(n: usize, venue: &Venue) -> Vec<Point> {
    let (rows, cols) = grid_dims(n);
    let available_w = venue.width - GRID_MARGIN_X * 2.0;
    let available_h = venue.height - GRID_MARGIN_Y * 2.0;
    let spacing_x = fitted_spacing(cols, available_w);
    let spacing_y = fitted_spacing(rows, available_h);

    let grid_w = as_f64(cols) * TABLE_DIAMETER + as_f64(cols - 1) * spacing_x;
    let grid_h = as_f64(rows) * TABLE_DIAMETER + as_f64(rows - 1) * spacing_y;
    let start_x = GRID_MARGIN_X + (available_w - grid_w) / 2.0 + TABLE_DIAMETER / 2.0;
    let start_y = GRID_MARGIN_Y + (available_h - grid_h) / 2.0 + TABLE_DIAMETER / 2.0;

    (0..n)
        .map(|i| {
            let (row, col) = (i / cols, i % cols);
            Point::new(
                start_x + as_f64(col) * (TABLE_DIAMETER + spacing_x),
                start_y + as_f64(row) * (TABLE_DIAMETER + spacing_y),
            )
        })
        .collect()
}

fn circular(n: usize, venue: &Venue) -> Vec<Point> {
    let center = Point::new(venue.width / 2.0, venue.height / 2.0);
    let radius = CIRCLE_RADIUS_FACTOR * venue.width.min(venue.height);
    let step = 2.0 * PI / as_f64(n);
    (0..n)
        .map(|i| {
            // Start at twelve o'clock.
            let angle = as_f64(i) * step - PI / 2.0;
            Point::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
        })
        .collect()
}

/// Two column groups either side of a central aisle. Each group keeps
/// within its half, so columns that would not fit become extra rows.
fn aisle(n: usize, venue: &Venue) -> Vec<Point> {
    let side_width = (venue.width - AISLE_MARGIN_X * 2.0 - AISLE_WIDTH) / 2.0;
    let (rows, _) = grid_dims(n);
    // Most columns whose tables and minimum gaps fit in one side.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let max_cols = ((side_width + MIN_SPACING) / (TABLE_DIAMETER + MIN_SPACING)).floor().max(1.0) as usize;
    let cols_per_side = n.div_ceil(rows * 2).clamp(1, max_cols);
    let rows = n.div_ceil(cols_per_side * 2);

    let spacing_x = fitted_spacing(cols_per_side, side_width);
    let spacing_y = fitted_spacing(rows, venue.height - GRID_MARGIN_Y * 2.0);

    let right_start = AISLE_MARGIN_X + side_width + AISLE_WIDTH;
    (0..n)
        .map(|i| {
            let per_row = cols_per_side * 2;
            let row = i / per_row;
            let in_row = i % per_row;
            let (base_x, col) = if in_row < cols_per_side {
                (AISLE_MARGIN_X, in_row)
            } else {
                (right_start, in_row - cols_per_side)
            };
            Point::new(
                base_x + TABLE_DIAMETER / 2.0 + as_f64(col) * (TABLE_DIAMETER + spacing_x),
                GRID_MARGIN_Y + TABLE_DIAMETER / 2.0 + as_f64(row) * (TABLE_DIAMETER + spacing_y),
            )
        })
        .collect()
}

/// Top row left to right, right column top to bottom, bottom row right to
/// left.
fn u_shape(n: usize, venue: &Venue) -> Vec<Point> {
    let r = TABLE_DIAMETER / 2.0;
    let (left, right) = (EDGE_MARGIN + r, venue.width - EDGE_MARGIN - r);
    let (top, bottom) = (EDGE_MARGIN + r, venue.height - EDGE_MARGIN - r);

    let top_count = n.div_ceil(3);
    let right_count = (n - top_count).div_ceil(2);
    let bottom_count = n - top_count - right_count;

    let mut points = Vec::with_capacity(n);
    let top_step = (right - left) / as_f64(top_count);
    points.extend((0..top_count).map(|i| Point::new(left + as_f64(i) * top_step, top)));

    let right_step = (bottom - top) / as_f64(right_count + 1);
    points.extend((0..right_count).map(|i| Point::new(right, top + as_f64(i + 1) * right_step)));

    let bottom_step = (right - left) / as_f64(bottom_count.max(1));
    points.extend((0..bottom_count).map(|i| Point::new(right - as_f64(i) * bottom_step, bottom)));
    points
}

fn chevron(n: usize, venue: &Venue) -> Vec<Point> {
    let (rows, _) = grid_dims(n);
    let per_row = n.div_ceil(rows);
    let available_w = venue.width - GRID_MARGIN_X * 2.0 - CHEVRON_OFFSET * 2.0;
    let available_h = venue.height - GRID_MARGIN_Y * 2.0;

    let spacing = |count: usize, available: f64| {
        let needed = as_f64(count) * TABLE_DIAMETER + as_f64(count.saturating_sub(1)) * MIN_SPACING;
        if needed > available {
            (available - as_f64(count) * TABLE_DIAMETER) / as_f64(count.saturating_sub(1).max(1))
        } else {
            MIN_SPACING
        }
    };
    let spacing_x = spacing(per_row, available_w);
    let spacing_y = spacing(rows, available_h);

    let start_x = GRID_MARGIN_X + CHEVRON_OFFSET + TABLE_DIAMETER / 2.0;
    let start_y = GRID_MARGIN_Y + TABLE_DIAMETER / 2.0;
    (0..n)
        .map(|i| {
            let (row, col) = (i / per_row, i % per_row);
            let offset = if row % 2 == 0 { CHEVRON_OFFSET } else { -CHEVRON_OFFSET };
            Point::new(
                start_x + as_f64(col) * (TABLE_DIAMETER + spacing_x) + offset,
                start_y + as_f64(row) * (TABLE_DIAMETER + spacing_y),
            )
        })
        .collect()
}

fn random<R: Rng + ?Sized>(n: usize, venue: &Venue, rng: &mut R) -> Vec<Point> {
    let r = TABLE_DIAMETER / 2.0;
    let (min_x, max_x) = (EDGE_MARGIN + r, venue.width - EDGE_MARGIN - r);
    let (min_y, max_y) = (EDGE_MARGIN + r, venue.height - EDGE_MARGIN - r);
    let corner = Point::new(min_x, min_y);
    if min_x > max_x || min_y > max_y {
        return vec![Point::new(venue.width / 2.0, venue.height / 2.0); n];
    }

    let mut placed: Vec<Point> = Vec::with_capacity(n);
    for _ in 0..n {
        let spot = (0..RANDOM_ATTEMPTS)
            .map(|_| Point::new(rng.random_range(min_x..=max_x), rng.random_range(min_y..=max_y)))
            .find(|candidate| placed.iter().all(|p| p.distance(*candidate) >= RANDOM_MIN_DISTANCE))
            .unwrap_or(corner);
        placed.push(spot);
    }
    placed
}

#[cfg(test)]
#[path = "layout_test.rs"]
mod tests;
