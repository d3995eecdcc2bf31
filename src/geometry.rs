//! Geometry primitives shared by the validator, the layout generator and the
//! fix suggestions.
//!
//! DESIGN
//! ======
//! One primitive set for banquet tables and ceremony seats: points, axis-aligned
//! rectangles and simple polygons. Overlap is strict, so boxes that only touch
//! along an edge are considered clear of each other.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    #[must_use]
    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned rectangle stored as min/max corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rect {
    /// Rectangle centered on `(cx, cy)` with the given half extents.
    #[must_use]
    pub fn centered(cx: f64, cy: f64, half_w: f64, half_h: f64) -> Self {
        Self { min_x: cx - half_w, min_y: cy - half_h, max_x: cx + half_w, max_y: cy + half_h }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow the rectangle by `amount` on every side.
    #[must_use]
    pub fn pad(&self, amount: f64) -> Self {
        Self {
            min_x: self.min_x - amount,
            min_y: self.min_y - amount,
            max_x: self.max_x + amount,
            max_y: self.max_y + amount,
        }
    }

    /// Strict overlap test. Shared edges do not count.
    #[must_use]
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min_x < other.max_x && other.min_x < self.max_x && self.min_y < other.max_y && other.min_y < self.max_y
    }

    #[must_use]
    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    #[must_use]
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.min_x >= self.min_x && other.max_x <= self.max_x && other.min_y >= self.min_y && other.max_y <= self.max_y
    }

    /// Corners in clockwise order starting top-left.
    #[must_use]
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.min_x, self.min_y),
            Point::new(self.max_x, self.min_y),
            Point::new(self.max_x, self.max_y),
            Point::new(self.min_x, self.max_y),
        ]
    }
}

/// Bounding box of a circle.
#[must_use]
pub fn circle_bounds(center: Point, radius: f64) -> Rect {
    Rect::centered(center.x, center.y, radius, radius)
}

/// Bounding box of a `w × h` rectangle rotated by `degrees` around its center.
#[must_use]
pub fn rotated_rect_bounds(center: Point, width: f64, height: f64, degrees: f64) -> Rect {
    let theta = degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    let half_w = (width / 2.0 * cos).abs() + (height / 2.0 * sin).abs();
    let half_h = (width / 2.0 * sin).abs() + (height / 2.0 * cos).abs();
    Rect::centered(center.x, center.y, half_w, half_h)
}

/// Bounding box of a polygon. `None` for an empty point list.
#[must_use]
pub fn polygon_bounds(points: &[Point]) -> Option<Rect> {
    let first = points.first()?;
    let mut rect = Rect { min_x: first.x, min_y: first.y, max_x: first.x, max_y: first.y };
    for p in &points[1..] {
        rect.min_x = rect.min_x.min(p.x);
        rect.min_y = rect.min_y.min(p.y);
        rect.max_x = rect.max_x.max(p.x);
        rect.max_y = rect.max_y.max(p.y);
    }
    Some(rect)
}

/// Shoelace area (absolute).
#[must_use]
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        acc += a.x * b.y - b.x * a.y;
    }
    (acc / 2.0).abs()
}

/// A polygon that cannot enclose anything: fewer than three points, a
/// non-finite coordinate, or zero area.
#[must_use]
pub fn is_degenerate(points: &[Point]) -> bool {
    points.len() < 3 || points.iter().any(|p| !p.is_finite()) || polygon_area(points) <= f64::EPSILON
}

/// Ray-casting point-in-polygon test.
#[must_use]
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) {
            let x_cross = (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// True when every corner of `rect` lies inside `polygon`.
#[must_use]
pub fn rect_in_polygon(rect: &Rect, polygon: &[Point]) -> bool {
    rect.corners()
        .iter()
        .all(|corner| point_in_polygon(*corner, polygon))
}

/// Clamp a center so a box with the given half extents stays within
/// `[margin, width - margin] × [margin, height - margin]`. When the box is
/// larger than the available span it is centered on that axis.
#[must_use]
pub fn clamp_center(center: Point, half_w: f64, half_h: f64, width: f64, height: f64, margin: f64) -> Point {
    Point::new(
        clamp_axis(center.x, half_w, width, margin),
        clamp_axis(center.y, half_h, height, margin),
    )
}

fn clamp_axis(value: f64, half: f64, extent: f64, margin: f64) -> f64 {
    let lo = margin + half;
    let hi = extent - margin - half;
    if lo > hi {
        return extent / 2.0;
    }
    if value.is_finite() { value.clamp(lo, hi) } else { lo }
}

#[cfg(test)]
#[path = "geometry_test.rs"]
mod tests;
