//! Convex hull (Andrew's monotone chain) and polygon area, used for
//! cluster solidity.

use geo::{Area, Coord, LineString, Polygon};

/// Compute the convex hull of `points`.
///
/// Returns hull vertices in counter-clockwise order (y-up convention)
/// without repeating the first vertex. Collinear points on hull edges
/// are dropped. Inputs with fewer than three distinct points are
/// returned deduplicated and sorted, which callers treat as a
/// degenerate (zero-area) hull.
///
/// O(n log n).
#[must_use = "returns the hull vertices"]
pub fn convex_hull(points: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let mut sorted: Vec<Coord<f64>> = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();

    if sorted.len() < 3 {
        return sorted;
    }

    let mut hull: Vec<Coord<f64>> = Vec::with_capacity(sorted.len() * 2);

    // Lower hull.
    for &p in &sorted {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }

    // Upper hull.
    let lower_len = hull.len() + 1;
    for &p in sorted.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }

    // The last point equals the first.
    hull.pop();
    hull
}

/// Area enclosed by a simple polygon given as an open ring of vertices
/// (shoelace formula). Fewer than three vertices have zero area.
#[must_use]
pub fn polygon_area(vertices: &[Coord<f64>]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    Polygon::new(LineString::from(vertices.to_vec()), vec![]).unsigned_area()
}

/// Z component of `(b - a) x (c - a)`. Positive for a left turn.
fn cross(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x).mul_add(c.y - a.y, -((b.y - a.y) * (c.x - a.x)))
}
