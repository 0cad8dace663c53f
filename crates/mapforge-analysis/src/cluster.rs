//! Cluster analysis: decide whether leak pixels form a real defect.
//!
//! Leak pixels are grouped into connected components where two pixels
//! are connected if one lies inside the other's square window of
//! `neighborhood_radius`. The wide window bridges the gaps that
//! dithering and antialiasing leave inside a leaked fill.
//!
//! A component counts as a leak only when it is both big (more pixels
//! than `cluster_size_threshold`) and solid (pixel count over convex
//! hull area above `solidity_threshold`). Thin streaks and concave
//! borders left by a properly blended edge are large but not solid.

use std::collections::VecDeque;

use geo::Coord;

use crate::config::DetectionThresholds;
use crate::hull::{convex_hull, polygon_area};
use crate::types::{LeakMask, coords};

/// A connected group of leak pixels with its hull geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pixels: Vec<(u32, u32)>,
    hull: Vec<Coord<f64>>,
    hull_area: f64,
}

impl Cluster {
    /// Build a cluster, computing the convex hull of its pixel
    /// coordinates.
    #[must_use]
    pub fn from_pixels(pixels: Vec<(u32, u32)>) -> Self {
        let points: Vec<Coord<f64>> = pixels
            .iter()
            .map(|&(x, y)| Coord {
                x: f64::from(x),
                y: f64::from(y),
            })
            .collect();
        let hull = convex_hull(&points);
        let hull_area = polygon_area(&hull);
        Self {
            pixels,
            hull,
            hull_area,
        }
    }

    /// Member pixel coordinates, in discovery order.
    #[must_use]
    pub fn pixels(&self) -> &[(u32, u32)] {
        &self.pixels
    }

    /// Number of member pixels.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// Convex hull vertices.
    #[must_use]
    pub fn hull(&self) -> &[Coord<f64>] {
        &self.hull
    }

    /// Area of the convex hull in square pixels.
    #[must_use]
    pub const fn hull_area(&self) -> f64 {
        self.hull_area
    }

    /// `pixel_count / hull_area`, or `None` for a degenerate hull
    /// (fewer than three vertices or zero area).
    ///
    /// Hulls run through pixel centers, so a filled shape can score
    /// slightly above 1.0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn solidity(&self) -> Option<f64> {
        (self.hull.len() >= 3 && self.hull_area > 0.0)
            .then(|| self.pixels.len() as f64 / self.hull_area)
    }

    /// Whether this cluster is a leak under `size_threshold` and
    /// `solidity_threshold`.
    #[must_use]
    pub fn is_blob(&self, size_threshold: usize, solidity_threshold: f64) -> bool {
        self.pixels.len() > size_threshold
            && self.solidity().is_some_and(|s| s > solidity_threshold)
    }
}

/// Outcome of [`scan`], with the counts diagnostics report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterScan {
    /// Whether a big, solid cluster was found.
    pub needs_refinement: bool,
    /// Clusters traversed before the scan finished or stopped early.
    pub clusters_examined: usize,
    /// Pixel count of the largest cluster traversed.
    pub largest_cluster: usize,
    /// Highest solidity among clusters above the size threshold.
    pub best_solidity: Option<f64>,
    /// `true` when the total leak count was below the size threshold
    /// and no traversal happened.
    pub fast_path: bool,
}

/// Decide whether `mask` contains a leak worth refining.
///
/// Returns `false` immediately if the total leak count is below
/// `cluster_size_threshold`, since no cluster could exceed it.
#[must_use]
pub fn needs_refinement(
    mask: &LeakMask,
    cluster_size_threshold: usize,
    neighborhood_radius: u32,
    solidity_threshold: f64,
) -> bool {
    let thresholds = DetectionThresholds {
        cluster_size_threshold,
        neighborhood_radius,
        solidity_threshold,
        ..DetectionThresholds::realistic()
    };
    scan(mask, &thresholds).needs_refinement
}

/// [`needs_refinement`] with diagnostics. Stops at the first blob.
#[must_use]
pub fn scan(mask: &LeakMask, thresholds: &DetectionThresholds) -> ClusterScan {
    let size_threshold = thresholds.cluster_size_threshold;
    let mut result = ClusterScan {
        needs_refinement: false,
        clusters_examined: 0,
        largest_cluster: 0,
        best_solidity: None,
        fast_path: false,
    };

    if mask.count() < size_threshold {
        result.fast_path = true;
        return result;
    }

    for pixels in Components::new(mask, thresholds.neighborhood_radius) {
        result.clusters_examined += 1;
        result.largest_cluster = result.largest_cluster.max(pixels.len());
        if pixels.len() <= size_threshold {
            continue;
        }

        let cluster = Cluster::from_pixels(pixels);
        let solidity = cluster.solidity();
        tracing::debug!(
            pixels = cluster.pixel_count(),
            hull_area = cluster.hull_area(),
            ?solidity,
            "large leak cluster"
        );
        if let Some(s) = solidity {
            result.best_solidity = Some(result.best_solidity.map_or(s, |b: f64| b.max(s)));
        }
        if cluster.is_blob(size_threshold, thresholds.solidity_threshold) {
            result.needs_refinement = true;
            break;
        }
    }

    result
}

/// Every cluster in `mask`, largest first.
///
/// Unlike [`scan`] this never stops early and computes hulls for all
/// clusters, so it is meant for diagnostics rather than the hot path.
#[must_use]
pub fn find_clusters(mask: &LeakMask, neighborhood_radius: u32) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Components::new(mask, neighborhood_radius)
        .map(Cluster::from_pixels)
        .collect();
    clusters.sort_by(|a, b| b.pixel_count().cmp(&a.pixel_count()));
    clusters
}

/// Lazy breadth-first traversal of window-connected leak components.
///
/// Each leak pixel is visited exactly once across the whole iteration;
/// total work is O(pixels x window area).
struct Components<'a> {
    mask: &'a LeakMask,
    radius: i64,
    visited: Vec<bool>,
    next_seed: usize,
    queue: VecDeque<usize>,
}

impl<'a> Components<'a> {
    fn new(mask: &'a LeakMask, radius: u32) -> Self {
        Self {
            mask,
            radius: i64::from(radius),
            visited: vec![false; mask.as_slice().len()],
            next_seed: 0,
            queue: VecDeque::new(),
        }
    }
}

impl Iterator for Components<'_> {
    type Item = Vec<(u32, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        let cells = self.mask.as_slice();
        let width = self.mask.width() as usize;
        let (w, h) = (i64::from(self.mask.width()), i64::from(self.mask.height()));

        let seed = (self.next_seed..cells.len()).find(|&i| cells[i] && !self.visited[i])?;
        self.next_seed = seed + 1;
        self.visited[seed] = true;
        self.queue.push_back(seed);

        let mut pixels = Vec::new();
        while let Some(i) = self.queue.pop_front() {
            let (x, y) = coords(i, width);
            pixels.push((x, y));

            let (cx, cy) = (i64::from(x), i64::from(y));
            let y_range = (cy - self.radius).max(0)..=(cy + self.radius).min(h - 1);
            for ny in y_range {
                let x_range = (cx - self.radius).max(0)..=(cx + self.radius).min(w - 1);
                for nx in x_range {
                    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let n = ny as usize * width + nx as usize;
                    if cells[n] && !self.visited[n] {
                        self.visited[n] = true;
                        self.queue.push_back(n);
                    }
                }
            }
        }

        Some(pixels)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    fn mask_from(width: u32, height: u32, points: impl IntoIterator<Item = (u32, u32)>) -> LeakMask {
        let mut mask = LeakMask::new(Dimensions { width, height });
        for (x, y) in points {
            mask.set(x, y);
        }
        mask
    }

    fn filled_rect(x0: u32, y0: u32, w: u32, h: u32) -> impl Iterator<Item = (u32, u32)> {
        (y0..y0 + h).flat_map(move |y| (x0..x0 + w).map(move |x| (x, y)))
    }

    #[test]
    fn empty_mask_takes_fast_path() {
        let mask = mask_from(10, 10, []);
        let result = scan(&mask, &DetectionThresholds::realistic());
        assert!(result.fast_path);
        assert!(!result.needs_refinement);
        assert_eq!(result.clusters_examined, 0);
    }

    #[test]
    fn total_below_threshold_never_refines() {
        // A perfectly solid square, but only 100 pixels.
        let mask = mask_from(50, 50, filled_rect(5, 5, 10, 10));
        assert!(!needs_refinement(&mask, 101, 1, 0.5));
        let result = scan(
            &mask,
            &DetectionThresholds {
                cluster_size_threshold: 101,
                ..DetectionThresholds::realistic()
            },
        );
        assert!(result.fast_path);
    }

    #[test]
    fn solid_square_above_threshold_refines() {
        let mask = mask_from(50, 50, filled_rect(5, 5, 20, 20));
        assert!(needs_refinement(&mask, 100, 1, 0.75));
    }

    #[test]
    fn cluster_must_strictly_exceed_size_threshold() {
        let mask = mask_from(50, 50, filled_rect(0, 0, 10, 10));
        assert!(!needs_refinement(&mask, 100, 1, 0.5));
        assert!(needs_refinement(&mask, 99, 1, 0.5));
    }

    #[test]
    fn many_small_clusters_do_not_add_up() {
        // 16 separate 5x5 squares: 400 leak pixels total, none > 100.
        let points = (0..4).flat_map(|i| (0..4).flat_map(move |j| filled_rect(i * 12, j * 12, 5, 5)));
        let mask = mask_from(60, 60, points);
        let result = scan(
            &mask,
            &DetectionThresholds {
                cluster_size_threshold: 100,
                neighborhood_radius: 2,
                ..DetectionThresholds::realistic()
            },
        );
        assert!(!result.fast_path);
        assert!(!result.needs_refinement);
        assert_eq!(result.clusters_examined, 16);
        assert_eq!(result.largest_cluster, 25);
    }

    #[test]
    fn window_radius_bridges_dither_gaps() {
        // Every other column of a 30x30 block: 4/8-connectivity keeps the
        // columns apart, a radius-2 window joins them into one cluster.
        let points = filled_rect(0, 0, 30, 30).filter(|&(x, _)| x % 2 == 0);
        let mask = mask_from(40, 40, points);
        assert_eq!(find_clusters(&mask, 1).len(), 15);
        assert_eq!(find_clusters(&mask, 2).len(), 1);
        // 450 pixels over a ~28x29 hull: solidity ~0.55.
        assert!(!needs_refinement(&mask, 100, 2, 0.75));
        assert!(needs_refinement(&mask, 100, 2, 0.5));
    }

    #[test]
    fn collinear_streak_is_degenerate() {
        let mask = mask_from(300, 5, (0..300).map(|x| (x, 2)));
        let clusters = find_clusters(&mask, 1);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].solidity(), None);
        assert!(!needs_refinement(&mask, 10, 1, 0.0));
    }

    #[test]
    fn l_shaped_streak_has_low_solidity() {
        let horizontal = (0..200).map(|x| (x, 0));
        let vertical = (1..200).map(|y| (0, y));
        let mask = mask_from(200, 200, horizontal.chain(vertical));
        let clusters = find_clusters(&mask, 1);
        assert_eq!(clusters.len(), 1);
        let solidity = clusters[0].solidity().unwrap();
        // 399 pixels over a triangle of area 199*199/2.
        assert!(solidity < 0.05, "solidity {solidity}");
        assert!(!needs_refinement(&mask, 100, 1, 0.75));
    }

    #[test]
    fn find_clusters_sorted_largest_first() {
        let points = filled_rect(0, 0, 3, 3).chain(filled_rect(20, 20, 5, 5));
        let mask = mask_from(30, 30, points);
        let clusters = find_clusters(&mask, 1);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].pixel_count(), 25);
        assert_eq!(clusters[1].pixel_count(), 9);
        assert!((clusters[0].hull_area() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn every_leak_pixel_lands_in_exactly_one_cluster() {
        let points = filled_rect(0, 0, 7, 3)
            .chain(filled_rect(10, 10, 4, 4))
            .chain([(25, 25), (27, 27)]);
        let mask = mask_from(30, 30, points);
        let clusters = find_clusters(&mask, 2);
        let total: usize = clusters.iter().map(Cluster::pixel_count).sum();
        assert_eq!(total, mask.count());
        let mut all: Vec<_> = clusters.iter().flat_map(|c| c.pixels().to_vec()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), mask.count());
    }

    #[test]
    fn scan_reports_best_solidity() {
        let mask = mask_from(50, 50, filled_rect(0, 0, 20, 20));
        let result = scan(
            &mask,
            &DetectionThresholds {
                cluster_size_threshold: 100,
                solidity_threshold: 2.0,
                ..DetectionThresholds::realistic()
            },
        );
        assert!(!result.needs_refinement);
        // 400 pixels over a 19x19 hull.
        let best = result.best_solidity.unwrap();
        assert!((best - 400.0 / 361.0).abs() < 1e-9, "{best}");
    }
}
