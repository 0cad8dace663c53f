//! Pixel classification: label each pixel of a generated map as a leak
//! or not.
//!
//! Two independent passes feed one [`LeakMask`]:
//!
//! 1. **Flat-patch pass** (optional): 4-directional flood fill groups
//!    pixels whose neighbor-to-neighbor color distance is below the
//!    flatness tolerance. Any region larger than the cluster size
//!    threshold is marked, whatever its color. Catches unblended fills
//!    the model recolored away from the palette. Pixels within the
//!    match tolerance of the background color take no part: blank
//!    canvas is never a leak.
//! 2. **Palette pass**: every pixel not already marked is compared with
//!    each palette color and marked when strictly within the match
//!    tolerance. O(pixels x palette size).
//!
//! Both passes are deterministic and side-effect free.

use std::collections::VecDeque;

use crate::config::DetectionThresholds;
use crate::palette::Palette;
use crate::types::{Dimensions, LeakMask, Rgb, RgbaImage};

/// Output of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The combined leak labels.
    pub mask: LeakMask,
    /// Pixels marked by the palette pass.
    pub palette_hits: usize,
    /// Pixels marked by the flat-patch pass.
    pub flat_hits: usize,
}

/// Classify every pixel of `image` against `palette`.
///
/// Uses `color_match_threshold_sq`, `flatness_threshold_sq` and
/// `cluster_size_threshold` from `thresholds`; the flat-patch pass is
/// skipped when [`DetectionThresholds::flatness`] is `None`.
#[must_use = "returns the leak classification"]
pub fn classify(
    image: &RgbaImage,
    palette: &Palette,
    thresholds: &DetectionThresholds,
) -> Classification {
    let dimensions = Dimensions::of(image);
    let colors: Vec<Rgb> = image.pixels().map(|p| Rgb::from_rgba(*p)).collect();
    let mut mask = LeakMask::new(dimensions);

    let flat_hits = thresholds.flatness().map_or(0, |flatness_sq| {
        let canvas = Canvas {
            color: palette.background,
            threshold_sq: thresholds.color_match_threshold_sq,
        };
        mark_flat_regions(
            &colors,
            dimensions,
            flatness_sq,
            thresholds.cluster_size_threshold,
            canvas,
            mask.as_mut_slice(),
        )
    });

    let palette_hits = mark_palette_matches(
        &colors,
        palette,
        thresholds.color_match_threshold_sq,
        mask.as_mut_slice(),
    );

    tracing::debug!(
        %dimensions,
        palette_hits,
        flat_hits,
        "classified pixels"
    );

    Classification {
        mask,
        palette_hits,
        flat_hits,
    }
}

/// Mark unmarked pixels whose color is within tolerance of the palette.
///
/// Returns the number of newly marked pixels.
fn mark_palette_matches(
    colors: &[Rgb],
    palette: &Palette,
    threshold_sq: u32,
    cells: &mut [bool],
) -> usize {
    let mut hits = 0;
    for (cell, &color) in cells.iter_mut().zip(colors) {
        if !*cell && palette.matches(color, threshold_sq) {
            *cell = true;
            hits += 1;
        }
    }
    hits
}

/// Background color and the tolerance within which a pixel counts as
/// blank canvas.
#[derive(Debug, Clone, Copy)]
struct Canvas {
    color: Rgb,
    threshold_sq: u32,
}

impl Canvas {
    fn contains(self, color: Rgb) -> bool {
        self.color.distance_squared(color) < self.threshold_sq
    }
}

/// Flood-fill flat-color regions and mark those larger than
/// `min_region` (exclusive).
///
/// A neighbor joins a region when its squared distance to the pixel it
/// was reached from is strictly below `flatness_sq`, so slow gradients
/// can chain into one region. Canvas pixels neither seed nor join a
/// region. Uses an explicit queue; every pixel is enqueued at most once.
///
/// Returns the number of marked pixels.
fn mark_flat_regions(
    colors: &[Rgb],
    dimensions: Dimensions,
    flatness_sq: u32,
    min_region: usize,
    canvas: Canvas,
    cells: &mut [bool],
) -> usize {
    let width = dimensions.width as usize;
    let height = dimensions.height as usize;
    let mut visited: Vec<bool> = colors.iter().map(|&c| canvas.contains(c)).collect();
    let mut queue = VecDeque::new();
    let mut region = Vec::new();
    let mut hits = 0;

    for seed in 0..colors.len() {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        queue.push_back(seed);
        region.clear();

        while let Some(i) = queue.pop_front() {
            region.push(i);
            let (x, y) = (i % width, i / width);
            let here = colors[i];

            let neighbors = [
                (x > 0).then(|| i - 1),
                (x + 1 < width).then(|| i + 1),
                (y > 0).then(|| i - width),
                (y + 1 < height).then(|| i + width),
            ];
            for n in neighbors.into_iter().flatten() {
                if !visited[n] && here.distance_squared(colors[n]) < flatness_sq {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        if region.len() > min_region {
            for &i in &region {
                cells[i] = true;
            }
            hits += region.len();
        }
    }

    hits
}
