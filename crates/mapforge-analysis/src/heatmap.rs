//! Leak heatmap rendering.

use crate::types::{LeakMask, RgbaImage};

/// Translucent red drawn over every leak pixel.
pub const LEAK_HIGHLIGHT: image::Rgba<u8> = image::Rgba([255, 32, 32, 160]);

/// Render `mask` as an overlay the size of the analyzed image.
///
/// Leak pixels get [`LEAK_HIGHLIGHT`]; everything else is fully
/// transparent, so the overlay can be composited on the map as-is.
#[must_use]
pub fn render_heatmap(mask: &LeakMask) -> RgbaImage {
    let mut overlay = RgbaImage::new(mask.width(), mask.height());
    for (x, y) in mask.leak_pixels() {
        overlay.put_pixel(x, y, LEAK_HIGHLIGHT);
    }
    overlay
}
