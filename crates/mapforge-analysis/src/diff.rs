//! Diff maps between consecutive revisions.
//!
//! A diff map highlights the pixels a refinement pass changed. Only the
//! RGB channels are compared; alpha is ignored like everywhere else in
//! the analysis.

use crate::codec::EncodedImage;
use crate::types::{AnalysisError, Dimensions, Rgb, RgbaImage};

/// Translucent cyan drawn over every changed pixel.
pub const DIFF_HIGHLIGHT: image::Rgba<u8> = image::Rgba([0, 200, 255, 160]);

/// Mark pixels whose squared RGB distance between `before` and `after`
/// strictly exceeds `threshold_sq`.
///
/// Returns `Ok(None)` when no pixel changed. The marked set is the same
/// whichever image is passed first.
///
/// # Errors
///
/// Returns [`AnalysisError::DimensionMismatch`] if the images differ in
/// size.
pub fn diff_map(
    before: &RgbaImage,
    after: &RgbaImage,
    threshold_sq: u32,
) -> Result<Option<RgbaImage>, AnalysisError> {
    let (before_dims, after_dims) = (Dimensions::of(before), Dimensions::of(after));
    if before_dims != after_dims {
        return Err(AnalysisError::DimensionMismatch {
            before: before_dims,
            after: after_dims,
        });
    }

    let mut overlay = RgbaImage::new(before.width(), before.height());
    let mut changed = 0usize;
    for ((a, b), out) in before.pixels().zip(after.pixels()).zip(overlay.pixels_mut()) {
        if Rgb::from_rgba(*a).distance_squared(Rgb::from_rgba(*b)) > threshold_sq {
            *out = DIFF_HIGHLIGHT;
            changed += 1;
        }
    }

    tracing::debug!(dimensions = %before_dims, changed, "diff map");
    Ok((changed > 0).then_some(overlay))
}

/// [`diff_map`] on encoded images, returning the overlay PNG-encoded.
///
/// # Errors
///
/// Propagates decode, dimension and encode errors.
pub fn diff_encoded(
    before: &EncodedImage,
    after: &EncodedImage,
    threshold_sq: u32,
) -> Result<Option<EncodedImage>, AnalysisError> {
    let before = before.decode()?;
    let after = after.decode()?;
    diff_map(&before, &after, threshold_sq)?
        .map(|overlay| EncodedImage::encode(&overlay))
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, image::Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    fn marked(overlay: &RgbaImage) -> Vec<(u32, u32)> {
        overlay
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == DIFF_HIGHLIGHT)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn identical_images_have_no_diff() {
        let img = solid(6, 6, [10, 20, 30]);
        assert!(diff_map(&img, &img, 0).unwrap().is_none());
    }

    #[test]
    fn mismatched_dimensions_fail_loudly() {
        let err = diff_map(&solid(4, 4, [0; 3]), &solid(4, 5, [0; 3]), 900).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::DimensionMismatch {
                before: Dimensions {
                    width: 4,
                    height: 4
                },
                after: Dimensions {
                    width: 4,
                    height: 5
                },
            }
        ));
    }

    #[test]
    fn changes_below_threshold_are_ignored() {
        let a = solid(3, 3, [100, 100, 100]);
        let mut b = a.clone();
        // Distance 3 * 10^2 = 300 < 900.
        b.put_pixel(0, 0, image::Rgba([110, 110, 110, 255]));
        // Distance 40^2 = 1600 > 900.
        b.put_pixel(2, 2, image::Rgba([140, 100, 100, 255]));
        let overlay = diff_map(&a, &b, 900).unwrap().unwrap();
        assert_eq!(marked(&overlay), vec![(2, 2)]);
        assert_eq!(overlay.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn threshold_is_exclusive() {
        let a = solid(1, 1, [0, 0, 0]);
        let b = solid(1, 1, [30, 0, 0]);
        assert!(diff_map(&a, &b, 900).unwrap().is_none());
        assert!(diff_map(&a, &b, 899).unwrap().is_some());
    }

    #[test]
    fn alpha_only_changes_are_ignored() {
        let a = solid(2, 2, [50, 60, 70]);
        let b = RgbaImage::from_pixel(2, 2, image::Rgba([50, 60, 70, 0]));
        assert!(diff_map(&a, &b, 0).unwrap().is_none());
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn diff_is_symmetric() {
        let a = RgbaImage::from_fn(16, 16, |x, y| image::Rgba([(x * 16) as u8, (y * 16) as u8, 0, 255]));
        let b = RgbaImage::from_fn(16, 16, |x, y| {
            image::Rgba([(x * 16) as u8, (y * 16) as u8, ((x ^ y) * 16) as u8, 255])
        });
        let ab = marked(&diff_map(&a, &b, 900).unwrap().unwrap());
        let ba = marked(&diff_map(&b, &a, 900).unwrap().unwrap());
        assert!(!ab.is_empty());
        assert_eq!(ab, ba);
    }

    #[test]
    fn encoded_variant_round_trips_overlay() {
        let a = EncodedImage::encode(&solid(3, 2, [0, 0, 0])).unwrap();
        let b = EncodedImage::encode(&solid(3, 2, [255, 255, 255])).unwrap();
        let overlay = diff_encoded(&a, &b, 900).unwrap().unwrap().decode().unwrap();
        assert_eq!(marked(&overlay).len(), 6);
        assert!(diff_encoded(&a, &a, 900).unwrap().is_none());
    }
}
