//! Shared types for the mapforge leak analysis.

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can reference decoded
/// bitmaps without depending on `image` directly.
pub use image::RgbaImage;

/// An RGB color. Alpha is ignored for all matching purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Create a new color.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Take the RGB channels of an RGBA pixel, dropping alpha.
    #[must_use]
    pub const fn from_rgba(pixel: image::Rgba<u8>) -> Self {
        let [r, g, b, _] = pixel.0;
        Self { r, g, b }
    }

    /// Squared Euclidean distance in RGB space.
    ///
    /// Avoids the square root; thresholds are expressed squared too.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> u32 {
        let dr = u32::from(self.r.abs_diff(other.r));
        let dg = u32::from(self.g.abs_diff(other.g));
        let db = u32::from(self.b.abs_diff(other.b));
        dr * dr + dg * dg + db * db
    }

    /// Parse a CSS hex color (`"#1a2b3c"` or `"#abc"`, surrounding
    /// whitespace allowed).
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if the string is not a
    /// 3- or 6-digit hex color with a leading `#`.
    pub fn parse_hex(s: &str) -> Result<Self, AnalysisError> {
        let s = s.trim();
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| AnalysisError::InvalidConfig(format!("not a hex color: {s:?}")))?;
        match hex.len() {
            3 => {
                // Short form: #rgb -> #rrggbb
                let mut rgb = [0u8; 3];
                for (i, ch) in hex.chars().enumerate() {
                    let n = ch.to_digit(16).ok_or_else(|| {
                        AnalysisError::InvalidConfig(format!("invalid hex char: {ch}"))
                    })?;
                    #[expect(clippy::cast_possible_truncation)]
                    {
                        rgb[i] = (n * 17) as u8;
                    }
                }
                Ok(Self::new(rgb[0], rgb[1], rgb[2]))
            }
            6 if hex.is_ascii() => {
                let r = u8::from_str_radix(&hex[0..2], 16);
                let g = u8::from_str_radix(&hex[2..4], 16);
                let b = u8::from_str_radix(&hex[4..6], 16);
                match (r, g, b) {
                    (Ok(r), Ok(g), Ok(b)) => Ok(Self::new(r, g, b)),
                    _ => Err(AnalysisError::InvalidConfig(format!(
                        "invalid hex color: {s:?}"
                    ))),
                }
            }
            _ => Err(AnalysisError::InvalidConfig(format!(
                "unexpected hex length: {s:?}"
            ))),
        }
    }

    /// Format as a lowercase `#rrggbb` string.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an RGBA bitmap.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Per-pixel leak labels, row-major, same dimensions as the analysed
/// bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakMask {
    dimensions: Dimensions,
    cells: Vec<bool>,
}

impl LeakMask {
    /// An all-clear mask.
    #[must_use]
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            cells: vec![false; dimensions.pixel_count()],
        }
    }

    /// Mask dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.dimensions.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Whether the pixel at `(x, y)` is a leak. Out-of-bounds is `false`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.dimensions.width
            && y < self.dimensions.height
            && self.cells[self.index(x, y)]
    }

    /// Mark the pixel at `(x, y)` as a leak. Out-of-bounds is ignored.
    pub fn set(&mut self, x: u32, y: u32) {
        if x < self.dimensions.width && y < self.dimensions.height {
            let i = self.index(x, y);
            self.cells[i] = true;
        }
    }

    /// Row-major flags, one per pixel.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.cells
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [bool] {
        &mut self.cells
    }

    /// Number of leak pixels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Returns `true` if no pixel is marked.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        !self.cells.iter().any(|&c| c)
    }

    /// Coordinates of every leak pixel in row-major order.
    pub fn leak_pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.dimensions.width as usize;
        self.cells
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c)
            .map(move |(i, _)| coords(i, width))
    }

    const fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.dimensions.width as usize + x as usize
    }
}

/// Convert a row-major index back into `(x, y)`.
#[expect(clippy::cast_possible_truncation)]
pub(crate) const fn coords(index: usize, width: usize) -> (u32, u32) {
    ((index % width) as u32, (index / width) as u32)
}

/// Errors that can occur during leak analysis.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Failed to encode an output image.
    #[error("failed to encode image: {0}")]
    ImageEncode(String),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Configuration (palette or thresholds) is invalid.
    #[error("invalid analysis configuration: {0}")]
    InvalidConfig(String),

    /// A data URI could not be parsed.
    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),

    /// Two bitmaps that must match in size do not.
    #[error("dimension mismatch: {before} vs {after}")]
    DimensionMismatch {
        /// Size of the first bitmap.
        before: Dimensions,
        /// Size of the second bitmap.
        after: Dimensions,
    },
}

/// Serde-compatible proxy for `AnalysisError`.
///
/// `image::ImageError` does not implement serde, so the `ImageDecode`
/// variant stores its `Display` string instead.
#[derive(Serialize, Deserialize)]
enum AnalysisErrorProxy {
    ImageDecode(String),
    ImageEncode(String),
    EmptyInput,
    InvalidConfig(String),
    InvalidDataUri(String),
    DimensionMismatch {
        before: Dimensions,
        after: Dimensions,
    },
}

impl Serialize for AnalysisError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => AnalysisErrorProxy::ImageDecode(e.to_string()),
            Self::ImageEncode(s) => AnalysisErrorProxy::ImageEncode(s.clone()),
            Self::EmptyInput => AnalysisErrorProxy::EmptyInput,
            Self::InvalidConfig(s) => AnalysisErrorProxy::InvalidConfig(s.clone()),
            Self::InvalidDataUri(s) => AnalysisErrorProxy::InvalidDataUri(s.clone()),
            Self::DimensionMismatch { before, after } => AnalysisErrorProxy::DimensionMismatch {
                before: *before,
                after: *after,
            },
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnalysisError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = AnalysisErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            // The typed image::ImageError cannot be rebuilt; keep the message.
            AnalysisErrorProxy::ImageDecode(msg) => {
                Self::InvalidConfig(format!("image decode error: {msg}"))
            }
            AnalysisErrorProxy::ImageEncode(s) => Self::ImageEncode(s),
            AnalysisErrorProxy::EmptyInput => Self::EmptyInput,
            AnalysisErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            AnalysisErrorProxy::InvalidDataUri(s) => Self::InvalidDataUri(s),
            AnalysisErrorProxy::DimensionMismatch { before, after } => {
                Self::DimensionMismatch { before, after }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn distance_squared_is_symmetric_and_zero_on_self() {
        let a = Rgb::new(10, 200, 30);
        let b = Rgb::new(13, 196, 30);
        assert_eq!(a.distance_squared(b), 9 + 16);
        assert_eq!(b.distance_squared(a), 25);
        assert_eq!(a.distance_squared(a), 0);
    }

    #[test]
    fn distance_squared_extremes_fit_u32() {
        let black = Rgb::new(0, 0, 0);
        let white = Rgb::new(255, 255, 255);
        assert_eq!(black.distance_squared(white), 3 * 255 * 255);
    }

    #[test]
    fn from_rgba_drops_alpha() {
        let c = Rgb::from_rgba(image::Rgba([1, 2, 3, 0]));
        assert_eq!(c, Rgb::new(1, 2, 3));
    }

    #[test]
    fn parse_hex_long_and_short() {
        assert_eq!(Rgb::parse_hex("#1a2B3c").unwrap(), Rgb::new(0x1a, 0x2b, 0x3c));
        assert_eq!(Rgb::parse_hex(" #fff ").unwrap(), Rgb::new(255, 255, 255));
    }

    #[test]
    fn parse_hex_rejects_garbage() {
        assert!(matches!(
            Rgb::parse_hex("123456"),
            Err(AnalysisError::InvalidConfig(_))
        ));
        assert!(Rgb::parse_hex("#12345").is_err());
        assert!(Rgb::parse_hex("#gg0000").is_err());
    }

    #[test]
    fn to_hex_round_trips() {
        let c = Rgb::new(0x0f, 0xa0, 0xff);
        assert_eq!(c.to_hex(), "#0fa0ff");
        assert_eq!(Rgb::parse_hex(&c.to_hex()).unwrap(), c);
    }

    #[test]
    fn leak_mask_set_get_count() {
        let mut mask = LeakMask::new(Dimensions {
            width: 4,
            height: 3,
        });
        assert!(mask.is_clear());
        mask.set(0, 0);
        mask.set(3, 2);
        mask.set(3, 2);
        mask.set(9, 9); // ignored
        assert!(mask.get(0, 0));
        assert!(mask.get(3, 2));
        assert!(!mask.get(1, 1));
        assert!(!mask.get(9, 9));
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.leak_pixels().collect::<Vec<_>>(), vec![(0, 0), (3, 2)]);
    }

    #[test]
    fn error_display() {
        let err = AnalysisError::DimensionMismatch {
            before: Dimensions {
                width: 2,
                height: 3,
            },
            after: Dimensions {
                width: 4,
                height: 5,
            },
        };
        assert_eq!(err.to_string(), "dimension mismatch: 2x3 vs 4x5");
        assert_eq!(
            AnalysisError::EmptyInput.to_string(),
            "input image data is empty"
        );
    }

    #[test]
    fn error_serde_preserves_dimension_mismatch() {
        let err = AnalysisError::DimensionMismatch {
            before: Dimensions {
                width: 1,
                height: 1,
            },
            after: Dimensions {
                width: 2,
                height: 2,
            },
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: AnalysisError = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            AnalysisError::DimensionMismatch { after, .. } if after.width == 2
        ));
    }

    #[test]
    fn error_serde_decode_becomes_message() {
        let decode_err = image::load_from_memory(&[0xFF, 0x00]).unwrap_err();
        let err = AnalysisError::ImageDecode(decode_err);
        let json = serde_json::to_string(&err).unwrap();
        let back: AnalysisError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, AnalysisError::InvalidConfig(ref s) if s.starts_with("image decode error")));
    }
}
