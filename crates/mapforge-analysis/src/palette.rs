//! Blueprint palette: the fixed terrain colors a leak is matched against.
//!
//! Palettes are configured as an ordered list of `{id, hexColor}` pairs
//! and decomposed to RGB once at construction. The background color is
//! carried alongside so configuration can be checked for overlaps: the
//! blank canvas must never read as a leak.

use serde::{Deserialize, Serialize};

use crate::types::{AnalysisError, Rgb};

/// Serde support for [`Rgb`] as a CSS hex string.
mod hex_color {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::Rgb;

    pub fn serialize<S: Serializer>(color: &Rgb, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&color.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Rgb, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rgb::parse_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One terrain category of the blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteEntry {
    /// Stable identifier (e.g. `"water"`).
    pub id: String,
    /// Blueprint fill color.
    #[serde(rename = "hexColor", with = "hex_color")]
    pub color: Rgb,
}

impl PaletteEntry {
    /// Build an entry from an id and a hex color string.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if `hex` is not a valid
    /// CSS hex color.
    pub fn from_hex(id: impl Into<String>, hex: &str) -> Result<Self, AnalysisError> {
        Ok(Self {
            id: id.into(),
            color: Rgb::parse_hex(hex)?,
        })
    }
}

/// The ordered set of blueprint colors plus the canvas background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    /// Terrain entries, in configuration order.
    pub entries: Vec<PaletteEntry>,
    /// Unpainted canvas color. Never a leak.
    #[serde(with = "hex_color")]
    pub background: Rgb,
}

impl Palette {
    /// Terrain colors of the default blueprint tool.
    pub const DEFAULT_ENTRIES: [(&'static str, Rgb); 6] = [
        ("water", Rgb::new(0x1e, 0x64, 0xc8)),
        ("forest", Rgb::new(0x1f, 0x7a, 0x2e)),
        ("mountain", Rgb::new(0x8c, 0x6e, 0x50)),
        ("desert", Rgb::new(0xe6, 0xc8, 0x64)),
        ("grassland", Rgb::new(0x8c, 0xc8, 0x3c)),
        ("settlement", Rgb::new(0xc8, 0x32, 0x32)),
    ];

    /// Default canvas background.
    pub const DEFAULT_BACKGROUND: Rgb = Rgb::new(255, 255, 255);

    /// Build a palette from `(id, hexColor)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if any color fails to
    /// parse.
    pub fn from_hex_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
        background: Rgb,
    ) -> Result<Self, AnalysisError> {
        let entries = pairs
            .into_iter()
            .map(|(id, hex)| PaletteEntry::from_hex(id, hex))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entries,
            background,
        })
    }

    /// Iterate the terrain colors.
    pub fn colors(&self) -> impl Iterator<Item = Rgb> + '_ {
        self.entries.iter().map(|e| e.color)
    }

    /// Number of terrain entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the palette has no terrain entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `color` is strictly within `threshold_sq` of any entry.
    #[must_use]
    pub fn matches(&self, color: Rgb, threshold_sq: u32) -> bool {
        self.colors()
            .any(|c| c.distance_squared(color) < threshold_sq)
    }

    /// Check the palette is usable with the given match tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if the palette is empty,
    /// has duplicate ids, or the background would match an entry.
    pub fn validate(&self, color_match_threshold_sq: u32) -> Result<(), AnalysisError> {
        if self.entries.is_empty() {
            return Err(AnalysisError::InvalidConfig("palette has no entries".into()));
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if self.entries[..i].iter().any(|e| e.id == entry.id) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "duplicate palette id: {:?}",
                    entry.id
                )));
            }
            if entry.color.distance_squared(self.background) < color_match_threshold_sq {
                return Err(AnalysisError::InvalidConfig(format!(
                    "palette entry {:?} ({}) is within tolerance of the background ({})",
                    entry.id,
                    entry.color.to_hex(),
                    self.background.to_hex(),
                )));
            }
        }
        Ok(())
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            entries: Self::DEFAULT_ENTRIES
                .iter()
                .map(|&(id, color)| PaletteEntry {
                    id: id.to_string(),
                    color,
                })
                .collect(),
            background: Self::DEFAULT_BACKGROUND,
        }
    }
}
