//! Detection thresholds and output-style policies.
//!
//! Every threshold here was tuned empirically against generated maps.
//! They are configuration, not law: the presets are a starting point
//! and every field can be overridden (see `mapforge-bench
//! --config-json`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::palette::Palette;
use crate::types::AnalysisError;

/// Rendering style requested from the generator.
///
/// The style decides which [`DetectionThresholds`] preset applies:
/// stylized output legitimately contains large flat color blocks, so it
/// needs looser matching and no flat-patch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    /// Painterly or photographic terrain with blended textures.
    #[default]
    Realistic,
    /// Blocky, flat-shaded, game-map look.
    Stylized,
}

impl OutputStyle {
    /// All styles, in display order.
    pub const ALL: [Self; 2] = [Self::Realistic, Self::Stylized];

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Realistic => "realistic",
            Self::Stylized => "stylized",
        }
    }
}

impl fmt::Display for OutputStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Threshold bundle for one detection run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionThresholds {
    /// A cluster must have strictly more pixels than this to count. Also
    /// the minimum size (exclusive) of a flat region in the flat-patch
    /// pass.
    pub cluster_size_threshold: usize,

    /// A pixel is a palette leak when its squared RGB distance to some
    /// palette color is strictly below this.
    pub color_match_threshold_sq: u32,

    /// Neighbor tolerance for the flat-patch pass (squared RGB distance).
    /// `None` disables the pass.
    pub flatness_threshold_sq: Option<u32>,

    /// Half-width of the square window used to connect leak pixels into
    /// clusters. 1 is plain 8-connectivity; larger values bridge
    /// dithering gaps.
    pub neighborhood_radius: u32,

    /// A large cluster is a blob (and a leak) when `pixels / hull area`
    /// strictly exceeds this.
    pub solidity_threshold: f64,
}

impl DetectionThresholds {
    /// Default window radius for cluster connectivity.
    pub const DEFAULT_NEIGHBORHOOD_RADIUS: u32 = 2;

    /// Default solidity cut-off separating blobs from streaks.
    pub const DEFAULT_SOLIDITY_THRESHOLD: f64 = 0.75;

    /// Preset for [`OutputStyle::Realistic`]: small clusters matter,
    /// tight color tolerance, flat-patch pass enabled.
    #[must_use]
    pub const fn realistic() -> Self {
        Self {
            cluster_size_threshold: 400,
            color_match_threshold_sq: 30 * 30,
            flatness_threshold_sq: Some(6 * 6),
            neighborhood_radius: Self::DEFAULT_NEIGHBORHOOD_RADIUS,
            solidity_threshold: Self::DEFAULT_SOLIDITY_THRESHOLD,
        }
    }

    /// Preset for [`OutputStyle::Stylized`]: only big clusters matter,
    /// loose color tolerance, flat-patch pass disabled.
    #[must_use]
    pub const fn stylized() -> Self {
        Self {
            cluster_size_threshold: 1500,
            color_match_threshold_sq: 40 * 40,
            flatness_threshold_sq: None,
            neighborhood_radius: Self::DEFAULT_NEIGHBORHOOD_RADIUS,
            solidity_threshold: Self::DEFAULT_SOLIDITY_THRESHOLD,
        }
    }

    /// The flat-patch tolerance, if the pass is enabled.
    ///
    /// `Some(0)` is treated as disabled: no pair of pixels can be
    /// strictly closer than zero.
    #[must_use]
    pub fn flatness(&self) -> Option<u32> {
        self.flatness_threshold_sq.filter(|&t| t > 0)
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] if the color tolerance or
    /// window radius is zero, or the solidity threshold is not a finite
    /// non-negative number.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.color_match_threshold_sq == 0 {
            return Err(AnalysisError::InvalidConfig(
                "color_match_threshold_sq must be > 0".into(),
            ));
        }
        if self.neighborhood_radius == 0 {
            return Err(AnalysisError::InvalidConfig(
                "neighborhood_radius must be >= 1".into(),
            ));
        }
        if !self.solidity_threshold.is_finite() || self.solidity_threshold < 0.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "solidity_threshold must be finite and >= 0, got {}",
                self.solidity_threshold
            )));
        }
        Ok(())
    }
}

/// Full analysis configuration: palette, one threshold bundle per
/// style, and the diff-map tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Blueprint colors.
    pub palette: Palette,
    /// Thresholds for [`OutputStyle::Realistic`].
    pub realistic: DetectionThresholds,
    /// Thresholds for [`OutputStyle::Stylized`].
    pub stylized: DetectionThresholds,
    /// Squared RGB distance above which a pixel counts as changed in a
    /// diff map.
    pub diff_threshold_sq: u32,
}

impl DetectionConfig {
    /// Default diff-map tolerance.
    pub const DEFAULT_DIFF_THRESHOLD_SQ: u32 = 30 * 30;

    /// Thresholds selected by `style`.
    #[must_use]
    pub const fn thresholds_for(&self, style: OutputStyle) -> &DetectionThresholds {
        match style {
            OutputStyle::Realistic => &self.realistic,
            OutputStyle::Stylized => &self.stylized,
        }
    }

    /// Check every threshold bundle and the palette against each
    /// bundle's color tolerance.
    ///
    /// # Errors
    ///
    /// Returns the first [`AnalysisError::InvalidConfig`] found.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for style in OutputStyle::ALL {
            let thresholds = self.thresholds_for(style);
            thresholds
                .validate()
                .map_err(|e| AnalysisError::InvalidConfig(format!("{style}: {e}")))?;
            self.palette.validate(thresholds.color_match_threshold_sq)?;
        }
        Ok(())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
            realistic: DetectionThresholds::realistic(),
            stylized: DetectionThresholds::stylized(),
            diff_threshold_sq: Self::DEFAULT_DIFF_THRESHOLD_SQ,
        }
    }
}
