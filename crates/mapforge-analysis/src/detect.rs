//! Synchronous leak detection: decode, classify, cluster, render.

use web_time::Instant;

use crate::classify::classify;
use crate::cluster::scan;
use crate::codec::{EncodedImage, decode_rgba};
use crate::config::{DetectionConfig, OutputStyle};
use crate::diagnostics::{DetectionDiagnostics, DetectionSummary, StageDiagnostics, StageMetrics};
use crate::heatmap::render_heatmap;
use crate::types::{AnalysisError, Dimensions, LeakMask, RgbaImage};

/// Result of a detection run.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Whether a big, solid leak cluster was found.
    pub needs_refinement: bool,
    /// Per-pixel leak labels.
    pub mask: LeakMask,
    /// PNG heatmap of [`mask`](Self::mask), or `None` when no pixel leaked.
    pub leak_map: Option<EncodedImage>,
    /// Timing and counts per stage.
    pub diagnostics: DetectionDiagnostics,
}

impl Detection {
    /// Number of pixels labeled as leaks.
    #[must_use]
    pub fn leak_pixel_count(&self) -> usize {
        self.mask.count()
    }
}

/// Run detection on encoded image bytes using the thresholds `config`
/// selects for `style`.
///
/// # Errors
///
/// Returns [`AnalysisError::EmptyInput`] or [`AnalysisError::ImageDecode`]
/// for unreadable input, [`AnalysisError::InvalidConfig`] if `config`
/// fails [`DetectionConfig::validate`], and [`AnalysisError::ImageEncode`] if the
/// heatmap cannot be encoded.
pub fn detect(
    image_bytes: &[u8],
    config: &DetectionConfig,
    style: OutputStyle,
) -> Result<Detection, AnalysisError> {
    let total_start = Instant::now();

    let start = Instant::now();
    let image = decode_rgba(image_bytes)?;
    let decode = StageDiagnostics {
        duration: start.elapsed(),
        metrics: StageMetrics::Decode {
            input_bytes: image_bytes.len(),
            width: image.width(),
            height: image.height(),
        },
    };

    detect_decoded(&image, decode, config, style, total_start)
}

/// [`detect`] on an already decoded bitmap. The decode stage is
/// reported with zero duration.
///
/// # Errors
///
/// As [`detect`], minus the decode errors.
pub fn detect_image(
    image: &RgbaImage,
    config: &DetectionConfig,
    style: OutputStyle,
) -> Result<Detection, AnalysisError> {
    let total_start = Instant::now();
    let decode = StageDiagnostics {
        duration: std::time::Duration::ZERO,
        metrics: StageMetrics::Decode {
            input_bytes: 0,
            width: image.width(),
            height: image.height(),
        },
    };
    detect_decoded(image, decode, config, style, total_start)
}

fn detect_decoded(
    image: &RgbaImage,
    decode: StageDiagnostics,
    config: &DetectionConfig,
    style: OutputStyle,
    total_start: Instant,
) -> Result<Detection, AnalysisError> {
    config.validate()?;
    let thresholds = config.thresholds_for(style);
    let dimensions = Dimensions::of(image);

    let start = Instant::now();
    let classification = classify(image, &config.palette, thresholds);
    let classify_diag = StageDiagnostics {
        duration: start.elapsed(),
        metrics: StageMetrics::Classify {
            palette_hits: classification.palette_hits,
            flat_hits: classification.flat_hits,
            flat_pass: thresholds.flatness().is_some(),
            total_pixel_count: dimensions.pixel_count(),
        },
    };
    let mask = classification.mask;

    let start = Instant::now();
    let cluster_scan = scan(&mask, thresholds);
    let cluster_diag = StageDiagnostics {
        duration: start.elapsed(),
        metrics: StageMetrics::Cluster {
            fast_path: cluster_scan.fast_path,
            clusters_examined: cluster_scan.clusters_examined,
            largest_cluster: cluster_scan.largest_cluster,
            best_solidity: cluster_scan.best_solidity,
            size_threshold: thresholds.cluster_size_threshold,
            solidity_threshold: thresholds.solidity_threshold,
        },
    };

    let (leak_map, render) = if mask.is_clear() {
        (None, None)
    } else {
        let start = Instant::now();
        let encoded = EncodedImage::encode(&render_heatmap(&mask))?;
        let render = StageDiagnostics {
            duration: start.elapsed(),
            metrics: StageMetrics::Render {
                encoded_bytes: encoded.len(),
            },
        };
        (Some(encoded), Some(render))
    };

    let needs_refinement = cluster_scan.needs_refinement;
    let leak_pixel_count = mask.count();
    tracing::debug!(
        %style,
        %dimensions,
        leak_pixel_count,
        needs_refinement,
        "detection finished"
    );

    Ok(Detection {
        needs_refinement,
        mask,
        leak_map,
        diagnostics: DetectionDiagnostics {
            style,
            decode,
            classify: classify_diag,
            cluster: cluster_diag,
            render,
            total_duration: total_start.elapsed(),
            summary: DetectionSummary {
                image_width: dimensions.width,
                image_height: dimensions.height,
                pixel_count: dimensions.pixel_count(),
                leak_pixel_count,
                needs_refinement,
            },
        },
    })
}
