//! Detection diagnostics: timing and counts for each analysis stage.
//!
//! Collected on every call to [`detect`](crate::detect) and used for
//! threshold tuning (see `mapforge-bench`). Timestamps come from the
//! `web-time` crate; durations are serialized as fractional seconds
//! because `std::time::Duration` has no serde support.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::OutputStyle;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single detection run.
///
/// `render` is `None` when the mask was clear and no heatmap was
/// produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionDiagnostics {
    /// Style whose thresholds were applied.
    pub style: OutputStyle,
    /// Image decoding.
    pub decode: StageDiagnostics,
    /// Palette and flat-patch classification.
    pub classify: StageDiagnostics,
    /// Cluster scan and solidity checks.
    pub cluster: StageDiagnostics,
    /// Heatmap rendering and PNG encoding.
    pub render: Option<StageDiagnostics>,
    /// Wall-clock duration of the whole run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary across all stages.
    pub summary: DetectionSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding.
    Decode {
        /// Size of the encoded input.
        input_bytes: usize,
        /// Decoded width in pixels.
        width: u32,
        /// Decoded height in pixels.
        height: u32,
    },
    /// Pixel classification.
    Classify {
        /// Pixels marked by the palette pass.
        palette_hits: usize,
        /// Pixels marked by the flat-patch pass.
        flat_hits: usize,
        /// Whether the flat-patch pass ran.
        flat_pass: bool,
        /// Total pixels classified.
        total_pixel_count: usize,
    },
    /// Cluster analysis.
    Cluster {
        /// `true` when the leak total was below the size threshold.
        fast_path: bool,
        /// Clusters traversed.
        clusters_examined: usize,
        /// Pixel count of the largest cluster traversed.
        largest_cluster: usize,
        /// Highest solidity among clusters above the size threshold.
        best_solidity: Option<f64>,
        /// Size threshold in effect.
        size_threshold: usize,
        /// Solidity threshold in effect.
        solidity_threshold: f64,
    },
    /// Heatmap rendering.
    Render {
        /// Size of the PNG-encoded heatmap.
        encoded_bytes: usize,
    },
}

/// High-level summary of a detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSummary {
    /// Image width in pixels.
    pub image_width: u32,
    /// Image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: usize,
    /// Pixels labeled as leaks.
    pub leak_pixel_count: usize,
    /// Final verdict.
    pub needs_refinement: bool,
}

impl DetectionDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Leak Detection Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels), style: {}",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count, self.style,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages = vec![
            ("Decode", &self.decode),
            ("Classify", &self.classify),
            ("Cluster", &self.cluster),
        ];
        if let Some(ref render) = self.render {
            stages.push(("Render", render));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Leak pixels: {} ({:.2}%)  |  Needs refinement: {}",
            self.summary.leak_pixel_count,
            percent(self.summary.leak_pixel_count, self.summary.pixel_count),
            if self.summary.needs_refinement { "yes" } else { "no" },
        ));

        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Classify {
            palette_hits,
            flat_hits,
            flat_pass,
            total_pixel_count,
        } => {
            let flat = if *flat_pass {
                format!("flat={flat_hits}")
            } else {
                "flat=off".to_string()
            };
            format!(
                "palette={palette_hits} {flat} ({:.2}% leak)",
                percent(palette_hits + flat_hits, *total_pixel_count),
            )
        }
        StageMetrics::Cluster {
            fast_path: true,
            size_threshold,
            ..
        } => format!("fast path (total below {size_threshold})"),
        StageMetrics::Cluster {
            clusters_examined,
            largest_cluster,
            best_solidity,
            size_threshold,
            solidity_threshold,
            ..
        } => {
            let solidity = best_solidity.map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
            format!(
                "{clusters_examined} clusters, largest={largest_cluster} (>{size_threshold}?) solidity={solidity} (>{solidity_threshold:.2}?)",
            )
        }
        StageMetrics::Render { encoded_bytes } => format!("heatmap {encoded_bytes} bytes"),
    }
}
