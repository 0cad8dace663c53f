//! Async services consumed by the refinement loop.

use mapforge_analysis::{EncodedImage, OutputStyle};
use serde::{Deserialize, Serialize};

use crate::{AnalysisWorker, DetectRequest, WorkerError};

/// Verdict for one generated map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Whether another refinement pass is warranted.
    pub needs_refinement: bool,
    /// PNG heatmap of leak pixels, absent when nothing leaked or the
    /// analysis failed.
    pub leak_map: Option<EncodedImage>,
    /// Number of leak pixels.
    pub leak_pixel_count: usize,
    /// Why analysis failed, if it did. A failed analysis never asks for
    /// refinement.
    pub analysis_error: Option<String>,
}

impl DetectionResult {
    /// The fail-safe result for an analysis that could not complete.
    #[must_use]
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            needs_refinement: false,
            leak_map: None,
            leak_pixel_count: 0,
            analysis_error: Some(error.to_string()),
        }
    }

    /// Whether analysis failed and the verdict is the fail-safe default.
    #[must_use]
    pub const fn analysis_failed(&self) -> bool {
        self.analysis_error.is_some()
    }
}

/// Leak detection that never fails.
///
/// Decode errors, invalid configuration and worker panics all produce
/// `needs_refinement = false`, logged at `warn` and reported in
/// [`DetectionResult::analysis_error`].
#[derive(Debug, Clone, Default)]
pub struct LeakDetectionService {
    worker: AnalysisWorker,
}

impl LeakDetectionService {
    /// Create a service backed by `worker`.
    #[must_use]
    pub const fn new(worker: AnalysisWorker) -> Self {
        Self { worker }
    }

    /// Analyze `image` with the thresholds for `style`.
    pub async fn detect(&self, image: &EncodedImage, style: OutputStyle) -> DetectionResult {
        let request = DetectRequest {
            image: image.clone(),
            style,
        };
        let outcome = match self.worker.detect(request).await {
            Ok(response) => response.outcome.map_err(WorkerError::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => {
                tracing::debug!(
                    %style,
                    needs_refinement = outcome.needs_refinement,
                    leak_pixels = outcome.leak_pixel_count,
                    "leak detection finished"
                );
                DetectionResult {
                    needs_refinement: outcome.needs_refinement,
                    leak_map: outcome.leak_map,
                    leak_pixel_count: outcome.leak_pixel_count,
                    analysis_error: None,
                }
            }
            Err(e) => {
                tracing::warn!(%style, error = %e, "leak detection failed, treating map as clean");
                DetectionResult::failed(e)
            }
        }
    }
}

/// Diff maps between consecutive revisions.
///
/// Unlike detection, errors propagate: a size mismatch between
/// revisions is a real fault.
#[derive(Debug, Clone, Default)]
pub struct DiffMapService {
    worker: AnalysisWorker,
}

impl DiffMapService {
    /// Create a service backed by `worker`.
    #[must_use]
    pub const fn new(worker: AnalysisWorker) -> Self {
        Self { worker }
    }

    /// Highlight the pixels that changed from `before` to `after`.
    ///
    /// # Errors
    ///
    /// See [`AnalysisWorker::diff`].
    pub async fn diff(
        &self,
        before: &EncodedImage,
        after: &EncodedImage,
    ) -> Result<Option<EncodedImage>, WorkerError> {
        self.worker.diff(before.clone(), after.clone()).await
    }
}
