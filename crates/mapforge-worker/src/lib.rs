//! Off-thread execution of mapforge analysis.
//!
//! Leak detection and diff rendering are CPU-bound and take tens of
//! milliseconds on a full-size map. [`AnalysisWorker`] moves them onto
//! tokio's blocking pool so the async control flow (and any UI driving
//! it) stays responsive.
//!
//! The worker receives owned copies of the encoded image and the
//! configuration and keeps no state between calls apart from a
//! generation counter. Each request is tagged with the generation that
//! was current when it was sent; [`AnalysisWorker::invalidate`] bumps
//! the counter so results of requests still in flight come back as
//! [`WorkerError::Stale`] instead of being delivered.
//!
//! [`LeakDetectionService`] and [`DiffMapService`] are the two
//! interfaces the refinement loop consumes.

mod service;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mapforge_analysis::{AnalysisError, DetectionConfig, DetectionDiagnostics, EncodedImage, OutputStyle};
use serde::{Deserialize, Serialize};

pub use service::{DetectionResult, DiffMapService, LeakDetectionService};

/// Errors from running analysis off-thread.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The analysis itself failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// The blocking task panicked or was cancelled.
    #[error("analysis task failed: {0}")]
    Join(String),

    /// The worker was invalidated while this request was in flight.
    #[error("stale result: request generation {requested}, current {current}")]
    Stale {
        /// Generation the request was sent with.
        requested: u64,
        /// Generation at the time the result arrived.
        current: u64,
    },
}

impl From<tokio::task::JoinError> for WorkerError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

/// A detection request as sent to the blocking pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    /// The generated map.
    pub image: EncodedImage,
    /// Which threshold preset to apply.
    pub style: OutputStyle,
}

/// A finished detection, tagged with the request generation.
#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    /// Generation the request was sent with.
    pub generation: u64,
    /// `Ok` with the verdict, or the analysis error.
    pub outcome: Result<DetectOutcome, AnalysisError>,
}

/// The transportable part of a [`mapforge_analysis::Detection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectOutcome {
    /// Whether a big, solid leak cluster was found.
    pub needs_refinement: bool,
    /// PNG heatmap, absent when nothing leaked.
    pub leak_map: Option<EncodedImage>,
    /// Number of leak pixels.
    pub leak_pixel_count: usize,
    /// Stage timings and counts.
    pub diagnostics: DetectionDiagnostics,
}

/// Runs analysis on tokio's blocking thread pool.
///
/// Cheap to clone; clones share the configuration and the generation
/// counter.
#[derive(Debug, Clone)]
pub struct AnalysisWorker {
    config: Arc<DetectionConfig>,
    generation: Arc<AtomicU64>,
}

impl AnalysisWorker {
    /// Create a worker that analyzes with `config`.
    #[must_use]
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config: Arc::new(config),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark every in-flight request stale. Returns the new generation.
    pub fn invalidate(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Run detection off-thread.
    ///
    /// Analysis errors are returned inside [`DetectResponse::outcome`];
    /// only infrastructure failures are `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Join`] if the blocking task panicked and
    /// [`WorkerError::Stale`] if [`invalidate`](Self::invalidate) was
    /// called before the result arrived.
    pub async fn detect(&self, request: DetectRequest) -> Result<DetectResponse, WorkerError> {
        let generation = self.generation();
        let config = Arc::clone(&self.config);

        let outcome = tokio::task::spawn_blocking(move || {
            mapforge_analysis::detect(request.image.as_bytes(), &config, request.style).map(
                |detection| DetectOutcome {
                    needs_refinement: detection.needs_refinement,
                    leak_pixel_count: detection.leak_pixel_count(),
                    leak_map: detection.leak_map,
                    diagnostics: detection.diagnostics,
                },
            )
        })
        .await?;

        self.check_current(generation)?;
        Ok(DetectResponse {
            generation,
            outcome,
        })
    }

    /// Render a diff map off-thread using the configured
    /// `diff_threshold_sq`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Analysis`] for decode, dimension or encode
    /// failures, plus the errors of [`detect`](Self::detect).
    pub async fn diff(
        &self,
        before: EncodedImage,
        after: EncodedImage,
    ) -> Result<Option<EncodedImage>, WorkerError> {
        let generation = self.generation();
        let threshold_sq = self.config.diff_threshold_sq;

        let result = tokio::task::spawn_blocking(move || {
            mapforge_analysis::diff_encoded(&before, &after, threshold_sq)
        })
        .await?;

        self.check_current(generation)?;
        Ok(result?)
    }

    fn check_current(&self, requested: u64) -> Result<(), WorkerError> {
        let current = self.generation();
        if current == requested {
            Ok(())
        } else {
            tracing::warn!(requested, current, "discarding stale analysis result");
            Err(WorkerError::Stale { requested, current })
        }
    }
}

impl Default for AnalysisWorker {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mapforge_analysis::RgbaImage;

    fn water(width: u32, height: u32) -> EncodedImage {
        EncodedImage::encode(&RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([0x1e, 0x64, 0xc8, 255]),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn detect_runs_analysis() {
        let worker = AnalysisWorker::default();
        let response = worker
            .detect(DetectRequest {
                image: water(40, 40),
                style: OutputStyle::Realistic,
            })
            .await
            .unwrap();
        assert_eq!(response.generation, 0);
        let outcome = response.outcome.unwrap();
        assert!(outcome.needs_refinement);
        assert_eq!(outcome.leak_pixel_count, 1600);
        assert!(outcome.leak_map.is_some());
    }

    #[tokio::test]
    async fn analysis_errors_are_returned_in_outcome() {
        let worker = AnalysisWorker::default();
        let response = worker
            .detect(DetectRequest {
                image: EncodedImage::from_bytes(vec![1, 2, 3]),
                style: OutputStyle::Stylized,
            })
            .await
            .unwrap();
        assert!(matches!(response.outcome, Err(AnalysisError::ImageDecode(_))));
    }

    #[tokio::test]
    async fn diff_mismatch_is_an_error() {
        let worker = AnalysisWorker::default();
        let err = worker.diff(water(4, 4), water(5, 4)).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Analysis(AnalysisError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn diff_of_identical_images_is_none() {
        let worker = AnalysisWorker::default();
        assert!(worker.diff(water(4, 4), water(4, 4)).await.unwrap().is_none());
    }

    #[test]
    fn invalidate_bumps_generation_for_all_clones() {
        let worker = AnalysisWorker::default();
        let clone = worker.clone();
        assert_eq!(worker.invalidate(), 1);
        assert_eq!(clone.generation(), 1);
        assert!(matches!(
            clone.check_current(0),
            Err(WorkerError::Stale {
                requested: 0,
                current: 1
            })
        ));
        assert!(clone.check_current(1).is_ok());
    }

    #[test]
    fn response_serializes_errors_through_proxy() {
        let response = DetectResponse {
            generation: 7,
            outcome: Err(AnalysisError::EmptyInput),
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: DetectResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.generation, 7);
        assert!(matches!(back.outcome, Err(AnalysisError::EmptyInput)));
    }
}
