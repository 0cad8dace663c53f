//! Session state: the revision history of one refinement session.

use chrono::{DateTime, Utc};
use mapforge_analysis::{EncodedImage, OutputStyle};
use mapforge_worker::DetectionResult;
use serde::{Deserialize, Serialize};

use crate::phase::{FinalReason, Phase};

/// One generated or refined map and the evidence collected for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// 1-based position in the history.
    pub revision: u32,
    /// The map image.
    pub map_image: EncodedImage,
    /// Pixels changed relative to the previous revision. `None` for the
    /// first revision or when nothing visibly changed.
    pub diff_map: Option<EncodedImage>,
    /// Leak heatmap, `None` when nothing leaked.
    pub leak_map: Option<EncodedImage>,
    /// Whether leak detection accepted this map.
    pub passed: bool,
    /// Whether this is the session's final revision.
    pub is_final: bool,
    /// Set exactly when `is_final` is.
    pub final_reason: Option<FinalReason>,
    /// Produced by an explicit user request rather than the automatic
    /// loop.
    pub is_manual: bool,
    /// Detection could not complete and `passed` is the fail-safe
    /// default.
    pub analysis_failed: bool,
    /// When the revision was recorded.
    pub created_at: DateTime<Utc>,
}

/// Inputs for [`Session::append`].
#[derive(Debug, Clone)]
pub(crate) struct NewRevision {
    pub map_image: EncodedImage,
    pub diff_map: Option<EncodedImage>,
    pub detection: DetectionResult,
    pub is_manual: bool,
}

/// Everything the controller knows about the current session.
///
/// Owned by the controller behind a mutex; callers get clones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    /// Bumped by every clear. Results from older generations are
    /// discarded.
    pub generation: u64,
    /// Current phase.
    pub phase: Phase,
    /// Style of the current run.
    pub style: Option<OutputStyle>,
    /// Revisions in the order they were produced.
    pub history: Vec<Revision>,
    /// User-facing message of the last failure.
    pub last_error: Option<String>,
}

impl Session {
    /// The revision marked final, if any.
    #[must_use]
    pub fn final_revision(&self) -> Option<&Revision> {
        self.history.iter().rev().find(|r| r.is_final)
    }

    /// Start a new run: drop the old history and enter `Generating`.
    pub(crate) fn start(&mut self, style: OutputStyle) {
        self.phase = Phase::Generating;
        self.style = Some(style);
        self.history.clear();
        self.last_error = None;
    }

    /// Discard everything and invalidate in-flight work.
    pub(crate) fn reset(&mut self) {
        *self = Self {
            generation: self.generation + 1,
            ..Self::default()
        };
    }

    /// Append a non-final revision and return a copy of it.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn append(&mut self, new: NewRevision) -> Revision {
        let analysis_failed = new.detection.analysis_failed();
        let revision = Revision {
            revision: self.history.len() as u32 + 1,
            map_image: new.map_image,
            diff_map: new.diff_map,
            leak_map: new.detection.leak_map,
            passed: !new.detection.needs_refinement,
            is_final: false,
            final_reason: None,
            is_manual: new.is_manual,
            analysis_failed,
            created_at: Utc::now(),
        };
        self.history.push(revision.clone());
        revision
    }

    /// Mark the latest revision final with the reason its verdict
    /// implies and enter `Done`.
    pub(crate) fn finish(&mut self) -> Option<Revision> {
        let latest = self.history.last_mut()?;
        let reason = FinalReason::from_passed(latest.passed);
        latest.is_final = true;
        latest.final_reason = Some(reason);
        self.phase = Phase::Done(reason);
        Some(latest.clone())
    }

    /// Clear the final flag so the session can be extended.
    pub(crate) fn reopen(&mut self) {
        for revision in &mut self.history {
            revision.is_final = false;
            revision.final_reason = None;
        }
    }
}
