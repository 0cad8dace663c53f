//! The refinement loop.
//!
//! [`RefinementController::run`] generates a map from a blueprint,
//! checks it for leaks and keeps refining until it passes or the
//! refinement budget is spent. Every analyzed map becomes a
//! [`Revision`]; the history grows while the loop runs and can be
//! watched through [`RefinementController::subscribe`].
//!
//! Session state sits behind a mutex that is never held across an
//! `.await`. Each run remembers the session generation it started in and
//! re-checks it after every external call, so a [`clear`] while a call
//! is in flight makes the run return [`RefineError::Superseded`] without
//! touching the fresh session.
//!
//! [`clear`]: RefinementController::clear

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mapforge_analysis::{AnalysisError, EncodedImage, OutputStyle};
use mapforge_worker::{AnalysisWorker, DetectionResult, DiffMapService, LeakDetectionService, WorkerError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::collaborator::{Blueprint, Generator, Refiner};
use crate::error::{RefineError, ServiceStage};
use crate::phase::{FinalReason, Phase};
use crate::session::{NewRevision, Revision, Session};

/// Loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Automatic refinement passes after the initial generation. `0`
    /// accepts whatever the generator produced.
    pub max_refinements: u32,
}

impl RefinementConfig {
    /// Default refinement budget.
    pub const DEFAULT_MAX_REFINEMENTS: u32 = 2;
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_refinements: Self::DEFAULT_MAX_REFINEMENTS,
        }
    }
}

/// Everything needed to start a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The rasterized drawing.
    pub blueprint: Blueprint,
    /// Text prompt for the generator.
    pub prompt: String,
    /// Output style; also selects detection thresholds.
    pub style: OutputStyle,
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Current phase.
    pub phase: Phase,
    /// Human-readable status line.
    pub message: String,
    /// History so far.
    pub revisions: Vec<Revision>,
}

/// Drives generation, detection and refinement for one session.
pub struct RefinementController<G, R> {
    generator: G,
    refiner: R,
    worker: AnalysisWorker,
    detector: LeakDetectionService,
    differ: DiffMapService,
    config: RefinementConfig,
    session: Arc<Mutex<Session>>,
    progress: watch::Sender<Progress>,
}

impl<G: Generator, R: Refiner> RefinementController<G, R> {
    /// Create a controller with an empty session.
    #[must_use]
    pub fn new(generator: G, refiner: R, worker: AnalysisWorker, config: RefinementConfig) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            generator,
            refiner,
            detector: LeakDetectionService::new(worker.clone()),
            differ: DiffMapService::new(worker.clone()),
            worker,
            config,
            session: Arc::new(Mutex::new(Session::default())),
            progress,
        }
    }

    /// Watch progress. The receiver sees the latest snapshot, not every
    /// intermediate one.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// A copy of the whole session.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    /// A copy of the revision history.
    #[must_use]
    pub fn history(&self) -> Vec<Revision> {
        self.lock().history.clone()
    }

    /// The current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Drop the session and invalidate anything in flight.
    pub fn clear(&self) {
        let mut session = self.lock();
        session.reset();
        self.worker.invalidate();
        tracing::info!(generation = session.generation, "session cleared");
        self.publish(&session, "Cleared");
    }

    /// Generate a map from `request.blueprint` and refine it until it
    /// passes or the budget runs out. Replaces any previous history.
    ///
    /// Returns the final revision.
    ///
    /// # Errors
    ///
    /// - [`RefineError::InvalidInput`] for an empty blueprint, missing
    ///   credentials, or a run already in flight.
    /// - [`RefineError::ExternalService`] if the generator or refiner
    ///   fails. The history recorded so far is kept.
    /// - [`RefineError::DimensionMismatch`] if a refined map changed size.
    /// - [`RefineError::Superseded`] if the session was cleared meanwhile.
    pub async fn run(&self, request: RunRequest) -> Result<Revision, RefineError> {
        if request.blueprint.is_empty() {
            return Err(RefineError::InvalidInput(
                "Draw at least one shape before generating a map.".into(),
            ));
        }
        if !self.generator.has_credentials() {
            return Err(RefineError::InvalidInput(
                "No API key is configured for the image service.".into(),
            ));
        }

        let style = request.style;
        let (ticket, ()) = self.begin("Generating map from blueprint...", |session| {
            session.start(style);
            Ok(())
        })?;
        tracing::info!(%style, max_refinements = self.config.max_refinements, "refinement run started");

        let generated = self
            .generator
            .generate(&request.blueprint.image, &request.prompt)
            .await
            .map_err(|e| RefineError::external(ServiceStage::Generation, e.message()));
        let image = self.checked(ticket, generated)?;

        self.transition(ticket, Phase::Analyzing, "Checking the map for blueprint leaks...")?;
        let detection = self.detector.detect(&image, style).await;
        let mut latest = self.record(
            ticket,
            NewRevision {
                map_image: image,
                diff_map: None,
                detection,
                is_manual: false,
            },
        )?;

        let max = self.config.max_refinements;
        let mut iterations = 0;
        while !latest.passed && iterations < max {
            iterations += 1;
            let message = format!("Refining (pass {iterations} of {max})...");
            let new = self.refine_once(ticket, &latest.map_image, style, &message).await?;
            latest = self.record(ticket, new)?;
        }

        self.finish(ticket)
    }

    /// Run exactly one more refinement on the final map, even if it
    /// already passed. The new revision is always final.
    ///
    /// The previous final revision loses its final flag only once the
    /// new revision is recorded; a failed attempt leaves the history as
    /// it was.
    ///
    /// # Errors
    ///
    /// [`RefineError::InvalidInput`] if there is no final map or a run
    /// is in flight, otherwise as for [`run`](Self::run).
    pub async fn refine_manually(&self) -> Result<Revision, RefineError> {
        let (ticket, (current, style)) = self.begin("Refining on request...", |session| {
            let current = session
                .final_revision()
                .map(|r| r.map_image.clone())
                .ok_or_else(|| RefineError::InvalidInput("There is no finished map to refine.".into()))?;
            let style = session.style.unwrap_or_default();
            session.phase = Phase::Refining;
            session.last_error = None;
            Ok((current, style))
        })?;
        tracing::info!(%style, "manual refinement started");

        let mut new = self
            .refine_once(ticket, &current, style, "Refining on request...")
            .await?;
        new.is_manual = true;

        let mut session = self.current(ticket)?;
        session.reopen();
        let revision = session.append(new);
        log_revision(&revision);
        drop(session);
        self.finish(ticket)
    }

    /// Refine `current`, diff it against the result and analyze the
    /// result.
    async fn refine_once(
        &self,
        ticket: u64,
        current: &EncodedImage,
        style: OutputStyle,
        message: &str,
    ) -> Result<NewRevision, RefineError> {
        self.transition(ticket, Phase::Refining, message)?;
        let refined = self
            .refiner
            .refine(current, style)
            .await
            .map_err(|e| RefineError::external(ServiceStage::Refinement, e.message()));
        let refined = self.checked(ticket, refined)?;

        let diff_map = match self.differ.diff(current, &refined).await {
            Ok(diff) => Ok(diff),
            Err(WorkerError::Analysis(AnalysisError::DimensionMismatch { before, after })) => {
                Err(RefineError::DimensionMismatch { before, after })
            }
            Err(e) => {
                tracing::warn!(error = %e, "diff map failed, recording revision without one");
                Ok(None)
            }
        };
        let diff_map = self.checked(ticket, diff_map)?;

        self.transition(ticket, Phase::Analyzing, "Checking the refined map for blueprint leaks...")?;
        let detection: DetectionResult = self.detector.detect(&refined, style).await;

        Ok(NewRevision {
            map_image: refined,
            diff_map,
            detection,
            is_manual: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, session: &Session, message: &str) {
        self.progress.send_replace(Progress {
            phase: session.phase,
            message: message.to_string(),
            revisions: session.history.clone(),
        });
    }

    /// Lock the session if `ticket` is still its generation.
    fn current(&self, ticket: u64) -> Result<MutexGuard<'_, Session>, RefineError> {
        let session = self.lock();
        if session.generation == ticket {
            Ok(session)
        } else {
            tracing::warn!(
                ticket,
                current = session.generation,
                "discarding result from a cleared session"
            );
            Err(RefineError::Superseded)
        }
    }

    /// Claim the session for a new unit of work. Fails if one is
    /// already in flight.
    fn begin<T>(
        &self,
        message: &str,
        claim: impl FnOnce(&mut Session) -> Result<T, RefineError>,
    ) -> Result<(u64, T), RefineError> {
        let mut session = self.lock();
        if session.phase.is_busy() {
            return Err(RefineError::InvalidInput(
                "A generation is already in progress.".into(),
            ));
        }
        let claimed = claim(&mut session)?;
        self.publish(&session, message);
        Ok((session.generation, claimed))
    }

    fn transition(&self, ticket: u64, phase: Phase, message: &str) -> Result<(), RefineError> {
        let mut session = self.current(ticket)?;
        session.phase = phase;
        tracing::info!(%phase, message, "refinement phase");
        self.publish(&session, message);
        Ok(())
    }

    /// Pass `result` through if the session is still current, recording
    /// a failure otherwise.
    fn checked<T>(&self, ticket: u64, result: Result<T, RefineError>) -> Result<T, RefineError> {
        let mut session = self.current(ticket)?;
        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                let message = error.user_message();
                tracing::warn!(%error, "refinement run aborted");
                session.phase = Phase::Failed;
                session.last_error = Some(message.clone());
                self.publish(&session, &message);
                Err(error)
            }
        }
    }

    fn record(&self, ticket: u64, new: NewRevision) -> Result<Revision, RefineError> {
        let mut session = self.current(ticket)?;
        let revision = session.append(new);
        log_revision(&revision);
        let verdict = if revision.passed { "clean" } else { "leaks found" };
        self.publish(&session, &format!("Revision {}: {verdict}", revision.revision));
        Ok(revision)
    }

    fn finish(&self, ticket: u64) -> Result<Revision, RefineError> {
        let mut session = self.current(ticket)?;
        let revision = session
            .finish()
            .ok_or_else(|| RefineError::InvalidInput("no revision to finalize".into()))?;
        let reason = FinalReason::from_passed(revision.passed);
        tracing::info!(revision = revision.revision, %reason, "refinement finished");
        self.publish(&session, &format!("Done: {reason}"));
        Ok(revision)
    }
}

fn log_revision(revision: &Revision) {
    tracing::info!(
        revision = revision.revision,
        passed = revision.passed,
        manual = revision.is_manual,
        analysis_failed = revision.analysis_failed,
        has_diff = revision.diff_map.is_some(),
        "revision recorded"
    );
}
