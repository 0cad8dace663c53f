//! mapforge-refine: the iterative refinement controller.
//!
//! Orchestrates an external [`Generator`] and [`Refiner`] around leak
//! detection from `mapforge-worker`, bounding the number of refinement
//! passes and keeping an auditable [`Revision`] history with leak
//! heatmaps and diff maps.

mod collaborator;
mod controller;
mod error;
mod phase;
mod session;

pub use collaborator::{Blueprint, Generator, Refiner, ServiceError};
pub use controller::{Progress, RefinementConfig, RefinementController, RunRequest};
pub use error::{RefineError, ServiceErrorKind, ServiceStage};
pub use phase::{FinalReason, Phase};
pub use session::{Revision, Session};
