//! Interfaces to the external image model.
//!
//! The controller never talks to the network itself. Callers plug in a
//! [`Generator`] (blueprint + prompt -> map) and a [`Refiner`]
//! (map + style -> cleaner map). Failures are opaque messages; the
//! controller classifies them into [`ServiceErrorKind`](crate::ServiceErrorKind).

use std::future::Future;

use mapforge_analysis::{EncodedImage, OutputStyle};

/// An opaque failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    message: String,
}

impl ServiceError {
    /// Wrap a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The collaborator's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A rasterized blueprint.
///
/// `element_count` is the number of shapes and lines the user drew; a
/// blueprint with none is rejected before anything is generated.
#[derive(Debug, Clone)]
pub struct Blueprint {
    /// The rasterized drawing.
    pub image: EncodedImage,
    /// Number of drawn elements.
    pub element_count: usize,
}

impl Blueprint {
    /// Whether there is anything to generate from.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.element_count == 0 || self.image.is_empty()
    }
}

/// Produces the first map from a blueprint.
pub trait Generator: Send + Sync {
    /// Whether an API credential is configured. Runs are rejected up
    /// front when this is `false`.
    fn has_credentials(&self) -> bool {
        true
    }

    /// Generate a map.
    fn generate(
        &self,
        blueprint: &EncodedImage,
        prompt: &str,
    ) -> impl Future<Output = Result<EncodedImage, ServiceError>> + Send;
}

/// Repaints a map to remove visible blueprint colors.
pub trait Refiner: Send + Sync {
    /// Produce a refined version of `current`. Must keep its dimensions.
    fn refine(
        &self,
        current: &EncodedImage,
        style: OutputStyle,
    ) -> impl Future<Output = Result<EncodedImage, ServiceError>> + Send;
}
