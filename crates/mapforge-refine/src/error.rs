//! Refinement errors and their classification for display.

use std::fmt;

use mapforge_analysis::Dimensions;
use serde::{Deserialize, Serialize};

/// Which external call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStage {
    /// The initial generation from the blueprint.
    Generation,
    /// A refinement pass.
    Refinement,
}

impl fmt::Display for ServiceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generation => "generation",
            Self::Refinement => "refinement",
        })
    }
}

/// Coarse category of an external service failure, derived from its
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// Missing, invalid or unauthorized API key.
    Credential,
    /// Rate limit or exhausted quota.
    Quota,
    /// Connection, DNS or timeout trouble.
    Network,
    /// The model refused the request on content grounds.
    ContentPolicy,
    /// Anything else.
    Unknown,
}

impl ServiceErrorKind {
    const CREDENTIAL: &'static [&'static str] = &[
        "api key",
        "api_key",
        "apikey",
        "credential",
        "unauthorized",
        "unauthenticated",
        "permission denied",
        "forbidden",
        "401",
        "403",
    ];
    const QUOTA: &'static [&'static str] = &[
        "quota",
        "rate limit",
        "rate_limit",
        "too many requests",
        "resource_exhausted",
        "resource exhausted",
        "billing",
        "429",
    ];
    const NETWORK: &'static [&'static str] = &[
        "network",
        "timeout",
        "timed out",
        "connection",
        "connect",
        "dns",
        "unreachable",
        "failed to fetch",
        "503",
        "502",
    ];
    const CONTENT_POLICY: &'static [&'static str] = &[
        "safety",
        "content policy",
        "policy",
        "blocked",
        "refused",
        "prohibited",
        "inappropriate",
    ];

    /// Classify an error message by case-insensitive substring match.
    ///
    /// Categories are tried in declaration order; the first match wins.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let hit = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
        if hit(Self::CREDENTIAL) {
            Self::Credential
        } else if hit(Self::QUOTA) {
            Self::Quota
        } else if hit(Self::NETWORK) {
            Self::Network
        } else if hit(Self::CONTENT_POLICY) {
            Self::ContentPolicy
        } else {
            Self::Unknown
        }
    }

    /// One-sentence explanation suitable for showing to the user.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Credential => {
                "The image service rejected the API key. Check that a valid key is configured."
            }
            Self::Quota => "The image service quota or rate limit was exceeded. Try again later.",
            Self::Network => {
                "Could not reach the image service. Check the network connection and try again."
            }
            Self::ContentPolicy => {
                "The image service refused the request under its content policy. Try a different prompt."
            }
            Self::Unknown => "The image service failed unexpectedly.",
        }
    }
}

/// Errors that abort a refinement run.
///
/// History recorded before the error is kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum RefineError {
    /// Bad user input: empty blueprint, missing credentials, or a
    /// request that does not fit the current phase.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The generator or refiner failed.
    #[error("{stage} failed ({kind:?}): {message}")]
    ExternalService {
        /// Which call failed.
        stage: ServiceStage,
        /// Classified category.
        kind: ServiceErrorKind,
        /// The collaborator's own message.
        message: String,
    },

    /// A refined map does not match the size of the map it refines.
    #[error("refined image changed size: {before} -> {after}")]
    DimensionMismatch {
        /// Size of the previous revision.
        before: Dimensions,
        /// Size of the refined map.
        after: Dimensions,
    },

    /// The session was cleared while this call was in flight; its
    /// result was discarded.
    #[error("session was cleared while the request was in flight")]
    Superseded,
}

impl RefineError {
    /// Build an [`ExternalService`](Self::ExternalService) error,
    /// classifying `message`.
    #[must_use]
    pub fn external(stage: ServiceStage, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::ExternalService {
            stage,
            kind: ServiceErrorKind::classify(&message),
            message,
        }
    }

    /// The single human-readable message shown for a failed run.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) => msg.clone(),
            Self::ExternalService {
                kind: ServiceErrorKind::Unknown,
                message,
                ..
            } => format!("{} ({message})", ServiceErrorKind::Unknown.user_message()),
            Self::ExternalService { kind, .. } => kind.user_message().to_string(),
            Self::DimensionMismatch { .. } => {
                "The refined map came back at a different size than the original.".to_string()
            }
            Self::Superseded => "The session was cleared before the request finished.".to_string(),
        }
    }
}
