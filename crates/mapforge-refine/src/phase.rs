//! Controller phases and their display metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a session stopped refining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalReason {
    /// The last revision had no leaks.
    Passed,
    /// The refinement budget ran out with leaks remaining.
    LimitReached,
}

impl FinalReason {
    /// The reason matching an analysis verdict.
    #[must_use]
    pub const fn from_passed(passed: bool) -> Self {
        if passed {
            Self::Passed
        } else {
            Self::LimitReached
        }
    }

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::LimitReached => "limit reached",
        }
    }
}

impl fmt::Display for FinalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where the refinement controller currently is.
///
/// ```text
/// Idle -> Generating -> Analyzing -> Done(Passed)
///                          |  ^
///                          v  |
///                        Refining -> ... -> Done(LimitReached)
/// ```
///
/// A manual refinement re-enters `Refining` from `Done`. Any external
/// failure moves to `Failed`; the history collected so far stays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No run has started, or the session was cleared.
    #[default]
    Idle,
    /// Waiting for the generator to produce the first map.
    Generating,
    /// Running leak detection on the latest map.
    Analyzing,
    /// Waiting for the refiner (and the diff that follows it).
    Refining,
    /// The session has a final revision.
    Done(FinalReason),
    /// The last run aborted on an external error.
    Failed,
}

impl Phase {
    /// Every phase, in the order a run moves through them.
    pub const ALL: [Self; 7] = [
        Self::Idle,
        Self::Generating,
        Self::Analyzing,
        Self::Refining,
        Self::Done(FinalReason::Passed),
        Self::Done(FinalReason::LimitReached),
        Self::Failed,
    ];

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Generating => "Generating",
            Self::Analyzing => "Analyzing",
            Self::Refining => "Refining",
            Self::Done(FinalReason::Passed) => "Done (passed)",
            Self::Done(FinalReason::LimitReached) => "Done (limit reached)",
            Self::Failed => "Failed",
        }
    }

    /// Whether a run or manual refinement is in flight.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Generating | Self::Analyzing | Self::Refining)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
