//! Phases of one iteration of the fix loop.

use std::borrow::Cow;

use crate::fs::Outcome;

/// Where the runner is within an iteration.
///
/// ```text
/// Idle -> SelectCandidate -> NoneRemaining
///                         -> BuildPrompt -> Invoke -> VerifyBuild -> Recheck -> Finalize -> Idle
///                                                  -> TimedOut ---------------> Finalize
///                                                  VerifyBuild ---------------> Finalize
/// any non-terminal phase -> Fatal
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationPhase {
    /// Between iterations.
    Idle,
    /// Running discovery and picking the first non-ignored candidate.
    SelectCandidate,
    /// Every candidate is ignored or none were found; the run is done.
    NoneRemaining,
    /// Rendering the prompt for the selected candidate.
    BuildPrompt { key: String },
    /// The agent is running.
    Invoke { key: String },
    /// The agent exceeded its deadline.
    TimedOut,
    /// Running the verify command on the agent's changes.
    VerifyBuild,
    /// Re-running discovery to see whether the candidate is gone.
    Recheck,
    /// The outcome is being persisted.
    Finalize(Outcome),
    /// The working tree could not be restored; the run stops.
    Fatal { reason: String },
}

impl IterationPhase {
    /// Returns a human-readable description of the phase.
    #[must_use]
    pub fn description(&self) -> Cow<'static, str> {
        match self {
            Self::Idle => Cow::Borrowed("Idle"),
            Self::SelectCandidate => Cow::Borrowed("Selecting candidate"),
            Self::NoneRemaining => Cow::Borrowed("No candidates remaining"),
            Self::BuildPrompt { key } => Cow::Owned(format!("Building prompt for {key}")),
            Self::Invoke { key } => Cow::Owned(format!("Running agent on {key}")),
            Self::TimedOut => Cow::Borrowed("Agent timed out"),
            Self::VerifyBuild => Cow::Borrowed("Verifying build"),
            Self::Recheck => Cow::Borrowed("Re-checking candidates"),
            Self::Finalize(outcome) => Cow::Owned(format!("Finalizing: {outcome}")),
            Self::Fatal { reason } => Cow::Owned(format!("Fatal: {reason}")),
        }
    }

    /// Returns true if the run stops in this phase.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::NoneRemaining | Self::Fatal { .. })
    }

    /// Returns true if `next` may directly follow this phase.
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Self::Fatal { .. })
            | (Self::Idle | Self::Finalize(_), Self::Idle | Self::SelectCandidate)
            | (Self::SelectCandidate, Self::NoneRemaining | Self::BuildPrompt { .. })
            // A dry run goes back to idle right after rendering the prompt.
            | (Self::BuildPrompt { .. }, Self::Invoke { .. } | Self::Idle)
            | (Self::Invoke { .. }, Self::VerifyBuild | Self::TimedOut)
            | (Self::VerifyBuild, Self::Recheck | Self::Finalize(_))
            | (Self::TimedOut | Self::Recheck, Self::Finalize(_)) => true,
            _ => false,
        }
    }
}
