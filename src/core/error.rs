//! Error taxonomy for the iteration loop.
//!
//! Every [`RunError`] carries an [`ErrorKind`] tag. The outer loop switches on
//! that tag to decide between aborting, cooling down after a rate limit, or
//! sleeping with exponential backoff.

use std::time::Duration;

use thiserror::Error;

/// How the outer loop must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unsafe to continue; the run stops immediately.
    Fatal,
    /// The provider throttled the agent; sleep the long cooldown.
    RateLimited,
    /// The agent exceeded its per-candidate deadline.
    TimedOut,
    /// Anything else; retried after an exponential backoff.
    Recoverable,
}

/// Errors produced by the candidate model, executors and the state machine.
#[derive(Debug, Error)]
pub enum RunError {
    /// Discovery output was not a JSON array of candidates.
    #[error("malformed candidate source: {0}")]
    MalformedCandidateSource(String),

    /// A process could not be launched or waited on.
    #[error("failed to execute `{command}`: {source}")]
    CommandExecution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A command whose success is required exited non-zero.
    #[error("`{command}` exited with {status}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The agent did not finish within its deadline. Carries whatever it
    /// produced before its process group was killed.
    #[error("timeout after {}s", .limit.as_secs())]
    Timeout { limit: Duration, output: String },

    /// The agent output contained the provider's rate-limit phrase.
    #[error("agent rate limit hit")]
    RateLimit,

    /// The working tree could not be restored, or required input is missing.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Local file I/O (ignore list, audit log) failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// Builds a [`RunError::Fatal`] from any displayable message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Wraps an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the tag the outer loop dispatches on.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::RateLimit => ErrorKind::RateLimited,
            Self::Timeout { .. } => ErrorKind::TimedOut,
            Self::MalformedCandidateSource(_)
            | Self::CommandExecution { .. }
            | Self::CommandFailed { .. }
            | Self::Io { .. } => ErrorKind::Recoverable,
        }
    }
}

/// Convenience alias used across the core modules.
pub type RunResult<T> = std::result::Result<T, RunError>;
