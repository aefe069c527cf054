//! The fix loop and everything it drives.

pub mod backoff;
pub mod candidate;
pub mod cli_check;
pub mod error;
pub mod executor;
pub mod ignore;
pub mod phase;
pub mod runner;
pub mod stream;
pub mod template;

pub use backoff::{BackoffPolicy, BackoffState, backoff};
pub use candidate::{Candidate, HashFilter, parse_candidates};
pub use cli_check::check_agent_command;
pub use error::{ErrorKind, RunError, RunResult};
pub use executor::{
    AgentExecutor, AgentRun, CommandRunner, OutputMode, ProcessSlot,
    ShellCommandRunner, StreamingAgent,
};
pub use ignore::{IGNORE_FILE, IgnoreSet};
pub use phase::IterationPhase;
pub use runner::{RunSummary, Runner, RunnerOptions, StopReason};
