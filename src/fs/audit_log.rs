//! Append-only audit log of agent interactions.
//!
//! Each iteration writes one entry to `<task dir>/agent.log`:
//!
//! ```text
//! ================================================================================
//! Timestamp: 2026-01-02 15:04:05
//! Prompt: Fix the lint warning in main.go
//! ================================================================================
//! <streamed agent text>
//!
//! ================================================================================
//! Outcome: FIXED
//! Duration: 2m05s
//! Details: committed
//! ================================================================================
//! ```

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::core::error::{RunError, RunResult};

/// File name of the audit log inside a task directory.
pub const AUDIT_LOG_FILE: &str = "agent.log";

const SEPARATOR: &str =
    "================================================================================";

/// Terminal classification of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The candidate disappeared and the build passes.
    Fixed,
    /// The candidate disappeared but the changes had to be reverted.
    FixedButReverted,
    /// The candidate is still present (or nothing changed).
    NotFixed,
    /// Not fixed, but partial progress that builds was committed.
    BestEffort,
    /// The build broke and the changes were reverted.
    BuildFailed,
}

impl Outcome {
    /// Spelling written to the audit log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "FIXED",
            Self::FixedButReverted => "FIXED_BUT_REVERTED",
            Self::NotFixed => "NOT_FIXED",
            Self::BestEffort => "BEST_EFFORT",
            Self::BuildFailed => "BUILD_FAILED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Inner {
    file: File,
    started: Instant,
}

/// Handle to the task's audit log.
///
/// Clones share the same file, so the agent executor's stream reader can
/// write streamed text while the runner owns entry boundaries.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl AuditLog {
    /// Opens (or creates) the audit log in `task_dir` for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(task_dir: &Path) -> RunResult<Self> {
        let path = task_dir.join(AUDIT_LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RunError::io(format!("failed to open {}", path.display()), e))?;

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner {
                file,
                started: Instant::now(),
            })),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> std::io::Result<T>) -> RunResult<T> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner).map_err(|e| RunError::io("failed to write audit log", e))
    }

    /// Starts a new entry with the current timestamp and the prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn start_entry(&self, prompt: &str) -> RunResult<()> {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        self.with_inner(|inner| {
            inner.started = Instant::now();
            write!(
                inner.file,
                "\n{SEPARATOR}\nTimestamp: {timestamp}\nPrompt: {prompt}\n{SEPARATOR}\n"
            )
        })
    }

    /// Appends raw text (streamed agent output).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_raw(&self, text: &str) -> RunResult<()> {
        self.with_inner(|inner| inner.file.write_all(text.as_bytes()))
    }

    /// Records the outcome of the current entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn log_outcome(&self, outcome: Outcome, details: &str) -> RunResult<()> {
        self.with_inner(|inner| {
            let duration = format_duration(inner.started.elapsed());
            write!(
                inner.file,
                "\n{SEPARATOR}\nOutcome: {outcome}\nDuration: {duration}\nDetails: {details}\n"
            )
        })
    }

    /// Closes the current entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn end_entry(&self) -> RunResult<()> {
        self.with_inner(|inner| {
            writeln!(inner.file, "{SEPARATOR}")?;
            inner.file.flush()
        })
    }
}

/// Formats a duration as `42s` under a minute, else `3m07s`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}
