//! `fixloop` - unattended find-fix-verify loop for AI coding agents.
//!
//! Discovers work items with a shell command, hands them one at a time to an
//! agent CLI, verifies the result, and commits or reverts.

pub mod cli;
pub mod console;
pub mod core;
pub mod fs;
pub mod logging;
#[cfg(unix)]
pub mod signals;
