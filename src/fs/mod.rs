//! File system state: configuration, task discovery and the audit log.

pub mod audit_log;
pub mod config;

pub use audit_log::{AUDIT_LOG_FILE, AuditLog, Outcome, format_duration};
pub use config::{
    Environment, PromptSource, RunnerConfig, TaskConfig, expand_tilde, parse_duration,
};
