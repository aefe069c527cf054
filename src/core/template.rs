//! Prompt and command interpolation.
//!
//! Prompts understand `$TASK_ID`, `$INPUT`, `$INPUT[n]`, `$INPUT[n:]` and
//! `$INPUT["key"]`. Shell commands understand `$CANDIDATE` and `$TASK_NAME`.
//!
//! Substitution runs longest pattern first: `$INPUT["key"]`, then
//! `$INPUT[n:]`, then `$INPUT[n]`, then bare `$INPUT`. Bare `$INPUT` only
//! matches at a word boundary, so `$INPUTX` is left alone.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::candidate::Candidate;
use crate::core::error::{RunError, RunResult};

struct Patterns {
    map_key: Regex,
    slice: Regex,
    index: Regex,
    bare: Regex,
    fix_word: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            map_key: Regex::new(r#"\$INPUT\["([^"]+)"\]"#)?,
            slice: Regex::new(r"\$INPUT\[(\d+):\]")?,
            index: Regex::new(r"\$INPUT\[(\d+)\]")?,
            bare: Regex::new(r"\$INPUT\b")?,
            fix_word: Regex::new(r"(?i)\bfix\b")?,
        })
    }
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::compile);

fn patterns() -> RunResult<&'static Patterns> {
    PATTERNS
        .as_ref()
        .map_err(|e| RunError::fatal(format!("invalid template pattern: {e}")))
}

/// Parses a captured decimal index. Indices too large for `usize` are treated
/// as out of range.
fn capture_index(caps: &Captures<'_>) -> usize {
    caps[1].parse().unwrap_or(usize::MAX)
}

/// Renders a prompt template for one candidate.
///
/// # Arguments
///
/// * `template` - Prompt text with `$INPUT` / `$TASK_ID` placeholders
/// * `candidate` - The selected work item
/// * `task_id` - Identifier of the current run
///
/// Missing map keys and out-of-range indices render as an empty string; an
/// out-of-range slice renders as `[]`.
///
/// # Errors
///
/// Returns a fatal error only if the built-in patterns fail to compile.
pub fn interpolate_prompt(template: &str, candidate: &Candidate, task_id: u64) -> RunResult<String> {
    let p = patterns()?;

    let result = template.replace("$TASK_ID", &task_id.to_string());

    let result = p.map_key.replace_all(&result, |caps: &Captures<'_>| {
        candidate.get_field(&caps[1]).unwrap_or_default()
    });

    let result = p.slice.replace_all(&result, |caps: &Captures<'_>| {
        candidate
            .get_slice(capture_index(caps))
            .unwrap_or_else(|| "[]".to_string())
    });

    let result = p.index.replace_all(&result, |caps: &Captures<'_>| {
        candidate.get_index(capture_index(caps)).unwrap_or_default()
    });

    let display = candidate.display_string();
    let result = p.bare.replace_all(&result, regex::NoExpand(&display));

    Ok(result.into_owned())
}

/// Wraps `value` in single quotes for safe use in a `bash -c` string.
///
/// Embedded single quotes are closed, emitted inside double quotes, and
/// reopened: `O'Reilly` becomes `'O'"'"'Reilly'`.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Substitutes `$CANDIDATE` (shell-quoted key) and `$TASK_NAME` in a command.
#[must_use]
pub fn interpolate_command(command: &str, candidate: &Candidate, task_name: &str) -> String {
    command
        .replace("$CANDIDATE", &shell_quote(candidate.key()))
        .replace("$TASK_NAME", task_name)
}

/// Rewrites a success command for a partial, best-effort commit.
///
/// The first whole-word `fix` (any case) becomes `best effort`. A command
/// without that word is returned unchanged.
///
/// # Errors
///
/// Returns a fatal error only if the built-in patterns fail to compile.
pub fn best_effort_command(command: &str) -> RunResult<String> {
    Ok(patterns()?
        .fix_word
        .replace(command, "best effort")
        .into_owned())
}

/// Reads a prompt template file.
///
/// # Errors
///
/// A missing or unreadable template is fatal: the run cannot build prompts.
pub fn load_template(path: &Path) -> RunResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        RunError::fatal(format!("failed to read template {}: {e}", path.display()))
    })
}
