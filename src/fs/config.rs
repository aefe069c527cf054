//! Runner configuration and task discovery.
//!
//! Layout under the project directory:
//!
//! ```text
//! fixloop/                  (or task-runner/)
//!   config.yaml             global commands
//!   lint-fixes/
//!     task.yaml             one task per subdirectory
//!     prompt.md             optional template
//!     ignored.log           written at run time
//!     agent.log             written at run time
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Preferred runner directory name.
pub const RUNNER_DIR: &str = "fixloop";

/// Runner directory name accepted when [`RUNNER_DIR`] is absent.
pub const FALLBACK_RUNNER_DIR: &str = "task-runner";

/// Global configuration file inside the runner directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Per-task configuration file inside a task directory.
pub const TASK_FILE: &str = "task.yaml";

/// Agent command used when `config.yaml` does not set one.
pub const DEFAULT_AGENT_COMMAND: &str = "claude";

/// Global commands from `config.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Agent CLI, `~/` expanded. Defaults to `claude`.
    pub agent_command: String,
    /// Commits a fix. Supports `$CANDIDATE` and `$TASK_NAME`.
    pub success_command: String,
    /// Restores the working tree after a failed attempt.
    pub reset_command: String,
    /// Builds and tests the project; empty means always passing.
    pub verify_command: String,
}

/// Raw `task.yaml` contents before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TaskFile {
    candidate_source: String,
    prompt: String,
    template: String,
    agent_flags: String,
    agent_command: String,
    accept_best_effort: bool,
    timeout: Option<String>,
    ignore_list: String,
}

/// Where a task's prompt text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    /// Prompt given inline in `task.yaml`.
    Inline(String),
    /// Template file, resolved against the task directory.
    Template(PathBuf),
}

/// A validated task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Directory name of the task.
    pub name: String,
    /// Task directory holding `task.yaml` and the run-time logs.
    pub dir: PathBuf,
    /// Discovery command that prints a JSON array of candidates.
    pub candidate_source: String,
    pub prompt: PromptSource,
    /// Extra agent flags appended after the streaming flags.
    pub agent_flags: String,
    /// Overrides the global agent command when set.
    pub agent_command: Option<String>,
    /// Commit partial progress that still builds.
    pub accept_best_effort: bool,
    /// Per-candidate agent deadline.
    pub timeout: Option<Duration>,
    /// Command whose stdout lines are added to the ignore set at startup.
    pub ignore_list: Option<String>,
}

impl TaskConfig {
    /// Mode label shown in listings and the startup summary.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        if self.accept_best_effort {
            "best-effort"
        } else {
            "standard"
        }
    }
}

/// Everything discovered from the working directory at startup.
#[derive(Debug, Clone)]
pub struct Environment {
    pub config: RunnerConfig,
    /// Tasks keyed by name, sorted.
    pub tasks: BTreeMap<String, TaskConfig>,
    /// Directory the commands run in.
    pub project_dir: PathBuf,
    pub runner_dir: PathBuf,
    /// Random identifier for this run, exposed to prompts as `$TASK_ID`.
    pub task_id: u64,
}

impl Environment {
    /// Discovers the runner directory under `project_dir` and loads the
    /// global config and every task.
    ///
    /// # Errors
    ///
    /// Returns an error if no runner directory exists, or if `config.yaml` or
    /// any `task.yaml` is missing required fields, has unknown fields, or
    /// fails to parse.
    pub fn discover(project_dir: &Path) -> Result<Self> {
        let runner_dir = find_runner_dir(project_dir)?;

        let mut config = load_config(&runner_dir.join(CONFIG_FILE))?;
        if config.agent_command.trim().is_empty() {
            config.agent_command = DEFAULT_AGENT_COMMAND.to_string();
        }
        config.agent_command = expand_tilde(&config.agent_command);

        let tasks = load_tasks(&runner_dir)?;

        Ok(Self {
            config,
            tasks,
            project_dir: project_dir.to_path_buf(),
            runner_dir,
            task_id: rand::random(),
        })
    }

    /// Looks up a task by name.
    ///
    /// # Errors
    ///
    /// Returns an error naming the available tasks if `name` is unknown.
    pub fn task(&self, name: &str) -> Result<&TaskConfig> {
        self.tasks.get(name).with_context(|| {
            let known: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
            format!("task not found: {name} (available: {})", known.join(", "))
        })
    }

    /// Agent command for a task: the task override or the global default.
    #[must_use]
    pub fn agent_command_for<'a>(&'a self, task: &'a TaskConfig) -> &'a str {
        task.agent_command
            .as_deref()
            .unwrap_or(&self.config.agent_command)
    }
}

fn find_runner_dir(project_dir: &Path) -> Result<PathBuf> {
    [RUNNER_DIR, FALLBACK_RUNNER_DIR]
        .iter()
        .map(|name| project_dir.join(name))
        .find(|dir| dir.is_dir())
        .with_context(|| {
            format!(
                "no {RUNNER_DIR}/ or {FALLBACK_RUNNER_DIR}/ directory found in {}",
                project_dir.display()
            )
        })
}

/// Loads `config.yaml`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(RunnerConfig::default());
    }
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Scans `runner_dir` for subdirectories containing `task.yaml`.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or any task is invalid.
pub fn load_tasks(runner_dir: &Path) -> Result<BTreeMap<String, TaskConfig>> {
    let mut tasks = BTreeMap::new();

    let entries = std::fs::read_dir(runner_dir)
        .with_context(|| format!("Failed to read {}", runner_dir.display()))?;

    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let dir = entry.path();
        let task_file = dir.join(TASK_FILE);
        if !dir.is_dir() || !task_file.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let task = load_task(&name, &dir, &task_file)
            .with_context(|| format!("Failed to load task {name}"))?;
        tasks.insert(name, task);
    }

    Ok(tasks)
}

fn load_task(name: &str, dir: &Path, task_file: &Path) -> Result<TaskConfig> {
    let content = std::fs::read_to_string(task_file)
        .with_context(|| format!("Failed to read {}", task_file.display()))?;
    let raw: TaskFile = if content.trim().is_empty() {
        TaskFile::default()
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", task_file.display()))?
    };

    if raw.candidate_source.trim().is_empty() {
        bail!("missing required field 'candidate_source'");
    }

    let prompt = match (raw.prompt.is_empty(), raw.template.is_empty()) {
        (false, true) => PromptSource::Inline(raw.prompt),
        (true, false) => PromptSource::Template(dir.join(raw.template)),
        (true, true) => bail!("must have either 'prompt' or 'template'"),
        (false, false) => bail!("cannot have both 'prompt' and 'template'"),
    };

    let timeout = match raw.timeout.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => {
            let parsed = parse_duration(value)
                .map_err(|e| anyhow::anyhow!("invalid timeout {value:?}: {e}"))?;
            (!parsed.is_zero()).then_some(parsed)
        }
    };

    Ok(TaskConfig {
        name: name.to_string(),
        dir: dir.to_path_buf(),
        candidate_source: raw.candidate_source,
        prompt,
        agent_flags: raw.agent_flags,
        agent_command: non_empty(&raw.agent_command).map(|cmd| expand_tilde(&cmd)),
        accept_best_effort: raw.accept_best_effort,
        timeout,
        ignore_list: non_empty(&raw.ignore_list),
    })
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Expands a leading `~/` to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest).display().to_string(),
        _ => path.to_string(),
    }
}

/// Parses a Go-style duration such as `30m`, `1h30m`, `1.5h` or `45s`.
///
/// Supported units are `ns`, `us`, `µs`, `ms`, `s`, `m` and `h`. A bare `0`
/// is accepted. Negative durations are rejected.
///
/// # Errors
///
/// Returns a description of the problem if the value is not a valid
/// non-negative duration.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if trimmed.starts_with('-') {
        return Err("negative duration".to_string());
    }
    let mut rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_seconds = 0.0f64;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(format!("invalid duration {trimmed:?}"));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| format!("invalid duration {trimmed:?}"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {trimmed:?}")),
            unit => return Err(format!("unknown unit {unit:?} in duration {trimmed:?}")),
        };
        total_seconds += value * scale;
        rest = &rest[unit_len..];
    }

    Duration::try_from_secs_f64(total_seconds).map_err(|e| e.to_string())
}
