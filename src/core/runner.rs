//! The fix loop: select a candidate, run the agent, verify, recheck, finalize.
//!
//! One [`Runner`] drives one task sequentially. Each iteration:
//!
//! 1. Runs discovery, parses candidates and applies the hash filter.
//! 2. Picks the first candidate not in the ignore set, or stops.
//! 3. Renders the prompt and invokes the agent with the task timeout.
//! 4. Verifies the build, and only then re-runs discovery to see whether the
//!    candidate disappeared. Broken changes can hide candidates from
//!    discovery, so presence is never checked on an unverified tree.
//! 5. Commits, or reverts, and records the outcome.
//!
//! Errors are classified by [`ErrorKind`]: fatal errors stop the run, rate
//! limits sleep a long cooldown, and anything else sleeps with exponential
//! backoff before the next iteration.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::console;
use crate::core::backoff::{BackoffPolicy, BackoffState};
use crate::core::candidate::{
    Candidate, HashFilter, contains_key, count_ignored, filter_by_hash, parse_candidates,
    select_candidate,
};
use crate::core::error::{ErrorKind, RunError, RunResult};
use crate::core::executor::{AgentExecutor, CommandRunner, OutputMode};
use crate::core::ignore::{IGNORE_FILE, IgnoreSet};
use crate::core::phase::IterationPhase;
use crate::core::template::{
    best_effort_command, interpolate_command, interpolate_prompt, load_template,
};
use crate::fs::{AuditLog, Outcome, PromptSource, RunnerConfig, TaskConfig, format_duration};

/// Substring of agent output that signals a provider rate limit.
pub const RATE_LIMIT_PHRASE: &str = "You've hit your limit";

/// Capacity of the channel carrying streamed agent text to the console.
const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Run-wide options, mostly from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Maximum number of iterations; `None` for unlimited.
    pub limit: Option<u32>,
    /// Wall-clock budget checked before each iteration.
    pub time_limit: Option<Duration>,
    /// Print the first prompt and stop without invoking the agent.
    pub dry_run: bool,
    /// Print discovery output, parsed keys and recheck details.
    pub verbose: bool,
    pub hash_filter: HashFilter,
    pub backoff: BackoffPolicy,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No candidate is left outside the ignore set.
    Exhausted,
    /// The dry-run prompt was printed.
    DryRun,
    IterationLimit,
    TimeLimit,
    /// A graceful stop was requested.
    Stopped,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Iterations started, including ones that ended in an error.
    pub iterations: u32,
    /// Candidate key and outcome of every finalized iteration, in order.
    pub outcomes: Vec<(String, Outcome)>,
    pub stop: StopReason,
}

/// What an iteration ended with.
#[derive(Debug)]
enum Step {
    Finished(Outcome),
    Done(StopReason),
}

/// Why a candidate goes through the failure policy.
#[derive(Debug, Clone, Copy)]
enum FailureCause {
    BuildFailed,
    StillPresent,
    TimedOut(Duration),
}

impl FailureCause {
    fn describe(self) -> String {
        match self {
            Self::BuildFailed => "build failed".to_string(),
            Self::StillPresent => "still present".to_string(),
            Self::TimedOut(limit) => format!("timed out after {}", format_duration(limit)),
        }
    }
}

/// Iteration state machine for one task.
pub struct Runner {
    task: TaskConfig,
    config: RunnerConfig,
    task_id: u64,
    options: RunnerOptions,
    commands: Arc<dyn CommandRunner>,
    agent: Arc<dyn AgentExecutor>,
    shutdown_rx: watch::Receiver<bool>,
    ignore: IgnoreSet,
    log: Option<AuditLog>,
    phase: IterationPhase,
    backoff: BackoffState,
}

impl Runner {
    /// Creates a runner for `task`.
    ///
    /// Loads the task's ignore list and, unless this is a dry run, opens its
    /// audit log.
    ///
    /// # Arguments
    ///
    /// * `task` - The validated task
    /// * `config` - Global commands (success, reset, verify)
    /// * `task_id` - Random run identifier for `$TASK_ID`
    /// * `options` - Limits, filters and backoff policy
    /// * `commands` - Runs shell commands in the project directory
    /// * `agent` - Invokes the AI agent
    /// * `shutdown_rx` - Becomes `true` when a graceful stop is requested
    ///
    /// # Errors
    ///
    /// Returns an error if the ignore list cannot be read or the audit log
    /// cannot be opened.
    pub fn new(
        task: TaskConfig,
        config: RunnerConfig,
        task_id: u64,
        options: RunnerOptions,
        commands: Arc<dyn CommandRunner>,
        agent: Arc<dyn AgentExecutor>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> RunResult<Self> {
        let ignore = IgnoreSet::load(&task.dir.join(IGNORE_FILE))?;
        let log = if options.dry_run {
            None
        } else {
            Some(AuditLog::open(&task.dir)?)
        };

        Ok(Self {
            task,
            config,
            task_id,
            options,
            commands,
            agent,
            shutdown_rx,
            ignore,
            log,
            phase: IterationPhase::Idle,
            backoff: BackoffState::default(),
        })
    }

    /// Current phase of the state machine.
    #[must_use]
    pub const fn phase(&self) -> &IterationPhase {
        &self.phase
    }

    #[must_use]
    pub const fn ignore_set(&self) -> &IgnoreSet {
        &self.ignore
    }

    /// Label for the startup summary.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        if self.options.dry_run {
            "dry-run"
        } else {
            self.task.mode()
        }
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn transition(&mut self, next: IterationPhase) {
        debug_assert!(
            self.phase.can_transition_to(&next),
            "invalid transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = %self.phase.description(), to = %next.description(), "phase");
        self.phase = next;
    }

    /// Runs iterations until candidates are exhausted, a limit is reached, a
    /// graceful stop is requested, or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the run, or an error from seeding
    /// the ignore set.
    pub async fn run(&mut self) -> RunResult<RunSummary> {
        self.seed_ignore_list().await?;
        self.print_startup();

        let started = Instant::now();
        let mut iterations = 0u32;
        let mut outcomes = Vec::new();

        let stop = loop {
            if self.stop_requested() {
                console::info("Stopped by user request.");
                break StopReason::Stopped;
            }
            if self.options.limit.is_some_and(|limit| iterations >= limit) {
                console::info(&format!("Reached iteration limit ({iterations})."));
                break StopReason::IterationLimit;
            }
            if let Some(limit) = self.options.time_limit
                && started.elapsed() >= limit
            {
                console::info(&format!("Reached time limit ({}).", format_duration(limit)));
                break StopReason::TimeLimit;
            }

            iterations += 1;
            let clock = chrono::Local::now().format("%H:%M:%S").to_string();
            console::iteration_banner(iterations, &clock);
            self.phase = IterationPhase::Idle;

            match self.run_iteration(&mut outcomes).await {
                Ok(Step::Finished(outcome)) => {
                    info!(iteration = iterations, %outcome, "iteration finished");
                    self.backoff.reset();
                }
                Ok(Step::Done(reason)) => break reason,
                Err(e) => self.recover(e).await?,
            }
        };

        Ok(RunSummary {
            iterations,
            outcomes,
            stop,
        })
    }

    /// Applies the error policy. Fatal errors are returned; everything else
    /// sleeps and lets the loop continue.
    async fn recover(&mut self, error: RunError) -> RunResult<()> {
        match error.kind() {
            ErrorKind::Fatal => {
                self.transition(IterationPhase::Fatal {
                    reason: error.to_string(),
                });
                Err(error)
            }
            ErrorKind::RateLimited => {
                let wait = self.options.backoff.rate_limit_cooldown;
                console::error(&format!("Error: {error}"));
                console::warning(&format!(
                    "Rate limit hit, sleeping for {}...",
                    format_duration(wait)
                ));
                warn!(wait_secs = wait.as_secs(), "rate limited");
                self.sleep_unless_stopped(wait).await;
                self.backoff.reset();
                Ok(())
            }
            ErrorKind::TimedOut | ErrorKind::Recoverable => {
                let level = self.backoff.level();
                let wait = self.backoff.next_delay(&self.options.backoff);
                console::error(&format!("Error: {error}"));
                console::warning(&format!(
                    "Sleeping for {} (backoff level {level})...",
                    format_duration(wait)
                ));
                warn!(%error, level, wait_secs = wait.as_secs(), "iteration failed");
                self.sleep_unless_stopped(wait).await;
                Ok(())
            }
        }
    }

    /// Sleeps for `wait`, waking early if a graceful stop is requested.
    async fn sleep_unless_stopped(&mut self, wait: Duration) {
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            () = wait_for_shutdown(&mut self.shutdown_rx) => {}
        }
    }

    async fn seed_ignore_list(&mut self) -> RunResult<()> {
        let Some(command) = self.task.ignore_list.clone() else {
            return Ok(());
        };
        let output = self.commands.capture(&command).await?;
        let before = self.ignore.len();
        self.ignore.seed(output.lines().map(str::trim));
        debug!(added = self.ignore.len() - before, "seeded ignore set");
        Ok(())
    }

    fn print_startup(&self) {
        let log_path = self.task.dir.join(crate::fs::AUDIT_LOG_FILE);
        let shown = std::env::current_dir()
            .ok()
            .and_then(|cwd| log_path.strip_prefix(cwd).ok().map(std::path::Path::to_path_buf))
            .unwrap_or_else(|| log_path.clone());
        console::startup_banner(&self.task.name, &shown.display().to_string(), self.mode());
    }

    /// Runs discovery and returns the filtered candidate list.
    async fn discover(&self, label: &str) -> RunResult<Vec<Candidate>> {
        let output = self.commands.capture(&self.task.candidate_source).await?;
        if self.options.verbose {
            console::info(&format!("{label} output:\n{output}"));
        }

        let candidates = filter_by_hash(parse_candidates(&output)?, self.options.hash_filter);
        if self.options.verbose {
            console::info(&format!("{label} parsed candidates ({} total):", candidates.len()));
            for candidate in &candidates {
                println!("  - {}", candidate.key());
            }
        }
        Ok(candidates)
    }

    fn render_prompt(&self, candidate: &Candidate) -> RunResult<String> {
        let template = match &self.task.prompt {
            PromptSource::Inline(text) => text.clone(),
            PromptSource::Template(path) => load_template(path)?,
        };
        interpolate_prompt(&template, candidate, self.task_id)
    }

    async fn run_iteration(&mut self, outcomes: &mut Vec<(String, Outcome)>) -> RunResult<Step> {
        self.transition(IterationPhase::SelectCandidate);
        console::info("Running candidate source...");
        let candidates = self.discover("Candidate source").await?;

        let ignored = count_ignored(&candidates, &self.ignore);
        let Some(candidate) = select_candidate(&candidates, &self.ignore).cloned() else {
            self.transition(IterationPhase::NoneRemaining);
            if ignored > 0 {
                println!("No more candidates ({ignored} ignored).");
            } else {
                println!("No more candidates.");
            }
            return Ok(Step::Done(StopReason::Exhausted));
        };
        println!(
            "Found {} candidates ({ignored} ignored)",
            candidates.len() - ignored
        );
        println!("Selected: {}", candidate.key());

        self.transition(IterationPhase::BuildPrompt {
            key: candidate.key().to_string(),
        });
        let prompt = self.render_prompt(&candidate)?;
        if self.options.verbose {
            println!("Prompt:\n{prompt}");
        }

        if self.options.dry_run {
            println!("\n--- Dry Run Prompt ---\n{prompt}\n--- End Prompt ---");
            self.transition(IterationPhase::Idle);
            return Ok(Step::Done(StopReason::DryRun));
        }

        self.transition(IterationPhase::Invoke {
            key: candidate.key().to_string(),
        });
        if let Some(log) = &self.log
            && let Err(e) = log.start_entry(&prompt)
        {
            warn!(error = %e, "failed to write audit log");
        }

        let result = self.invoke_and_classify(&candidate, &prompt).await;

        if let Some(log) = &self.log
            && let Err(e) = log.end_entry()
        {
            warn!(error = %e, "failed to write audit log");
        }

        let outcome = result?;
        outcomes.push((candidate.key().to_string(), outcome));
        Ok(Step::Finished(outcome))
    }

    /// Invokes the agent, then verifies, rechecks and finalizes.
    async fn invoke_and_classify(
        &mut self,
        candidate: &Candidate,
        prompt: &str,
    ) -> RunResult<Outcome> {
        let (tx, mut rx) = mpsc::channel::<String>(STREAM_CHANNEL_CAPACITY);
        let printer = tokio::spawn(async move {
            let mut stdout = std::io::stdout();
            while let Some(text) = rx.recv().await {
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
        });

        let invoked = self
            .agent
            .invoke(prompt, self.task.timeout, tx, self.log.clone())
            .await;
        let _ = printer.await;
        let run = match invoked {
            Ok(run) => run,
            Err(RunError::Timeout { limit, output }) => {
                if output.contains(RATE_LIMIT_PHRASE) {
                    return Err(RunError::RateLimit);
                }
                self.transition(IterationPhase::TimedOut);
                console::warning(&format!(
                    "Agent timed out after {}",
                    format_duration(limit)
                ));
                return self
                    .handle_failure(candidate, FailureCause::TimedOut(limit))
                    .await;
            }
            Err(e) => return Err(e),
        };

        if run.output.contains(RATE_LIMIT_PHRASE) {
            return Err(RunError::RateLimit);
        }
        if !run.status.success() {
            return Err(RunError::CommandFailed {
                command: self.agent.command().to_string(),
                status: run.status.to_string(),
                stderr: String::new(),
            });
        }

        self.transition(IterationPhase::VerifyBuild);
        if !self.verify().await {
            console::warning("Build failed after agent changes");
            return self
                .handle_failure(candidate, FailureCause::BuildFailed)
                .await;
        }

        self.transition(IterationPhase::Recheck);
        console::info("Re-checking candidates...");
        let after = self.discover("Re-check").await?;
        let still_present = contains_key(&after, candidate.key());
        if self.options.verbose {
            console::info(&format!("Looking for candidate: {}", candidate.key()));
            console::info(&format!("Candidate found: {still_present}"));
        }

        if still_present {
            self.handle_failure(candidate, FailureCause::StillPresent)
                .await
        } else {
            self.handle_success(candidate).await
        }
    }

    async fn handle_success(&mut self, candidate: &Candidate) -> RunResult<Outcome> {
        console::success(&format!("Candidate {} was fixed!", candidate.key()));

        if !self.commands.has_uncommitted_changes().await? {
            return self.finalize(candidate, Outcome::Fixed, "no changes to commit");
        }

        let command = interpolate_command(&self.config.success_command, candidate, &self.task.name);
        console::info("Committing changes...");
        if self.commands.run(&command, OutputMode::Show).await? {
            console::success("Changes committed");
            return self.finalize(candidate, Outcome::Fixed, "committed");
        }

        // The fix stays uncommitted; restore a clean tree before moving on.
        console::warning("Success command failed, reverting changes...");
        self.reset_and_verify().await?;
        self.finalize(
            candidate,
            Outcome::FixedButReverted,
            "success command failed; reverted",
        )
    }

    async fn handle_failure(
        &mut self,
        candidate: &Candidate,
        cause: FailureCause,
    ) -> RunResult<Outcome> {
        console::error(&format!(
            "Candidate {} not fixed ({}).",
            candidate.key(),
            cause.describe()
        ));

        let (outcome, action) = if self.task.accept_best_effort {
            if self.verify().await {
                if self.commands.has_uncommitted_changes().await? {
                    console::info("Committing partial progress...");
                    let template = best_effort_command(&self.config.success_command)?;
                    let command = interpolate_command(&template, candidate, &self.task.name);
                    if self.commands.run(&command, OutputMode::Show).await? {
                        console::success("Changes committed");
                        (Outcome::BestEffort, "partial progress committed")
                    } else {
                        console::warning("Best-effort commit failed, reverting changes...");
                        self.reset_and_verify().await?;
                        (Outcome::NotFixed, "commit failed; reverted")
                    }
                } else {
                    (Outcome::NotFixed, "no changes made")
                }
            } else {
                console::warning("Build failed, resetting...");
                self.reset_and_verify().await?;
                (Outcome::BuildFailed, "reverted")
            }
        } else {
            self.reset_and_verify().await?;
            (Outcome::NotFixed, "reverted")
        };

        self.finalize(candidate, outcome, &format!("{}; {action}", cause.describe()))
    }

    /// Records the outcome and adds the key to the ignore set unless the
    /// candidate was fixed and committed.
    fn finalize(
        &mut self,
        candidate: &Candidate,
        outcome: Outcome,
        details: &str,
    ) -> RunResult<Outcome> {
        self.transition(IterationPhase::Finalize(outcome));
        if let Some(log) = &self.log
            && let Err(e) = log.log_outcome(outcome, details)
        {
            warn!(error = %e, "failed to write audit log");
        }
        if outcome != Outcome::Fixed {
            self.ignore.add(candidate.key())?;
        }
        Ok(outcome)
    }

    /// Runs the verify command, showing its output only on failure.
    async fn verify(&self) -> bool {
        let command = self.config.verify_command.trim();
        if command.is_empty() {
            return true;
        }
        console::info("Verifying build...");
        match self.commands.run(command, OutputMode::ShowOnFailure).await {
            Ok(true) => {
                console::info("Build OK");
                true
            }
            Ok(false) => false,
            Err(e) => {
                console::error(&format!("Verify command error: {e}"));
                false
            }
        }
    }

    /// Resets the working tree and re-verifies the build.
    ///
    /// # Errors
    ///
    /// Either step failing is fatal: the tree can no longer be trusted.
    async fn reset_and_verify(&self) -> RunResult<()> {
        console::info("Resetting changes and verifying build...");

        let reset = self.config.reset_command.trim();
        if !reset.is_empty() {
            let ok = self
                .commands
                .run(reset, OutputMode::Silent)
                .await
                .unwrap_or(false);
            if !ok {
                return Err(RunError::fatal("failed to reset working tree"));
            }
        }

        let verify = self.config.verify_command.trim();
        if !verify.is_empty() {
            let ok = self
                .commands
                .run(verify, OutputMode::Silent)
                .await
                .unwrap_or(false);
            if !ok {
                return Err(RunError::fatal("build still fails after reset"));
            }
        }

        console::info("Reset OK");
        Ok(())
    }
}

/// Waits until the watch value becomes `true` or the sender is dropped.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can request a stop any more, so never wake.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::executor::AgentRun;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    // =========================================================================
    // Mock command runner
    // =========================================================================

    /// Scripted [`CommandRunner`] that records every call in order.
    #[derive(Default)]
    struct MockCommands {
        /// Successive outputs of `capture`, per command.
        captures: Mutex<HashMap<String, VecDeque<RunResult<String>>>>,
        /// Successive results of `run`, per command. Empty means success.
        runs: Mutex<HashMap<String, VecDeque<bool>>>,
        /// Result of `has_uncommitted_changes`.
        dirty: Mutex<bool>,
        /// Every call, as `capture:<cmd>`, `run:<cmd>` or `dirty?`.
        calls: Mutex<Vec<String>>,
    }

    impl MockCommands {
        fn new() -> Self {
            let mock = Self::default();
            *mock.dirty.lock().unwrap() = true;
            mock
        }

        fn discovery(self, outputs: &[serde_json::Value]) -> Self {
            let queue = outputs.iter().map(|v| Ok(v.to_string())).collect();
            self.captures
                .lock()
                .unwrap()
                .insert(DISCOVER.to_string(), queue);
            self
        }

        fn capture_result(self, command: &str, result: RunResult<String>) -> Self {
            self.captures
                .lock()
                .unwrap()
                .entry(command.to_string())
                .or_default()
                .push_back(result);
            self
        }

        fn run_results(self, command: &str, results: &[bool]) -> Self {
            self.runs
                .lock()
                .unwrap()
                .insert(command.to_string(), results.iter().copied().collect());
            self
        }

        fn clean(self) -> Self {
            *self.dirty.lock().unwrap() = false;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for MockCommands {
        async fn run(&self, command: &str, _mode: OutputMode) -> RunResult<bool> {
            self.calls.lock().unwrap().push(format!("run:{command}"));
            let mut runs = self.runs.lock().unwrap();
            Ok(runs
                .get_mut(command)
                .and_then(VecDeque::pop_front)
                .unwrap_or(true))
        }

        async fn capture(&self, command: &str) -> RunResult<String> {
            self.calls.lock().unwrap().push(format!("capture:{command}"));
            let mut captures = self.captures.lock().unwrap();
            let queue = captures.get_mut(command);
            match queue.and_then(VecDeque::pop_front) {
                Some(result) => result,
                None => Ok("[]".to_string()),
            }
        }

        async fn has_uncommitted_changes(&self) -> RunResult<bool> {
            self.calls.lock().unwrap().push("dirty?".to_string());
            Ok(*self.dirty.lock().unwrap())
        }
    }

    // =========================================================================
    // Mock agent
    // =========================================================================

    #[derive(Debug, Clone)]
    enum AgentReply {
        Ok(&'static str),
        Exit(i32),
        TimedOut(&'static str),
        LaunchError,
    }

    struct MockAgent {
        replies: Mutex<VecDeque<AgentReply>>,
        prompts: Mutex<Vec<String>>,
        call_count: AtomicU32,
    }

    impl MockAgent {
        fn new(replies: &[AgentReply]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().cloned().collect()),
                prompts: Mutex::new(Vec::new()),
                call_count: AtomicU32::new(0),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentExecutor for MockAgent {
        async fn invoke(
            &self,
            prompt: &str,
            timeout: Option<Duration>,
            output_tx: mpsc::Sender<String>,
            _log: Option<AuditLog>,
        ) -> RunResult<AgentRun> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(AgentReply::Ok("done"));

            let (output, status) = match reply {
                AgentReply::Ok(text) => (text, ExitStatus::from_raw(0)),
                AgentReply::Exit(code) => ("", ExitStatus::from_raw(code << 8)),
                AgentReply::TimedOut(text) => {
                    let _ = output_tx.send(text.to_string()).await;
                    return Err(RunError::Timeout {
                        limit: timeout.unwrap_or(Duration::from_secs(1)),
                        output: text.to_string(),
                    });
                }
                AgentReply::LaunchError => {
                    return Err(RunError::CommandExecution {
                        command: "mock".to_string(),
                        source: std::io::Error::other("spawn failed"),
                    });
                }
            };
            let _ = output_tx.send(output.to_string()).await;
            Ok(AgentRun {
                output: output.to_string(),
                status,
            })
        }

        fn command(&self) -> &str {
            "mock"
        }
    }

    // =========================================================================
    // Fixtures
    // =========================================================================

    const DISCOVER: &str = "discover";
    const VERIFY: &str = "verify";
    const RESET: &str = "reset";

    fn config() -> RunnerConfig {
        RunnerConfig {
            agent_command: "mock".to_string(),
            success_command: "git commit -m \"fix $CANDIDATE\"".to_string(),
            reset_command: RESET.to_string(),
            verify_command: VERIFY.to_string(),
        }
    }

    fn task(dir: &TempDir) -> TaskConfig {
        TaskConfig {
            name: "lint".to_string(),
            dir: dir.path().to_path_buf(),
            candidate_source: DISCOVER.to_string(),
            prompt: PromptSource::Inline("Fix $INPUT ($TASK_ID)".to_string()),
            agent_flags: String::new(),
            agent_command: None,
            accept_best_effort: false,
            timeout: Some(Duration::from_secs(60)),
            ignore_list: None,
        }
    }

    fn fast_options() -> RunnerOptions {
        RunnerOptions {
            backoff: BackoffPolicy::new(
                Duration::from_millis(1),
                Duration::from_millis(4),
                Duration::from_millis(1),
            ),
            ..RunnerOptions::default()
        }
    }

    struct Harness {
        runner: Runner,
        commands: Arc<MockCommands>,
        agent: Arc<MockAgent>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn harness(
        task: TaskConfig,
        options: RunnerOptions,
        commands: MockCommands,
        agent: MockAgent,
    ) -> Harness {
        let commands = Arc::new(commands);
        let agent = Arc::new(agent);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = Runner::new(
            task,
            config(),
            7,
            options,
            Arc::clone(&commands) as Arc<dyn CommandRunner>,
            Arc::clone(&agent) as Arc<dyn AgentExecutor>,
            shutdown_rx,
        )
        .unwrap();
        Harness {
            runner,
            commands,
            agent,
            shutdown_tx,
        }
    }

    fn ignored_lines(dir: &TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join(IGNORE_FILE))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn audit_log(dir: &TempDir) -> String {
        std::fs::read_to_string(dir.path().join(crate::fs::AUDIT_LOG_FILE)).unwrap_or_default()
    }

    // =========================================================================
    // Selection and termination
    // =========================================================================

    mod selection {
        use super::*;

        #[tokio::test]
        async fn empty_discovery_ends_run() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!([])]);
            let mut h = harness(task(&dir), fast_options(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.stop, StopReason::Exhausted);
            assert_eq!(summary.iterations, 1);
            assert_eq!(h.agent.call_count.load(Ordering::SeqCst), 0);
            assert_eq!(*h.runner.phase(), IterationPhase::NoneRemaining);
        }

        /// Ignored keys are skipped in source order.
        #[tokio::test]
        async fn skips_ignored_candidates() {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join(IGNORE_FILE), "a\nb\n").unwrap();
            let commands = MockCommands::new().discovery(&[
                json!(["a", "b", "c", "d"]),
                json!(["a", "b", "c", "d"]),
                json!(["a", "b", "c", "d"]),
                json!(["a", "b", "c", "d"]),
            ]);
            let options = RunnerOptions {
                limit: Some(2),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            let prompts = h.agent.prompts();
            assert_eq!(prompts.len(), 2);
            assert_eq!(prompts[0], "Fix c (7)");
            assert_eq!(prompts[1], "Fix d (7)");
            assert_eq!(summary.stop, StopReason::IterationLimit);
            assert_eq!(ignored_lines(&dir), vec!["a", "b", "c", "d"]);
        }

        #[tokio::test]
        async fn everything_ignored_ends_run() {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join(IGNORE_FILE), "a\n").unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a"])]);
            let mut h = harness(task(&dir), fast_options(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();
            assert_eq!(summary.stop, StopReason::Exhausted);
            assert_eq!(h.agent.call_count.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn ignore_list_command_seeds_in_memory_only() {
            let dir = TempDir::new().unwrap();
            let mut task = task(&dir);
            task.ignore_list = Some("list-done".to_string());
            let commands = MockCommands::new()
                .capture_result("list-done", Ok("a\n\nb\n".to_string()))
                .discovery(&[json!(["a", "b"])]);
            let mut h = harness(task, fast_options(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.stop, StopReason::Exhausted);
            assert!(h.runner.ignore_set().contains("a"));
            assert!(!dir.path().join(IGNORE_FILE).exists());
        }

        #[tokio::test]
        async fn hash_filter_applies_to_selection() {
            let dir = TempDir::new().unwrap();
            let keys: Vec<String> = (0..20).map(|i| format!("k{i}")).collect();
            let first_odd = keys
                .iter()
                .find(|k| HashFilter::Odds.matches(k))
                .unwrap()
                .clone();
            let commands = MockCommands::new().discovery(&[json!(keys), json!([])]);
            let options = RunnerOptions {
                limit: Some(1),
                hash_filter: HashFilter::Odds,
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

            h.runner.run().await.unwrap();
            assert_eq!(h.agent.prompts(), vec![format!("Fix {first_odd} (7)")]);
        }

        #[tokio::test]
        async fn dry_run_prints_prompt_without_agent_or_log() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a"])]);
            let options = RunnerOptions {
                dry_run: true,
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.stop, StopReason::DryRun);
            assert_eq!(h.runner.mode(), "dry-run");
            assert_eq!(h.agent.call_count.load(Ordering::SeqCst), 0);
            assert!(!dir.path().join(crate::fs::AUDIT_LOG_FILE).exists());
            assert!(!dir.path().join(IGNORE_FILE).exists());
        }

        #[tokio::test]
        async fn stop_request_prevents_next_iteration() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a"])]);
            let mut h = harness(task(&dir), fast_options(), commands, MockAgent::new(&[]));
            h.shutdown_tx.send(true).unwrap();

            let summary = h.runner.run().await.unwrap();
            assert_eq!(summary.stop, StopReason::Stopped);
            assert_eq!(summary.iterations, 0);
        }

        #[tokio::test]
        async fn zero_time_limit_stops_immediately() {
            let dir = TempDir::new().unwrap();
            let options = RunnerOptions {
                time_limit: Some(Duration::ZERO),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, MockCommands::new(), MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();
            assert_eq!(summary.stop, StopReason::TimeLimit);
            assert_eq!(summary.iterations, 0);
        }
    }

    // =========================================================================
    // Outcomes
    // =========================================================================

    mod outcomes {
        use super::*;

        /// Verify runs strictly before the recheck discovery.
        #[tokio::test]
        async fn fixed_candidate_is_committed() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a.go"]), json!([])]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes, vec![("a.go".to_string(), Outcome::Fixed)]);
            assert_eq!(
                h.commands.calls(),
                vec![
                    "capture:discover",
                    "run:verify",
                    "capture:discover",
                    "dirty?",
                    "run:git commit -m \"fix 'a.go'\"",
                ]
            );
            // Fixed keys are not ignored.
            assert!(ignored_lines(&dir).is_empty());
            let log = audit_log(&dir);
            assert!(log.contains("Prompt: Fix a.go (7)"));
            assert!(log.contains("Outcome: FIXED\n"));
            assert!(log.contains("Details: committed"));
        }

        #[tokio::test]
        async fn fixed_without_changes_skips_commit() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .clean()
                .discovery(&[json!(["a"]), json!([])]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

            h.runner.run().await.unwrap();

            assert!(!h.commands.calls().iter().any(|c| c.starts_with("run:git")));
            assert!(audit_log(&dir).contains("Details: no changes to commit"));
        }

        /// A failing commit leaves the fix uncommitted, so the tree is reset.
        #[tokio::test]
        async fn failed_commit_reverts_and_ignores() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .discovery(&[json!(["a"]), json!([])])
                .run_results("git commit -m \"fix 'a'\"", &[false]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes[0].1, Outcome::FixedButReverted);
            let calls = h.commands.calls();
            assert_eq!(&calls[calls.len() - 2..], ["run:reset", "run:verify"]);
            assert_eq!(ignored_lines(&dir), vec!["a"]);
        }

        #[tokio::test]
        async fn still_present_is_reverted() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a", "b"]), json!(["a", "b"])]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes, vec![("a".to_string(), Outcome::NotFixed)]);
            assert_eq!(
                h.commands.calls(),
                vec![
                    "capture:discover",
                    "run:verify",
                    "capture:discover",
                    "run:reset",
                    "run:verify",
                ]
            );
            assert_eq!(ignored_lines(&dir), vec!["a"]);
            assert!(audit_log(&dir).contains("Details: still present; reverted"));
        }

        /// A broken build is never rechecked against discovery.
        #[tokio::test]
        async fn build_failure_skips_recheck() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .discovery(&[json!(["a"]), json!([])])
                .run_results(VERIFY, &[false, true]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes[0].1, Outcome::NotFixed);
            assert_eq!(
                h.commands.calls(),
                vec!["capture:discover", "run:verify", "run:reset", "run:verify"]
            );
        }

        #[tokio::test]
        async fn timeout_goes_through_failure_policy() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["slow"])]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let agent = MockAgent::new(&[AgentReply::TimedOut("partial")]);
            let mut h = harness(task(&dir), options, commands, agent);

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes, vec![("slow".to_string(), Outcome::NotFixed)]);
            assert_eq!(
                h.commands.calls(),
                vec!["capture:discover", "run:reset", "run:verify"]
            );
            assert_eq!(ignored_lines(&dir), vec!["slow"]);
            assert!(audit_log(&dir).contains("Details: timed out after 1m00s; reverted"));
        }
    }

    // =========================================================================
    // Best-effort mode
    // =========================================================================

    mod best_effort {
        use super::*;

        fn best_effort_task(dir: &TempDir) -> TaskConfig {
            TaskConfig {
                accept_best_effort: true,
                ..task(dir)
            }
        }

        fn once() -> RunnerOptions {
            RunnerOptions {
                limit: Some(1),
                ..fast_options()
            }
        }

        #[tokio::test]
        async fn partial_progress_is_committed_with_adjusted_wording() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a"]), json!(["a"])]);
            let mut h = harness(best_effort_task(&dir), once(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes[0].1, Outcome::BestEffort);
            assert_eq!(
                h.commands.calls().last().unwrap(),
                "run:git commit -m \"best effort 'a'\""
            );
            assert_eq!(ignored_lines(&dir), vec!["a"]);
        }

        /// A failed partial commit must not leave its changes behind for the
        /// next candidate's commit to pick up.
        #[tokio::test]
        async fn failed_commit_is_reverted_and_not_fixed() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .discovery(&[json!(["a"]), json!(["a"])])
                .run_results("git commit -m \"best effort 'a'\"", &[false]);
            let mut h = harness(best_effort_task(&dir), once(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes, vec![("a".to_string(), Outcome::NotFixed)]);
            let calls = h.commands.calls();
            assert_eq!(
                &calls[calls.len() - 3..],
                [
                    "run:git commit -m \"best effort 'a'\"",
                    "run:reset",
                    "run:verify",
                ]
            );
            assert_eq!(ignored_lines(&dir), vec!["a"]);
            let log = audit_log(&dir);
            assert!(log.contains("Details: still present; commit failed; reverted"));
            assert!(!log.contains("partial progress committed"));
        }

        #[tokio::test]
        async fn no_changes_is_not_fixed() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .clean()
                .discovery(&[json!(["a"]), json!(["a"])]);
            let mut h = harness(best_effort_task(&dir), once(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes[0].1, Outcome::NotFixed);
            assert!(audit_log(&dir).contains("no changes made"));
            assert!(!h.commands.calls().iter().any(|c| c == "run:reset"));
        }

        #[tokio::test]
        async fn broken_build_is_reverted() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .discovery(&[json!(["a"])])
                .run_results(VERIFY, &[false, false, true]);
            let mut h = harness(best_effort_task(&dir), once(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.outcomes[0].1, Outcome::BuildFailed);
            assert_eq!(
                h.commands.calls(),
                vec![
                    "capture:discover",
                    "run:verify",
                    "run:verify",
                    "run:reset",
                    "run:verify",
                ]
            );
        }

        /// A timed-out agent that left a building tree keeps its progress.
        #[tokio::test]
        async fn timeout_with_building_changes_is_best_effort() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a"])]);
            let agent = MockAgent::new(&[AgentReply::TimedOut("half done")]);
            let mut h = harness(best_effort_task(&dir), once(), commands, agent);

            let summary = h.runner.run().await.unwrap();
            assert_eq!(summary.outcomes[0].1, Outcome::BestEffort);
        }
    }

    // =========================================================================
    // Error policy
    // =========================================================================

    mod errors {
        use super::*;

        /// A graceful stop cuts a long backoff sleep short.
        #[tokio::test]
        async fn stop_request_wakes_backoff_sleep() {
            let dir = TempDir::new().unwrap();
            let commands =
                MockCommands::new().capture_result(DISCOVER, Ok("not json".to_string()));
            let options = RunnerOptions {
                backoff: BackoffPolicy::new(
                    Duration::from_secs(3600),
                    Duration::from_secs(3600),
                    Duration::from_secs(3600),
                ),
                ..RunnerOptions::default()
            };
            let h = harness(task(&dir), options, commands, MockAgent::new(&[]));
            let Harness {
                mut runner,
                shutdown_tx,
                ..
            } = h;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = shutdown_tx.send(true);
            });

            let summary = tokio::time::timeout(Duration::from_secs(5), runner.run())
                .await
                .unwrap()
                .unwrap();

            assert_eq!(summary.stop, StopReason::Stopped);
            assert_eq!(summary.iterations, 1);
            assert_eq!(runner.backoff.level(), 1);
        }

        /// The rate-limit phrase wins even when the agent also timed out.
        #[tokio::test]
        async fn rate_limit_in_timed_out_output() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a"]), json!([])]);
            let agent = MockAgent::new(&[AgentReply::TimedOut("You've hit your limit")]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, agent);

            let summary = h.runner.run().await.unwrap();

            assert!(summary.outcomes.is_empty());
            assert!(ignored_lines(&dir).is_empty());
            assert!(!h.commands.calls().iter().any(|c| c == "run:reset"));
        }

        #[tokio::test]
        async fn failed_reset_is_fatal() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .discovery(&[json!(["a"]), json!(["a"])])
                .run_results(RESET, &[false]);
            let mut h = harness(task(&dir), fast_options(), commands, MockAgent::new(&[]));

            let err = h.runner.run().await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Fatal);
            assert!(h.runner.phase().is_terminal());
            // The key is not recorded when the outcome never got persisted.
            assert!(ignored_lines(&dir).is_empty());
        }

        #[tokio::test]
        async fn build_still_failing_after_reset_is_fatal() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .discovery(&[json!(["a"])])
                .run_results(VERIFY, &[false, false]);
            let mut h = harness(task(&dir), fast_options(), commands, MockAgent::new(&[]));

            let err = h.runner.run().await.unwrap_err();
            assert!(err.to_string().contains("build still fails after reset"));
        }

        #[tokio::test]
        async fn missing_template_is_fatal() {
            let dir = TempDir::new().unwrap();
            let mut task = task(&dir);
            task.prompt = PromptSource::Template(dir.path().join("absent.md"));
            let commands = MockCommands::new().discovery(&[json!(["a"])]);
            let mut h = harness(task, fast_options(), commands, MockAgent::new(&[]));

            let err = h.runner.run().await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Fatal);
            assert_eq!(h.agent.call_count.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn template_file_is_rendered() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("prompt.md");
            std::fs::write(&path, "Template for $INPUT[0]").unwrap();
            let mut task = task(&dir);
            task.prompt = PromptSource::Template(path);
            let commands = MockCommands::new().discovery(&[json!([["x.go", 3]]), json!([])]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let mut h = harness(task, options, commands, MockAgent::new(&[]));

            h.runner.run().await.unwrap();
            assert_eq!(h.agent.prompts(), vec!["Template for x.go"]);
        }

        /// Rate limit sleeps the cooldown and retries the same candidate
        /// without ignoring it.
        #[tokio::test]
        async fn rate_limit_retries_without_ignoring() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[
                json!(["a"]),
                json!(["a"]),
                json!([]),
            ]);
            let agent = MockAgent::new(&[AgentReply::Ok("You've hit your limit · resets 5pm")]);
            let mut h = harness(task(&dir), fast_options(), commands, agent);

            let summary = h.runner.run().await.unwrap();

            assert_eq!(h.agent.call_count.load(Ordering::SeqCst), 2);
            assert_eq!(summary.outcomes, vec![("a".to_string(), Outcome::Fixed)]);
            assert!(ignored_lines(&dir).is_empty());
            assert_eq!(h.runner.backoff.level(), 0);
        }

        #[tokio::test]
        async fn malformed_discovery_backs_off_and_retries() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .capture_result(DISCOVER, Ok("not json".to_string()))
                .capture_result(DISCOVER, Ok("{\"a\":1}".to_string()))
                .capture_result(DISCOVER, Ok("[]".to_string()));
            let mut h = harness(task(&dir), fast_options(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.iterations, 3);
            assert_eq!(summary.stop, StopReason::Exhausted);
            assert_eq!(h.runner.backoff.level(), 2);
        }

        #[tokio::test]
        async fn failing_discovery_command_is_recoverable() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new()
                .capture_result(
                    DISCOVER,
                    Err(RunError::CommandFailed {
                        command: DISCOVER.to_string(),
                        status: "exit status: 1".to_string(),
                        stderr: "boom".to_string(),
                    }),
                )
                .capture_result(DISCOVER, Ok("[]".to_string()));
            let mut h = harness(task(&dir), fast_options(), commands, MockAgent::new(&[]));

            let summary = h.runner.run().await.unwrap();
            assert_eq!(summary.iterations, 2);
        }

        /// An agent that exits non-zero or fails to launch is retried after
        /// backoff; a later success resets the level.
        #[tokio::test]
        async fn agent_failures_back_off_then_reset() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[
                json!(["a"]),
                json!(["a"]),
                json!(["a"]),
                json!([]),
            ]);
            let agent = MockAgent::new(&[
                AgentReply::Exit(1),
                AgentReply::LaunchError,
                AgentReply::Ok("fixed"),
            ]);
            let options = RunnerOptions {
                limit: Some(3),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, agent);

            let summary = h.runner.run().await.unwrap();

            assert_eq!(summary.iterations, 3);
            assert_eq!(summary.outcomes, vec![("a".to_string(), Outcome::Fixed)]);
            assert_eq!(h.runner.backoff.level(), 0);
        }

        /// Each entry is closed even when the iteration errors after invoke.
        #[tokio::test]
        async fn audit_entry_closed_on_error() {
            let dir = TempDir::new().unwrap();
            let commands = MockCommands::new().discovery(&[json!(["a"])]);
            let agent = MockAgent::new(&[AgentReply::Exit(2)]);
            let options = RunnerOptions {
                limit: Some(1),
                ..fast_options()
            };
            let mut h = harness(task(&dir), options, commands, agent);

            h.runner.run().await.unwrap();

            let log = audit_log(&dir);
            assert!(log.contains("Prompt: Fix a (7)"));
            assert!(!log.contains("Outcome:"));
            assert!(log.trim_end().ends_with("=========="));
        }
    }

    // =========================================================================
    // Non-deterministic discovery
    // =========================================================================

    /// If discovery output changes between the selection and the recheck for
    /// reasons unrelated to the agent (e.g. a flaky linter), the candidate's
    /// absence is taken at face value and classified as fixed.
    #[tokio::test]
    async fn unrelated_discovery_change_counts_as_fixed() {
        let dir = TempDir::new().unwrap();
        let commands = MockCommands::new().discovery(&[json!(["a", "b"]), json!(["b", "c"])]);
        let options = RunnerOptions {
            limit: Some(1),
            ..fast_options()
        };
        let mut h = harness(task(&dir), options, commands, MockAgent::new(&[]));

        let summary = h.runner.run().await.unwrap();
        assert_eq!(summary.outcomes, vec![("a".to_string(), Outcome::Fixed)]);
    }
}
