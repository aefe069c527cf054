//! External process execution.
//!
//! Two seams are exposed as traits so the state machine can be driven by test
//! doubles:
//!
//! - [`CommandRunner`] runs opaque shell commands (discovery, verify, reset,
//!   success) via `bash -c` in the project directory.
//! - [`AgentExecutor`] invokes the AI agent with a prompt, streams its text
//!   output, and enforces a per-candidate timeout.
//!
//! The agent runs in its own process group. The group id is published in a
//! [`ProcessSlot`] so an interrupt handler can kill the agent and everything
//! it spawned.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::error::{RunError, RunResult};
use crate::core::stream::{StreamChunk, StreamDecoder};
use crate::fs::AuditLog;

/// Longest single line accepted from the agent's stdout.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Flags that make the agent emit the newline-delimited JSON event stream.
pub const STREAM_FLAGS: &str =
    "--print --output-format stream-json --include-partial-messages --verbose";

/// Heredoc delimiter wrapping the prompt.
const PROMPT_DELIMITER: &str = "__FIXLOOP_PROMPT_EOF__";

/// How long to wait for the stream reader after the agent process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// What to do with a plain command's stdout and stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Inherit the console.
    Show,
    /// Discard both streams.
    Silent,
    /// Buffer both streams and print them only if the command fails.
    ShowOnFailure,
}

/// Runs opaque shell commands in the project directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` and reports whether it exited with status 0.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::CommandExecution`] if the command could not be
    /// launched. A non-zero exit is `Ok(false)`, not an error.
    async fn run(&self, command: &str, mode: OutputMode) -> RunResult<bool>;

    /// Runs `command` and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::CommandFailed`] (with captured stderr) on a non-zero
    /// exit, or [`RunError::CommandExecution`] if it could not be launched.
    async fn capture(&self, command: &str) -> RunResult<String>;

    /// Reports whether the working tree has staged, unstaged or untracked
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns an error if git could not be launched.
    async fn has_uncommitted_changes(&self) -> RunResult<bool>;
}

/// [`CommandRunner`] backed by `bash -c`.
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    work_dir: PathBuf,
}

impl ShellCommandRunner {
    #[must_use]
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
        }
    }

    fn bash(&self, command: &str) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null());
        cmd
    }

    fn git(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null());
        cmd
    }
}

fn execution_error(command: &str, source: std::io::Error) -> RunError {
    RunError::CommandExecution {
        command: command.to_string(),
        source,
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str, mode: OutputMode) -> RunResult<bool> {
        debug!(command, ?mode, "running command");
        let mut cmd = self.bash(command);

        match mode {
            OutputMode::Show => {
                let status = cmd.status().await.map_err(|e| execution_error(command, e))?;
                Ok(status.success())
            }
            OutputMode::Silent => {
                let status = cmd
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map_err(|e| execution_error(command, e))?;
                Ok(status.success())
            }
            OutputMode::ShowOnFailure => {
                let output = cmd.output().await.map_err(|e| execution_error(command, e))?;
                if !output.status.success() {
                    use std::io::Write;
                    let _ = std::io::stdout().write_all(&output.stdout);
                    let _ = std::io::stderr().write_all(&output.stderr);
                }
                Ok(output.status.success())
            }
        }
    }

    async fn capture(&self, command: &str) -> RunResult<String> {
        debug!(command, "capturing command output");
        let output = self
            .bash(command)
            .output()
            .await
            .map_err(|e| execution_error(command, e))?;

        if !output.status.success() {
            return Err(RunError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn has_uncommitted_changes(&self) -> RunResult<bool> {
        for args in [&["diff", "--quiet"][..], &["diff", "--quiet", "--cached"][..]] {
            let status = self
                .git(args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|e| execution_error("git diff", e))?;
            if !status.success() {
                return Ok(true);
            }
        }

        let output = self
            .git(&["status", "--porcelain"])
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| execution_error("git status", e))?;
        if !output.status.success() {
            return Err(RunError::CommandFailed {
                command: "git status --porcelain".to_string(),
                status: output.status.to_string(),
                stderr: String::new(),
            });
        }

        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

// =============================================================================
// Running process slot
// =============================================================================

/// Shared handle to the process group of the running agent, if any.
///
/// The agent executor is the only writer: it sets the slot right after spawn
/// and clears it once the process is confirmed stopped. The signal handler
/// only reads it to kill the group.
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot(Arc<Mutex<Option<u32>>>);

impl ProcessSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pid: u32) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(pid);
    }

    pub fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn current(&self) -> Option<u32> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends SIGTERM to the running process group. Returns `true` if a
    /// process was registered.
    pub fn terminate(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal_group(libc::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Sends SIGKILL to the running process group. Returns `true` if a
    /// process was registered.
    pub fn kill(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal_group(libc::SIGKILL)
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> bool {
        let Some(pid) = self.current() else {
            return false;
        };
        let Ok(pgid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: kill(2) with a negative pid signals the process group; it
        // has no memory-safety preconditions.
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == -1 {
            debug!(pid, signal, error = %std::io::Error::last_os_error(), "kill failed");
        }
        true
    }
}

// =============================================================================
// Agent executor
// =============================================================================

/// Result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// Accumulated response text followed by captured stderr.
    pub output: String,
    pub status: ExitStatus,
}

/// Invokes the AI agent for one prompt.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Runs the agent with `prompt`, streaming text chunks to `output_tx` and
    /// to `log` as they arrive.
    ///
    /// # Arguments
    ///
    /// * `prompt` - Rendered prompt text
    /// * `timeout` - Per-candidate deadline, `None` for no limit
    /// * `output_tx` - Receives text chunks for the console
    /// * `log` - Audit log that receives the raw streamed text
    ///
    /// # Errors
    ///
    /// Returns an error if the agent could not be launched or its output could
    /// not be read. Past the deadline the process group is killed and
    /// [`RunError::Timeout`] carries the partial output.
    async fn invoke(
        &self,
        prompt: &str,
        timeout: Option<Duration>,
        output_tx: mpsc::Sender<String>,
        log: Option<AuditLog>,
    ) -> RunResult<AgentRun>;

    /// Shell command used to start the agent, for display.
    fn command(&self) -> &str;
}

/// Builds the `bash -c` script for one agent invocation.
///
/// The prompt is passed through a quoted heredoc, so it reaches the agent
/// verbatim without any shell expansion.
#[must_use]
pub fn build_agent_script(agent_command: &str, flags: &str, prompt: &str) -> String {
    let flags = flags.trim();
    if flags.is_empty() {
        format!("{agent_command} {STREAM_FLAGS} -p <<'{PROMPT_DELIMITER}'\n{prompt}\n{PROMPT_DELIMITER}")
    } else {
        format!(
            "{agent_command} {STREAM_FLAGS} {flags} -p <<'{PROMPT_DELIMITER}'\n{prompt}\n{PROMPT_DELIMITER}"
        )
    }
}

/// [`AgentExecutor`] that runs a Claude-compatible CLI.
#[derive(Debug, Clone)]
pub struct StreamingAgent {
    command: String,
    flags: String,
    work_dir: PathBuf,
    slot: ProcessSlot,
}

impl StreamingAgent {
    /// Creates an agent executor.
    ///
    /// # Arguments
    ///
    /// * `command` - Agent binary or shell snippet, e.g. `claude`
    /// * `flags` - Extra flags appended after the streaming flags
    /// * `work_dir` - Project directory the agent runs in
    /// * `slot` - Published process group handle for interrupt handling
    #[must_use]
    pub fn new(command: &str, flags: &str, work_dir: &Path, slot: ProcessSlot) -> Self {
        Self {
            command: command.to_string(),
            flags: flags.to_string(),
            work_dir: work_dir.to_path_buf(),
            slot,
        }
    }
}

#[async_trait]
impl AgentExecutor for StreamingAgent {
    async fn invoke(
        &self,
        prompt: &str,
        timeout: Option<Duration>,
        output_tx: mpsc::Sender<String>,
        log: Option<AuditLog>,
    ) -> RunResult<AgentRun> {
        let script = build_agent_script(&self.command, &self.flags, prompt);
        debug!(command = %self.command, flags = %self.flags, ?timeout, "invoking agent");

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&script)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group: terminal signals go to us, not the agent, and a
        // timeout can kill the agent together with its children.
        #[cfg(unix)]
        cmd.process_group(0);

        // On Linux, take the agent down if we die without cleaning up.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| execution_error(&self.command, e))?;
        if let Some(pid) = child.id() {
            self.slot.set(pid);
        }

        let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            self.slot.clear();
            return Err(RunError::fatal("agent stdio was not captured"));
        };

        let decoder = Arc::new(Mutex::new(StreamDecoder::new()));
        let mut reader = tokio::spawn(read_agent_stream(
            stdout,
            Arc::clone(&decoder),
            output_tx,
            log,
        ));
        let mut stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let exited = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };
        let limit = timeout.unwrap_or_default();
        if exited.is_none() {
            warn!(timeout_secs = limit.as_secs(), "agent timed out, killing process group");
        }

        // Whatever the agent left running in its group goes down with it, so
        // nothing keeps touching the tree during verify and recheck.
        if !self.slot.kill() && exited.is_none() {
            let _ = child.start_kill();
        }
        if exited.is_none() {
            let _ = child.wait().await;
        }
        self.slot.clear();

        let (read_result, stderr_text) = tokio::join!(
            async {
                match tokio::time::timeout(DRAIN_GRACE, &mut reader).await {
                    Ok(joined) => joined.unwrap_or(Ok(())),
                    Err(_) => {
                        warn!("agent output still open after exit, abandoning reader");
                        reader.abort();
                        Ok(())
                    }
                }
            },
            async {
                match tokio::time::timeout(DRAIN_GRACE, &mut stderr_task).await {
                    Ok(joined) => joined.unwrap_or_default(),
                    Err(_) => {
                        stderr_task.abort();
                        String::new()
                    }
                }
            },
        );

        let decoder = std::mem::take(&mut *decoder.lock().unwrap_or_else(PoisonError::into_inner));
        let output = decoder.finish(&stderr_text);

        let Some(waited) = exited else {
            if let Err(e) = read_result {
                debug!(error = %e, "agent stream ended with an error after timeout");
            }
            return Err(RunError::Timeout { limit, output });
        };

        let status = waited.map_err(|e| execution_error(&self.command, e))?;
        read_result.map_err(|e| RunError::io("failed to read agent output", e))?;
        Ok(AgentRun { output, status })
    }

    fn command(&self) -> &str {
        &self.command
    }
}

/// Reads one line into `buf`, without the trailing newline.
///
/// Returns `Ok(false)` at end of stream. Lines longer than
/// [`MAX_LINE_BYTES`] are an error.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(false);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "agent output line exceeds 10 MiB",
        ));
    }
    Ok(true)
}

/// Decodes the agent's stdout, forwarding text to the console channel and the
/// audit log. Emits a final newline when the stream ends.
async fn read_agent_stream(
    stdout: ChildStdout,
    decoder: Arc<Mutex<StreamDecoder>>,
    output_tx: mpsc::Sender<String>,
    log: Option<AuditLog>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    let result = loop {
        match next_line(&mut reader, &mut buf).await {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            Err(e) => break Err(e),
        }

        let line = String::from_utf8_lossy(&buf);
        let chunk = decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .process_line(&line);

        match chunk {
            Some(StreamChunk::Text(text)) => {
                write_log(log.as_ref(), &text);
                let _ = output_tx.send(text).await;
            }
            Some(StreamChunk::Passthrough(raw)) => write_log(log.as_ref(), &format!("{raw}\n")),
            None => {}
        }
    };

    let _ = output_tx.send("\n".to_string()).await;
    write_log(log.as_ref(), "\n");
    result
}

fn write_log(log: Option<&AuditLog>, text: &str) {
    if let Some(log) = log
        && let Err(e) = log.write_raw(text)
    {
        warn!(error = %e, "failed to write audit log");
    }
}
