//! Process signal handling.
//!
//! SIGQUIT requests a graceful stop after the current iteration. SIGINT and
//! SIGTERM send SIGTERM to the running agent's process group; the caller then
//! exits with status 1.

use anyhow::{Context, Result};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;
use tracing::info;

use crate::console;
use crate::core::ProcessSlot;

/// Installed signal streams.
///
/// Installation is synchronous so that the handlers are in place before the
/// first agent is spawned.
pub struct SignalHandler {
    quit: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl SignalHandler {
    /// Registers SIGQUIT, SIGINT and SIGTERM listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler cannot be registered.
    pub fn install() -> Result<Self> {
        Ok(Self {
            quit: signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?,
            interrupt: signal(SignalKind::interrupt())
                .context("failed to install SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("failed to install SIGTERM handler")?,
        })
    }

    /// Handles signals until SIGINT or SIGTERM arrives.
    ///
    /// Each SIGQUIT sets the shutdown flag. On SIGINT or SIGTERM the agent's
    /// process group is terminated and the function returns.
    pub async fn run(mut self, slot: &ProcessSlot, shutdown_tx: &watch::Sender<bool>) {
        loop {
            tokio::select! {
                _ = self.quit.recv() => {
                    console::warning("Graceful stop requested; finishing current iteration...");
                    info!("graceful stop requested");
                    let _ = shutdown_tx.send(true);
                }
                _ = self.interrupt.recv() => break,
                _ = self.terminate.recv() => break,
            }
        }

        console::warning("Interrupted, stopping agent...");
        let stopped = slot.terminate();
        info!(agent_running = stopped, "interrupted");
    }
}
