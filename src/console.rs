//! Colored console markers for user-visible progress.
//!
//! Every condition the loop reports gets a distinguishing marker: `✓` for
//! success, `✗` for errors, `!` for warnings (including sleeps), `·` for
//! progress.

use colored::Colorize;

pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

pub fn error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

pub fn warning(message: &str) {
    println!("{} {}", "!".yellow().bold(), message.yellow());
}

pub fn info(message: &str) {
    println!("{} {}", "·".cyan(), message.cyan());
}

/// Prints the startup summary.
pub fn startup_banner(task: &str, log_path: &str, mode: &str) {
    println!();
    println!("{} {}", "fixloop".bold(), task.bold().cyan());
    println!("  {:6} {}", "log".dimmed(), log_path);
    println!("  {:6} {}", "mode".dimmed(), mode);
    println!();
}

/// Prints the per-iteration header.
pub fn iteration_banner(iteration: u32, clock: &str) {
    println!();
    println!(
        "{}",
        format!("── Iteration {iteration} [{clock}] ──").bold().blue()
    );
}
