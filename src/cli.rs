//! CLI argument parsing using clap.

use std::time::Duration;

use clap::Parser;

use crate::core::HashFilter;
use crate::fs::parse_duration;

/// `fixloop` - find an issue, let an agent fix it, verify, commit or revert.
///
/// Tasks live in `fixloop/<task>/task.yaml` under the current directory.
#[derive(Parser, Debug)]
#[command(name = "fixloop", version, about, long_about = None)]
pub struct Args {
    /// Task to run
    #[arg(required_unless_present = "list")]
    pub task: Option<String>,

    /// List available tasks and exit
    #[arg(long)]
    pub list: bool,

    /// Stop after this many iterations
    #[arg(long, value_name = "N")]
    pub limit: Option<u32>,

    /// Stop starting new iterations after this long (e.g. 30m, 1h30m)
    #[arg(long, value_name = "DUR", value_parser = parse_duration)]
    pub time_limit: Option<Duration>,

    /// Print the first prompt without running the agent
    #[arg(long)]
    pub dry_run: bool,

    /// Print discovery output and recheck details
    #[arg(long, short)]
    pub verbose: bool,

    /// Only process candidates whose key hashes even
    #[arg(long, conflicts_with = "odds")]
    pub evens: bool,

    /// Only process candidates whose key hashes odd
    #[arg(long)]
    pub odds: bool,
}

impl Args {
    /// Hash partition selected by `--evens`/`--odds`.
    #[must_use]
    pub const fn hash_filter(&self) -> HashFilter {
        if self.evens {
            HashFilter::Evens
        } else if self.odds {
            HashFilter::Odds
        } else {
            HashFilter::None
        }
    }
}
