//! Persistent set of candidate keys that were already processed.
//!
//! Backed by an append-only text file with one key per line. Lines are only
//! ever appended, so concurrent runners on disjoint hash partitions never
//! rewrite each other's entries.
//!
//! Keys that would not survive a line round trip (empty, line breaks,
//! surrounding whitespace, or a leading `"`) are stored as JSON string
//! literals. Every other key is stored verbatim.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::error::{RunError, RunResult};

/// File name of the ignore list inside a task directory.
pub const IGNORE_FILE: &str = "ignored.log";

/// Keys already attempted in a task, loaded from and appended to disk.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    path: PathBuf,
    entries: HashSet<String>,
}

impl IgnoreSet {
    /// Loads the ignore list at `path`.
    ///
    /// A missing file yields an empty set; blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(path: &Path) -> RunResult<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(decode_line)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                return Err(RunError::io(
                    format!("failed to read ignore list {}", path.display()),
                    e,
                ));
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Adds keys computed at startup (e.g. by an `ignore_list` command).
    ///
    /// Seeded keys live in memory only; they are not written to the file.
    pub fn seed<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if !key.trim().is_empty() {
                self.entries.insert(key);
            }
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Records `key` as processed.
    ///
    /// The key is appended and flushed to the backing file before it becomes
    /// visible in memory. Adding a key that is already present is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written; the key is
    /// then not recorded.
    pub fn add(&mut self, key: &str) -> RunResult<()> {
        if self.entries.contains(key) {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RunError::io("failed to open ignore list for writing", e))?;
        writeln!(file, "{}", encode_key(key))
            .and_then(|()| file.sync_data())
            .map_err(|e| RunError::io("failed to write to ignore list", e))?;

        self.entries.insert(key.to_string());
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn needs_escape(key: &str) -> bool {
    key.is_empty() || key.starts_with('"') || key.trim() != key || key.contains(['\n', '\r'])
}

fn encode_key(key: &str) -> Cow<'_, str> {
    if !needs_escape(key) {
        return Cow::Borrowed(key);
    }
    serde_json::to_string(key).map_or(Cow::Borrowed(key), Cow::Owned)
}

fn decode_line(line: &str) -> String {
    if line.starts_with('"')
        && let Ok(key) = serde_json::from_str::<String>(line)
    {
        return key;
    }
    line.to_string()
}
