//! Candidate model: work items discovered by the candidate source command.
//!
//! The candidate source prints a JSON array. Each element becomes one
//! [`Candidate`], which may be a string, a list, or a map:
//!
//! ```text
//! ["a.go", "b.go"]
//! [["a.go", "line 10"], ["b.go", "line 20"]]
//! [{"file": "a.go", "line": 10}]
//! ```
//!
//! Elements are canonicalized (compact, object keys sorted) so that two runs
//! of the source that differ only in formatting or key order produce the same
//! identity key. The ignore list and the hash partition both depend on that.

use serde_json::{Map, Value};

use crate::core::error::{RunError, RunResult};
use crate::core::ignore::IgnoreSet;

/// One unit of work discovered by the candidate source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    key: String,
    data: Value,
}

impl Candidate {
    /// Builds a candidate from a single JSON element.
    ///
    /// Strings use their unquoted value as the key; everything else uses the
    /// canonical compact JSON text.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let data = canonicalize(value);
        let key = match &data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self { key, data }
    }

    /// Identity key used for the ignore list, hashing and `$CANDIDATE`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Canonicalized JSON value of this candidate.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    #[must_use]
    pub fn is_string(&self) -> bool {
        self.data.is_string()
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.data.is_array()
    }

    #[must_use]
    pub fn is_map(&self) -> bool {
        self.data.is_object()
    }

    /// Returns the element at `index` of a list candidate.
    ///
    /// String elements are unquoted; other elements are re-serialized as JSON.
    /// Returns `None` for non-list candidates or out-of-range indices.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<String> {
        self.data.as_array()?.get(index).map(value_text)
    }

    /// Returns the elements from `start` to the end as a compact JSON array.
    ///
    /// An out-of-range `start` yields `Some("[]")`; non-list candidates yield
    /// `None`.
    #[must_use]
    pub fn get_slice(&self, start: usize) -> Option<String> {
        let items = self.data.as_array()?;
        let tail = items.get(start..).unwrap_or_default();
        Some(Value::Array(tail.to_vec()).to_string())
    }

    /// Returns the value of `field` in a map candidate.
    #[must_use]
    pub fn get_field(&self, field: &str) -> Option<String> {
        self.data.as_object()?.get(field).map(value_text)
    }

    /// Renders the whole candidate for prompt substitution.
    ///
    /// Strings are unquoted and single-element lists are unwrapped. Other
    /// lists and maps use a spaced JSON rendering such as `["a", "b"]`.
    #[must_use]
    pub fn display_string(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            Value::Array(items) if items.len() == 1 => value_text(&items[0]),
            other => {
                let mut out = String::new();
                write_display(other, &mut out);
                out
            }
        }
    }
}

/// Partition predicate used to split one candidate stream between two runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashFilter {
    /// Keep every candidate.
    #[default]
    None,
    /// Keep candidates whose key hashes to an even MD5 digest.
    Evens,
    /// Keep candidates whose key hashes to an odd MD5 digest.
    Odds,
}

impl HashFilter {
    /// Returns true if a candidate with this key belongs to the partition.
    #[must_use]
    pub fn matches(self, key: &str) -> bool {
        match self {
            Self::None => true,
            Self::Evens => !has_odd_digest(key),
            Self::Odds => has_odd_digest(key),
        }
    }
}

/// Parity of the 128-bit MD5 digest, read as a big-endian integer.
fn has_odd_digest(key: &str) -> bool {
    let digest = md5::compute(key.as_bytes());
    digest.0[15] & 1 == 1
}

/// Parses candidate source output into candidates.
///
/// # Errors
///
/// Returns [`RunError::MalformedCandidateSource`] if the output is not valid
/// JSON or the top-level value is not an array.
pub fn parse_candidates(output: &str) -> RunResult<Vec<Candidate>> {
    let value: Value = serde_json::from_str(output)
        .map_err(|e| RunError::MalformedCandidateSource(format!("invalid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(RunError::MalformedCandidateSource(format!(
            "expected a JSON array, got {}",
            json_type_name(&value)
        )));
    };

    Ok(items.into_iter().map(Candidate::from_value).collect())
}

/// Keeps only the candidates in the requested hash partition.
#[must_use]
pub fn filter_by_hash(candidates: Vec<Candidate>, filter: HashFilter) -> Vec<Candidate> {
    if filter == HashFilter::None {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| filter.matches(c.key()))
        .collect()
}

/// Returns the first candidate (in source order) that is not ignored.
#[must_use]
pub fn select_candidate<'a>(
    candidates: &'a [Candidate],
    ignored: &IgnoreSet,
) -> Option<&'a Candidate> {
    candidates.iter().find(|c| !ignored.contains(c.key()))
}

/// Returns true if any candidate has the given identity key.
#[must_use]
pub fn contains_key(candidates: &[Candidate], key: &str) -> bool {
    candidates.iter().any(|c| c.key() == key)
}

/// Counts how many candidates are already in the ignore set.
#[must_use]
pub fn count_ignored(candidates: &[Candidate], ignored: &IgnoreSet) -> usize {
    candidates
        .iter()
        .filter(|c| ignored.contains(c.key()))
        .count()
}

/// Rebuilds a value with every object's keys in lexicographic order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        scalar => scalar,
    }
}

/// Unquotes strings; serializes everything else as compact JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_display(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_display(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Value::from(k.as_str()).to_string());
                out.push_str(": ");
                write_display(v, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
