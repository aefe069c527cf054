//! Decoder for the agent's newline-delimited JSON event stream.
//!
//! The agent is run with `--output-format stream-json`, producing lines like:
//!
//! ```text
//! {"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}}
//! {"type":"stream_event","event":{"type":"message_stop"}}
//! {"type":"result","result":"..."}
//! ```
//!
//! [`StreamDecoder`] turns those lines into text chunks. It does no I/O; the
//! executor forwards the chunks to the console channel and the audit log.

use serde_json::Value;

/// What to do with one decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Assistant text: stream it to the console and write it to the log.
    Text(String),
    /// A line that was not JSON: write it to the log as its own line.
    Passthrough(String),
}

/// Stateful line decoder that also accumulates the full response text.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    has_content: bool,
    output: String,
}

impl StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one line of agent stdout.
    ///
    /// Text deltas are appended verbatim. A `message_stop` appends a newline
    /// only if the message produced text. `result` events and unknown JSON are
    /// consumed silently.
    pub fn process_line(&mut self, line: &str) -> Option<StreamChunk> {
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            self.output.push_str(line);
            self.output.push('\n');
            return Some(StreamChunk::Passthrough(line.to_string()));
        };

        if event.get("type").and_then(Value::as_str) != Some("stream_event") {
            return None;
        }
        let inner = event.get("event")?;

        match inner.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => {
                let delta = inner.get("delta")?;
                if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
                    return None;
                }
                let text = delta.get("text").and_then(Value::as_str)?;
                if text.is_empty() {
                    return None;
                }
                self.has_content = true;
                self.output.push_str(text);
                Some(StreamChunk::Text(text.to_string()))
            }
            Some("message_stop") => {
                let had_content = std::mem::take(&mut self.has_content);
                if had_content {
                    self.output.push('\n');
                    Some(StreamChunk::Text("\n".to_string()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Ends the stream, appending captured stderr to the accumulated text.
    #[must_use]
    pub fn finish(mut self, stderr: &str) -> String {
        self.output.push_str(stderr);
        self.output
    }
}
