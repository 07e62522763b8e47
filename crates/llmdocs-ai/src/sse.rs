//! Parsing of OpenAI chat-completion server-sent events.
//!
//! Each event line looks like `data: {json}` or `data: [DONE]`. Lines with any
//! other prefix are ignored, and `data:` payloads that fail to decode are
//! dropped without error since they are usually a record cut at a read
//! boundary.

use serde::Deserialize;
use tracing::trace;

use crate::error::{parse_api_error, LlmError};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Stateless parse of one body chunk, splitting on newlines only within the
/// chunk. A record whose line crosses a chunk boundary is lost; use
/// [`SseChunkParser`] to keep partial lines between reads.
pub fn parse_chunk(chunk: &[u8]) -> Result<Vec<SseEvent>, LlmError> {
    if let Some(error) = parse_api_error(chunk) {
        return Err(error);
    }
    let text = String::from_utf8_lossy(chunk);
    let mut events = Vec::new();
    for line in text.split('\n') {
        if parse_line(line, &mut events) {
            break;
        }
    }
    Ok(events)
}

/// Incremental parser that buffers an unterminated trailing line until the
/// next chunk completes it.
#[derive(Debug, Default)]
pub struct SseChunkParser {
    pending: Vec<u8>,
    done: bool,
}

impl SseChunkParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds one chunk of the response body.
    ///
    /// Fails when the chunk (together with any buffered partial line) is a
    /// complete `{error: ...}` JSON document, which some servers send with a
    /// 200 status instead of an event stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, LlmError> {
        if self.done {
            return Ok(Vec::new());
        }
        self.pending.extend_from_slice(chunk);
        if let Some(error) = parse_api_error(&self.pending) {
            self.pending.clear();
            return Err(error);
        }

        let mut events = Vec::new();
        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Ok(events);
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        let text = String::from_utf8_lossy(&complete);
        for line in text.split('\n') {
            if parse_line(line, &mut events) {
                self.done = true;
                self.pending.clear();
                break;
            }
        }
        Ok(events)
    }

    /// Flushes a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done || self.pending.is_empty() {
            return events;
        }
        let rest = std::mem::take(&mut self.pending);
        if parse_line(&String::from_utf8_lossy(&rest), &mut events) {
            self.done = true;
        }
        events
    }
}

/// Returns `true` when the line is the terminal sentinel.
fn parse_line(line: &str, events: &mut Vec<SseEvent>) -> bool {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return false;
    };
    if data == DONE_SENTINEL {
        events.push(SseEvent::Done);
        return true;
    }
    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => {
            if let Some(content) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content)
                .filter(|content| !content.is_empty())
            {
                events.push(SseEvent::Delta(content));
            }
        }
        Err(error) => trace!("discarding undecodable sse line: {error}"),
    }
    false
}
