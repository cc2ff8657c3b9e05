//! Server-sent-event decoding for OpenAI-style streaming completions.

use futures_util::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;

use super::{DeltaStream, StreamEvent};
use crate::error::{EngineError, Result};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Longest line accepted from the backend before the stream is abandoned.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Splits a byte stream into lines. Bytes are only decoded once a full
/// line is available, so multi-byte characters may straddle chunks.
#[derive(Debug)]
pub struct LineDecoder {
    pending: Vec<u8>,
    max_line_bytes: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes,
        }
    }

    /// Complete lines found so far. Fails once an unterminated line grows
    /// past the limit.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }

        if self.pending.len() > self.max_line_bytes {
            let preview = String::from_utf8_lossy(&self.pending[..64.min(self.pending.len())]).into_owned();
            self.pending.clear();
            return Err(EngineError::Parse {
                frame: preview,
                reason: format!("line exceeds {} bytes without a newline", self.max_line_bytes),
            });
        }
        Ok(lines)
    }

    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Decode one SSE line into stream events.
///
/// Returns `None` for lines that carry nothing (blank lines, comments,
/// non-data fields) and `Some(Err(..))` for a data frame that can't be read.
pub fn parse_line(raw: &[u8]) -> Option<Result<Vec<StreamEvent>>> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => {
            return Some(Err(EngineError::Parse {
                frame: String::from_utf8_lossy(raw).into_owned(),
                reason: e.to_string(),
            }))
        }
    };

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = if let Some(data) = line.strip_prefix("data:") {
        data.trim()
    } else if line.starts_with('{') {
        // some local servers drop the `data:` prefix
        line
    } else {
        return None;
    };

    if payload == DONE_SENTINEL {
        return Some(Ok(vec![StreamEvent::Done]));
    }

    let chunk: ChunkResponse = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            return Some(Err(EngineError::Parse {
                frame: payload.to_string(),
                reason: e.to_string(),
            }))
        }
    };

    let mut events = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::Delta(content));
        }
        if choice
            .finish_reason
            .map(|reason| !reason.is_empty())
            .unwrap_or(false)
        {
            events.push(StreamEvent::Done);
        }
    }
    Some(Ok(events))
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    lines: LineDecoder,
    queued: VecDeque<StreamEvent>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, line: &[u8]) {
        match parse_line(line) {
            Some(Ok(events)) => {
                for event in events {
                    let done = event == StreamEvent::Done;
                    self.queued.push_back(event);
                    if done {
                        self.finished = true;
                        return;
                    }
                }
            }
            Some(Err(e)) => tracing::warn!("Skipping stream frame: {}", e),
            None => {}
        }
    }

    fn enqueue_all(&mut self, lines: Vec<Vec<u8>>) {
        for line in lines {
            if self.finished {
                break;
            }
            self.enqueue(&line);
        }
    }
}

/// Turn a raw response body into content deltas.
///
/// Malformed frames are logged and skipped. A body error ends the stream
/// with that error. Nothing is read past the terminal frame.
pub fn decode_event_stream<S, B, E>(bytes: S) -> DeltaStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<EngineError> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        lines: LineDecoder::default(),
        queued: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queued.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.lines.push(chunk.as_ref()) {
                    Ok(lines) => state.enqueue_all(lines),
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    if let Some(rest) = state.lines.finish() {
                        state.enqueue(&rest);
                    }
                    state.finished = true;
                }
            }
        }
    }))
}
