//! Streaming response segmentation.
//!
//! A model reply arrives as a stream of text deltas. People in a group chat
//! send several short messages instead of one long block, so the reply is cut
//! into utterances at two delimiters: the explicit break marker the model is
//! prompted to use, and blank lines. Long stretches without either are flushed
//! once they pass a size threshold.
//!
//! Where the deltas happen to be cut is invisible to the consumer: a delimiter
//! split across two deltas is recognised exactly as if it had arrived whole.

use futures_util::StreamExt;
use std::collections::VecDeque;

use crate::config::SegmenterConfig;
use crate::error::Result;
use crate::llm_client::{DeltaStream, StreamEvent};

const PARAGRAPH_BREAK: &str = "\n\n";

/// One outbound chat message worth of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    /// Last utterance of the turn.
    pub is_final: bool,
}

/// Incremental splitter over a growing text buffer.
#[derive(Debug, Clone)]
pub struct Segmenter {
    marker: String,
    flush_threshold: usize,
    buffer: String,
}

impl Segmenter {
    pub fn new(marker: impl Into<String>, flush_threshold: usize) -> Self {
        Self {
            marker: marker.into(),
            flush_threshold,
            buffer: String::new(),
        }
    }

    pub fn from_config(config: &SegmenterConfig) -> Self {
        Self::new(config.marker.clone(), config.flush_threshold)
    }

    /// Text received but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Feed one delta, returning every utterance it completed, in order.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.buffer.push_str(delta);

        while let Some((pos, len)) = self.next_delimiter() {
            let piece = self.buffer[..pos].trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            // the remainder stays untrimmed: a trailing "\n" may be half of a break
            self.buffer.drain(..pos + len);
        }

        if self.should_flush() {
            let piece = self.buffer.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            self.buffer.clear();
        }

        out
    }

    /// End of stream: whatever is left becomes the last utterance.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        self.buffer.clear();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Leftmost delimiter in the buffer as `(byte offset, byte length)`.
    fn next_delimiter(&self) -> Option<(usize, usize)> {
        let marker = if self.marker.is_empty() {
            None
        } else {
            self.buffer
                .find(self.marker.as_str())
                .map(|pos| (pos, self.marker.len()))
        };
        let paragraph = self
            .buffer
            .find(PARAGRAPH_BREAK)
            .map(|pos| (pos, PARAGRAPH_BREAK.len()));

        match (marker, paragraph) {
            (Some(m), Some(p)) => Some(if p.0 < m.0 { p } else { m }),
            (m, p) => m.or(p),
        }
    }

    fn should_flush(&self) -> bool {
        self.buffer.chars().count() > self.flush_threshold
            && !self.buffer.ends_with('\n')
            && !ends_with_partial(&self.buffer, &self.marker)
    }
}

/// `text` ends with a non-empty proper prefix of `marker`.
fn ends_with_partial(text: &str, marker: &str) -> bool {
    marker
        .char_indices()
        .skip(1)
        .any(|(boundary, _)| text.ends_with(&marker[..boundary]))
}

enum Phase {
    Streaming,
    Draining,
    Closed,
}

/// Lazily pulls deltas from the model and yields finished utterances.
///
/// One utterance is held back so the last one of the turn can be flagged
/// `is_final` even when the stream ends right after a delimiter. A split
/// piece is therefore only released once the next delimiter or the end of
/// the stream arrives, not the moment it is cut.
pub struct UtteranceStream {
    deltas: DeltaStream,
    segmenter: Segmenter,
    ready: VecDeque<String>,
    phase: Phase,
}

impl UtteranceStream {
    pub fn new(deltas: DeltaStream, config: &SegmenterConfig) -> Self {
        Self {
            deltas,
            segmenter: Segmenter::from_config(config),
            ready: VecDeque::new(),
            phase: Phase::Streaming,
        }
    }

    /// Next utterance, `None` once the turn is over. After an error nothing
    /// further is produced.
    pub async fn next(&mut self) -> Option<Result<Utterance>> {
        loop {
            match self.phase {
                Phase::Closed => return None,
                Phase::Draining => {
                    let text = self.ready.pop_front()?;
                    let is_final = self.ready.is_empty();
                    if is_final {
                        self.phase = Phase::Closed;
                    }
                    return Some(Ok(Utterance { text, is_final }));
                }
                Phase::Streaming => {
                    if self.ready.len() >= 2 {
                        if let Some(text) = self.ready.pop_front() {
                            return Some(Ok(Utterance {
                                text,
                                is_final: false,
                            }));
                        }
                    }

                    match self.deltas.next().await {
                        Some(Ok(StreamEvent::Delta(delta))) => {
                            let completed = self.segmenter.push(&delta);
                            self.ready.extend(completed);
                        }
                        Some(Ok(StreamEvent::Done)) | None => {
                            if let Some(rest) = self.segmenter.finish() {
                                self.ready.push_back(rest);
                            }
                            self.phase = Phase::Draining;
                        }
                        Some(Err(e)) => {
                            self.ready.clear();
                            self.phase = Phase::Closed;
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }

    /// Drain the whole turn, stopping at the first error.
    pub async fn collect(mut self) -> Result<Vec<Utterance>> {
        let mut utterances = Vec::new();
        while let Some(item) = self.next().await {
            utterances.push(item?);
        }
        Ok(utterances)
    }
}
