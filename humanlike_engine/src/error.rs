use thiserror::Error;

use crate::history::ChannelId;

/// Failures surfaced by the engine.
///
/// None of these are fatal to the process: a failed turn degrades to "no
/// reply was produced" and is logged by whoever drove the turn.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The model backend answered with a non-success status.
    #[error("LLM API returned error {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection failure, timeout or body read error talking to the model backend.
    #[error("LLM transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A single stream frame that could not be decoded. Callers skip these.
    #[error("malformed stream frame: {reason} (frame: {frame})")]
    Parse { frame: String, reason: String },

    /// The model replied but the payload carried no usable content.
    #[error("LLM response carried no content")]
    EmptyResponse,

    /// The outbound chat transport refused or failed to deliver a message.
    #[error("failed to send to channel {channel}: {reason}")]
    Send { channel: ChannelId, reason: String },

    /// The feature is switched off or otherwise not configured to run.
    #[error("configuration: {0}")]
    Configuration(String),

    /// Generation was requested for a channel with nothing recorded yet.
    #[error("no history recorded for channel {0}")]
    NoHistory(ChannelId),
}

impl EngineError {
    /// True for failures talking to the model backend or the outbound channel.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EngineError::Status { .. } | EngineError::Transport(_) | EngineError::Send { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
