//! Error taxonomy for a playback session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Bad path or unrecognised container.
    #[error("Failed to open {source_name}: {reason}")]
    Open { source_name: String, reason: String },
    #[error("No usable {0} stream")]
    NoStream(&'static str),
    #[error("Unsupported codec {codec} on stream {stream_index}")]
    UnsupportedCodec { stream_index: usize, codec: String },
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Resample failed: {0}")]
    Resample(String),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Audio output: {0}")]
    AudioOutput(String),
    #[error("Presenter: {0}")]
    Present(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to start {stage} thread: {reason}")]
    Spawn { stage: &'static str, reason: String },
}

impl PlaybackError {
    pub fn open(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Open {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error only ends the current audio buffer rather than the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Resample(_))
    }
}

/// Terminal result of a queue operation once shutdown has been requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue shut down")]
    Shutdown,
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;
