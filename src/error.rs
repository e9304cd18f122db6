//! Per-request error type for the classification pipeline.
//!
//! Startup and checkpoint loading use `anyhow`; everything a single request
//! can fail with is a [`ClassifyError`] so the service can report a stable
//! error kind to the caller.

use std::any::Any;
use thiserror::Error;

/// Errors that can occur while classifying one audio payload.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// `audio_data` is not valid base64
    #[error("audio_data is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Decoded bytes are not a recognized or parseable audio container
    #[error("unsupported or unreadable audio: {0}")]
    AudioFormat(String),

    /// Decoding produced no samples
    #[error("audio contains no samples")]
    EmptyAudio,

    /// The class list is too short to produce a top-k ranking
    #[error("cannot rank top {required} predictions with only {available} classes")]
    InsufficientClasses { required: usize, available: usize },

    /// Resampling, tensor readback or a logit/class count mismatch
    #[error("internal inference error: {0}")]
    Internal(String),
}

impl ClassifyError {
    /// Stable error kind reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::Decode(_) => "DecodeError",
            ClassifyError::AudioFormat(_) => "AudioFormatError",
            ClassifyError::EmptyAudio => "EmptyAudioError",
            ClassifyError::InsufficientClasses { .. } => "InsufficientClassesError",
            ClassifyError::Internal(_) => "InternalError",
        }
    }

    /// Whether the failure was caused by the request payload itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ClassifyError::Decode(_) | ClassifyError::AudioFormat(_) | ClassifyError::EmptyAudio
        )
    }
}

/// Result type for pipeline operations.
pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
