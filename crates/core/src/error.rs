//! The error taxonomy shared by every layer of the pipeline and session runtime.
//!
//! Variant names match the wire-level `code` field the server reports to clients
//! (see `voxkey-server::protocol`). Lower layers only ever construct the variants
//! that belong to their stage; the server is the only place that turns a `CoreError`
//! into a `{code, message}` response, and it never forwards a `Display` string for
//! `Internal` to the client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("audio container could not be decoded: {0}")]
    DecodeError(String),

    #[error("audio rejected: {0}")]
    InvalidAudio(String),

    #[error("ASR engine failed: {0}")]
    AsrFailed(String),

    #[error("segmentation failed: {0}")]
    SegmentationFailed(String),

    #[error("speaker not found: {0}")]
    SpeakerNotFound(String),

    #[error("speaker already exists: {0}")]
    SpeakerAlreadyExists(String),

    #[error("PIN not set for speaker")]
    PinNotSet,

    #[error("maximum retries exceeded")]
    MaxRetriesExceeded,

    #[error("session timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stable machine-readable code reported to clients (spec §7).
    pub fn code(&self) -> &'static str {
        match self {
            Self::DecodeError(_) => "DECODE_ERROR",
            Self::InvalidAudio(_) => "INVALID_AUDIO",
            Self::AsrFailed(_) => "ASR_FAILED",
            Self::SegmentationFailed(_) => "SEGMENTATION_FAILED",
            Self::SpeakerNotFound(_) => "SPEAKER_NOT_FOUND",
            Self::SpeakerAlreadyExists(_) => "SPEAKER_ALREADY_EXISTS",
            Self::PinNotSet => "PIN_NOT_SET",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::Timeout => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is recoverable as a retry within an enrollment set
    /// (spec §7: decode/VAD/ASR/segmentation errors count as a retry).
    pub fn is_retryable_in_enrollment(&self) -> bool {
        matches!(
            self,
            Self::DecodeError(_)
                | Self::InvalidAudio(_)
                | Self::AsrFailed(_)
                | Self::SegmentationFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
