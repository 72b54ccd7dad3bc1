//! Pipeline-stage error type. Every variant here maps 1:1 onto a `CoreError`
//! taxonomy member at the trait boundary; `PipelineError` never crosses into
//! `voxkey-server` directly.

use thiserror::Error;
use voxkey_core::CoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("model load/inference failed: {0}")]
    Model(String),

    #[error("VAD failed: {0}")]
    Vad(String),

    #[error("ASR failed: {0}")]
    Asr(String),

    #[error("segmentation failed: {0}")]
    Segmentation(String),
}

impl From<PipelineError> for CoreError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Decode(msg) => CoreError::DecodeError(msg),
            PipelineError::InvalidAudio(msg) => CoreError::InvalidAudio(msg),
            PipelineError::Model(msg) => CoreError::AsrFailed(msg),
            PipelineError::Vad(msg) => CoreError::InvalidAudio(msg),
            PipelineError::Asr(msg) => CoreError::AsrFailed(msg),
            PipelineError::Segmentation(msg) => CoreError::SegmentationFailed(msg),
        }
    }
}
