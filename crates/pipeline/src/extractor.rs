//! The Embedding Extractor (spec §4.5): ONNX-backed behind the `onnx`
//! feature, following the fixed-dimension speaker-embedding pattern
//! (WeSpeaker-style: raw waveform in, single embedding vector out,
//! L2-normalized post-inference).
//!
//! The production implementation does not wrap its `ort::Session` in a mutex
//! shared across the whole process — callers are expected to route through
//! `crate::pool` so each worker owns its own handle (spec §9).

use async_trait::async_trait;
use voxkey_core::traits::EmbeddingExtractor;
use voxkey_core::{AudioFrame, CoreError, Embedding, Result};

#[cfg(feature = "onnx")]
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
#[cfg(feature = "onnx")]
use std::path::Path;

pub const EMBEDDING_DIM: usize = 192;

#[cfg(feature = "onnx")]
pub struct OnnxEmbeddingExtractor {
    session: parking_lot::Mutex<Session>,
    dim: usize,
}

#[cfg(feature = "onnx")]
impl OnnxEmbeddingExtractor {
    pub fn new(model_path: impl AsRef<Path>) -> std::result::Result<Self, crate::error::PipelineError> {
        let session = Session::builder()
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;

        Ok(Self {
            session: parking_lot::Mutex::new(session),
            dim: EMBEDDING_DIM,
        })
    }
}

#[cfg(feature = "onnx")]
#[async_trait]
impl EmbeddingExtractor for OnnxEmbeddingExtractor {
    async fn extract(&self, audio: &AudioFrame) -> Result<Embedding> {
        let input = ndarray::Array2::from_shape_vec((1, audio.samples.len()), audio.samples.to_vec())
            .map_err(|e| CoreError::AsrFailed(e.to_string()))?;
        let input_tensor =
            Tensor::from_array(input).map_err(|e| CoreError::Internal(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs!["input" => input_tensor])
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let (_, data) = outputs
            .get("embedding")
            .ok_or_else(|| CoreError::Internal("missing embedding output tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        Embedding::new(data.to_vec())
            .ok_or_else(|| CoreError::Internal("zero-norm embedding from model".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "onnx-embedding-extractor"
    }
}
