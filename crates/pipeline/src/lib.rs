//! Concrete pipeline stage implementations (spec §4.1-4.7): decode, VAD gate,
//! digit ASR, segmentation, speaker embedding, prompt generation, and the
//! bounded worker pool that dispatches the CPU-bound stages.
//!
//! Every stage implements a `voxkey_core::traits` capability interface so the
//! session runtime in `voxkey-server` is generic over these implementations
//! and the deterministic test fakes in `voxkey_core::traits::fakes` alike.

pub mod asr;
pub mod decoder;
pub mod digits;
pub mod error;
pub mod extractor;
pub mod pool;
pub mod prompt;
pub mod segmenter;
pub mod vad;

pub use decoder::WavPcmDecoder;
pub use error::PipelineError;
pub use pool::{effective_pool_size, PooledAsr, PooledEmbeddingExtractor, PooledVad, WorkerPool};
pub use segmenter::{segment, SegmentConfig};
pub use vad::{EnergyVad, VadConfig};

#[cfg(feature = "onnx")]
pub use asr::OnnxCtcAsr;
#[cfg(feature = "onnx")]
pub use extractor::OnnxEmbeddingExtractor;
#[cfg(feature = "onnx")]
pub use vad::OnnxVad;
