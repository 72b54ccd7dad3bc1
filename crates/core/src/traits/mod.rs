//! Capability interfaces for the audio pipeline and the gallery store.
//!
//! Re-architected from the source's duck-typed collaborators (spec §9) into
//! explicit `async_trait` interfaces. Production wiring in `voxkey-server::state`
//! supplies ONNX-backed implementations from `voxkey-pipeline`/`voxkey-persistence`;
//! tests supply deterministic fakes defined alongside each trait.

mod asr;
mod decoder;
mod extractor;
mod gallery;
mod vad;

pub use asr::{Asr, AsrResult, AsrToken};
pub use decoder::AudioDecoder;
pub use extractor::EmbeddingExtractor;
pub use gallery::GalleryStore;
pub use vad::{Vad, VadResult};

#[cfg(any(test, feature = "test-support"))]
pub mod fakes {
    pub use super::asr::fakes::PlantedAsr;
    pub use super::decoder::fakes::RawPcmDecoder;
    pub use super::extractor::fakes::DeterministicExtractor;
    pub use super::gallery::fakes::InMemoryGalleryStore;
    pub use super::vad::fakes::AlwaysSpeechVad;
}
