//! Domain types and capability traits shared by every voxkey crate.
//!
//! This crate has no I/O: decoding, inference, and storage are all behind traits
//! implemented in `voxkey-pipeline` and `voxkey-persistence`. Keeping the contracts
//! here lets the session runtime in `voxkey-server` be generic over production
//! ONNX-backed implementations and deterministic test doubles alike.

pub mod audio;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod traits;

pub use audio::{AudioFrame, AudioBuffer, Channels, SampleRate};
pub use domain::{Digit, DigitCentroid, Gallery, Speaker, SpeakerId};
pub use embedding::{cosine_similarity, Embedding};
pub use error::{CoreError, Result};
