//! The Embedding Extractor capability (spec §4.5).

use crate::audio::AudioFrame;
use crate::embedding::Embedding;
use crate::error::Result;
use async_trait::async_trait;

/// Maps a PCM slice to a fixed-dimension embedding.
///
/// Implementations that are not internally thread-safe must be wrapped by a
/// pool rather than shared behind a single mutex (spec §9) — see
/// `voxkey_pipeline::pool`.
#[async_trait]
pub trait EmbeddingExtractor: Send + Sync + 'static {
    async fn extract(&self, audio: &AudioFrame) -> Result<Embedding>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fakes {
    use super::*;

    /// Derives a deterministic vector from the input's energy distribution
    /// across fixed-size bins, so repeated utterances of the "same" synthetic
    /// digit by a fake ASR map to the same direction in embedding space.
    pub struct DeterministicExtractor {
        pub dim: usize,
    }

    impl DeterministicExtractor {
        pub fn new(dim: usize) -> Self {
            Self { dim }
        }
    }

    #[async_trait]
    impl EmbeddingExtractor for DeterministicExtractor {
        async fn extract(&self, audio: &AudioFrame) -> Result<Embedding> {
            let mut bins = vec![0.0f32; self.dim];
            if !audio.samples.is_empty() {
                let per_bin = (audio.samples.len() / self.dim).max(1);
                for (i, bin) in bins.iter_mut().enumerate() {
                    let start = i * per_bin;
                    let end = ((i + 1) * per_bin).min(audio.samples.len());
                    if start < end {
                        let energy: f32 =
                            audio.samples[start..end].iter().map(|s| s * s).sum();
                        *bin = energy + 1e-6;
                    } else {
                        *bin = 1e-6;
                    }
                }
            } else {
                bins.fill(1e-6);
            }
            Embedding::new(bins)
                .ok_or_else(|| crate::error::CoreError::Internal("zero-energy embedding".into()))
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn name(&self) -> &str {
            "deterministic-extractor-fake"
        }
    }
}
