//! The Audio Decoder capability (spec §4.1).

use crate::audio::AudioFrame;
use crate::error::Result;
use async_trait::async_trait;

/// Decodes an opaque compressed-audio blob into mono 16 kHz PCM.
///
/// Implementations must be pure: no filesystem side effects beyond scratch
/// memory, and no references retained to `bytes` after `decode` returns.
#[async_trait]
pub trait AudioDecoder: Send + Sync + 'static {
    /// Decode `bytes` into a mono, 16 kHz `AudioFrame`.
    ///
    /// Fails with `CoreError::DecodeError` on malformed containers, unsupported
    /// codecs, or empty input. Duration-limit rejection (spec §4.1: 1.0s–10.0s)
    /// happens after decoding, in the caller, so the decoder itself never needs
    /// to anticipate the duration to reject it.
    async fn decode(&self, bytes: &[u8]) -> Result<AudioFrame>;

    fn name(&self) -> &str;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fakes {
    use super::*;
    use crate::audio::{Channels, SampleRate};

    /// A decoder that treats its input as raw little-endian f32 PCM already at
    /// 16 kHz mono — useful for driving pipeline tests without a real codec.
    pub struct RawPcmDecoder;

    #[async_trait]
    impl AudioDecoder for RawPcmDecoder {
        async fn decode(&self, bytes: &[u8]) -> Result<AudioFrame> {
            if bytes.is_empty() {
                return Err(crate::error::CoreError::DecodeError("empty input".into()));
            }
            if bytes.len() % 4 != 0 {
                return Err(crate::error::CoreError::DecodeError(
                    "not aligned to f32 samples".into(),
                ));
            }
            let samples: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Ok(AudioFrame::new(samples, SampleRate::Hz16000, Channels::Mono, 0))
        }

        fn name(&self) -> &str {
            "raw-pcm-fake"
        }
    }
}
