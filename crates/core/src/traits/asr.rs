//! The ASR Engine capability (spec §4.3).

use crate::audio::AudioFrame;
use crate::error::Result;
use async_trait::async_trait;

/// One recognized token with its time bounds, in seconds, within the input.
#[derive(Debug, Clone, PartialEq)]
pub struct AsrToken {
    pub text: String,
    pub start_seconds: f32,
    pub end_seconds: f32,
}

/// The transcription result: decoded text plus per-token timestamps.
///
/// `tokens` is ordered with non-decreasing `start_seconds`, and each token has
/// `start_seconds <= end_seconds` (spec §4.3).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AsrResult {
    pub text: String,
    pub tokens: Vec<AsrToken>,
}

/// Transcribes PCM audio, invoked after the VAD gate has confirmed speech.
#[async_trait]
pub trait Asr: Send + Sync + 'static {
    async fn transcribe(&self, audio: &AudioFrame) -> Result<AsrResult>;

    fn name(&self) -> &str;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fakes {
    use super::*;

    /// Echoes a planted digit string as evenly-spaced tokens, one per
    /// character — the "ASR that echoes a planted string" named in spec §9.
    pub struct PlantedAsr {
        pub text: String,
    }

    impl PlantedAsr {
        pub fn new(text: impl Into<String>) -> Self {
            Self { text: text.into() }
        }
    }

    #[async_trait]
    impl Asr for PlantedAsr {
        async fn transcribe(&self, _audio: &AudioFrame) -> Result<AsrResult> {
            let chars: Vec<char> = self.text.chars().collect();
            let step = 0.3f32;
            let tokens = chars
                .iter()
                .enumerate()
                .map(|(i, c)| AsrToken {
                    text: c.to_string(),
                    start_seconds: i as f32 * step,
                    end_seconds: i as f32 * step + step * 0.8,
                })
                .collect();
            Ok(AsrResult {
                text: self.text.clone(),
                tokens,
            })
        }

        fn name(&self) -> &str {
            "planted-asr-fake"
        }
    }
}
