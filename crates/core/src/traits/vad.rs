//! The VAD Gate capability (spec §4.2).

use crate::audio::AudioFrame;
use async_trait::async_trait;

/// The verdict returned by a `Vad` implementation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    pub is_speech: bool,
    /// Sample-index bounds of detected speech within the input, if any.
    pub speech_range: Option<(usize, usize)>,
}

impl VadResult {
    pub fn silence() -> Self {
        Self {
            is_speech: false,
            speech_range: None,
        }
    }
}

/// Reports whether a PCM buffer contains speech, trimming leading/trailing
/// silence when it does.
#[async_trait]
pub trait Vad: Send + Sync + 'static {
    async fn detect(&self, audio: &AudioFrame) -> VadResult;

    fn name(&self) -> &str;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fakes {
    use super::*;

    /// Always reports the entire buffer as speech — used by session/state-machine
    /// tests that don't exercise VAD behavior directly.
    pub struct AlwaysSpeechVad;

    #[async_trait]
    impl Vad for AlwaysSpeechVad {
        async fn detect(&self, audio: &AudioFrame) -> VadResult {
            VadResult {
                is_speech: true,
                speech_range: Some((0, audio.samples.len())),
            }
        }

        fn name(&self) -> &str {
            "always-speech-fake"
        }
    }
}
