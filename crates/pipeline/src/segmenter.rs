//! The Segmenter (spec §4.4): pure functions, no I/O. Turns an `AsrResult`
//! plus the decoded PCM into one padded slice per prompted digit, or
//! `SEGMENTATION_FAILED` when the ASR's digit-normalized output doesn't match
//! the expected prompt.

use voxkey_core::traits::AsrResult;
use voxkey_core::{AudioFrame, CoreError, Digit, Result};

use crate::digits::normalize_token;

#[derive(Debug, Clone, Copy)]
pub struct SegmentConfig {
    pub padding_ms: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self { padding_ms: 100 }
    }
}

/// Normalize and filter an ASR result's tokens down to (digit, token) pairs,
/// preserving order. Non-digit tokens are simply dropped (spec §4.3: "tolerated
/// at the extremities... must be filtered before digit matching").
fn digit_tokens(asr: &AsrResult) -> Vec<(Digit, &voxkey_core::traits::AsrToken)> {
    asr.tokens
        .iter()
        .filter_map(|t| normalize_token(&t.text).map(|d| (d, t)))
        .collect()
}

/// Slice `audio` into exactly `expected_digits.len()` padded PCM segments, one
/// per prompted digit, in prompt order.
pub fn segment(
    asr: &AsrResult,
    audio: &AudioFrame,
    expected_digits: &str,
    config: SegmentConfig,
) -> Result<Vec<AudioFrame>> {
    let padding_ms = config.padding_ms.clamp(50, 100);
    let expected: Vec<Digit> = expected_digits
        .chars()
        .filter_map(Digit::from_char)
        .collect();

    if expected.len() != expected_digits.len() {
        return Err(CoreError::SegmentationFailed(format!(
            "expected digit string contains non-digit characters: {expected_digits:?}"
        )));
    }

    let matched = digit_tokens(asr);

    if matched.len() != expected.len() {
        return Err(CoreError::SegmentationFailed(format!(
            "expected {} digit tokens, ASR yielded {}",
            expected.len(),
            matched.len()
        )));
    }

    for (i, (digit, _)) in matched.iter().enumerate() {
        if *digit != expected[i] {
            return Err(CoreError::SegmentationFailed(format!(
                "digit mismatch at position {i}: expected {}, got {}",
                expected[i], digit
            )));
        }
    }

    let sample_rate = audio.sample_rate.as_u32() as f32;
    let padding_samples = ((padding_ms as f32 / 1000.0) * sample_rate) as usize;
    let total_samples = audio.samples.len();

    let slices = matched
        .iter()
        .enumerate()
        .map(|(seq, (_, token))| {
            let start_sample = (token.start_seconds * sample_rate) as usize;
            let end_sample = (token.end_seconds * sample_rate) as usize;

            let padded_start = start_sample.saturating_sub(padding_samples);
            let padded_end = (end_sample + padding_samples).min(total_samples);

            let slice: Vec<f32> = audio.samples[padded_start..padded_end.max(padded_start)].to_vec();
            AudioFrame::new(slice, audio.sample_rate, audio.channels, seq as u64)
        })
        .collect();

    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxkey_core::traits::AsrToken;
    use voxkey_core::{Channels, SampleRate};

    fn token(text: &str, start: f32, end: f32) -> AsrToken {
        AsrToken {
            text: text.to_string(),
            start_seconds: start,
            end_seconds: end,
        }
    }

    fn flat_audio(seconds: f32) -> AudioFrame {
        let n = (seconds * 16000.0) as usize;
        AudioFrame::new(vec![0.1; n], SampleRate::Hz16000, Channels::Mono, 0)
    }

    #[test]
    fn produces_one_padded_slice_per_expected_digit() {
        let asr = AsrResult {
            text: "4326".to_string(),
            tokens: vec![
                token("4", 0.0, 0.3),
                token("3", 0.3, 0.6),
                token("2", 0.6, 0.9),
                token("6", 0.9, 1.2),
            ],
        };
        let audio = flat_audio(1.5);
        let slices = segment(&asr, &audio, "4326", SegmentConfig::default()).unwrap();
        assert_eq!(slices.len(), 4);
    }

    #[test]
    fn drops_non_digit_tokens_at_extremities() {
        let asr = AsrResult {
            text: "um 12 ok".to_string(),
            tokens: vec![
                token("um", 0.0, 0.1),
                token("1", 0.1, 0.3),
                token("2", 0.3, 0.5),
                token("ok", 0.5, 0.6),
            ],
        };
        let audio = flat_audio(1.0);
        let slices = segment(&asr, &audio, "12", SegmentConfig::default()).unwrap();
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn mismatched_digit_count_fails_segmentation() {
        let asr = AsrResult {
            text: "43".to_string(),
            tokens: vec![token("4", 0.0, 0.3), token("3", 0.3, 0.6)],
        };
        let audio = flat_audio(1.0);
        let err = segment(&asr, &audio, "4326", SegmentConfig::default()).unwrap_err();
        assert_eq!(err.code(), "SEGMENTATION_FAILED");
    }

    #[test]
    fn digit_mismatch_fails_segmentation() {
        let asr = AsrResult {
            text: "4327".to_string(),
            tokens: vec![
                token("4", 0.0, 0.3),
                token("3", 0.3, 0.6),
                token("2", 0.6, 0.9),
                token("7", 0.9, 1.2),
            ],
        };
        let audio = flat_audio(1.5);
        let err = segment(&asr, &audio, "4326", SegmentConfig::default()).unwrap_err();
        assert_eq!(err.code(), "SEGMENTATION_FAILED");
    }

    #[test]
    fn padding_is_clamped_into_valid_range() {
        let asr = AsrResult {
            text: "1".to_string(),
            tokens: vec![token("1", 0.5, 0.8)],
        };
        let audio = flat_audio(1.0);
        let slices = segment(&asr, &audio, "1", SegmentConfig { padding_ms: 1000 }).unwrap();
        // clamped to 100ms padding each side: (0.5-0.1)s..(0.8+0.1)s = 0.6s = 9600 samples
        assert_eq!(slices[0].samples.len(), 9600);
    }
}
