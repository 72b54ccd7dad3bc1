//! The Verification Session state machine (spec §4.9): scoring a live
//! utterance against the gallery, with PIN fallback on voice mismatch. Same
//! pure `transition` shape as `crate::enrollment`.

use std::collections::HashMap;

use voxkey_core::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingAudio,
    AwaitingPin,
    Terminal,
}

#[derive(Debug, Clone)]
pub struct VerificationState {
    pub speaker_id: String,
    pub prompt: String,
    pub phase: Phase,
}

impl VerificationState {
    pub fn new(speaker_id: String, prompt: String) -> Self {
        Self { speaker_id, prompt, phase: Phase::AwaitingAudio }
    }
}

/// Per-digit cosine score computed by the caller after the pipeline runs.
#[derive(Debug, Clone)]
pub struct DigitScore {
    pub digit: char,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub enum Event {
    /// ASR's digit-normalized output did not equal the issued prompt.
    AsrMismatch { asr_text: String },
    /// ASR matched; `scores` holds one entry per prompt digit in order.
    AsrMatchedScored { asr_text: String, scores: Vec<DigitScore> },
    VerifyPin { correct: bool },
    /// A non-recoverable pipeline failure (decode/VAD/ASR/segmentation/embed).
    PipelineErrored(CoreError),
}

#[derive(Debug, Clone)]
pub enum Output {
    VerifyResult {
        authenticated: bool,
        asr_result: Option<String>,
        asr_matched: Option<bool>,
        voice_similarity: Option<f32>,
        digit_scores: Option<HashMap<String, f32>>,
        can_fallback_to_pin: Option<bool>,
        auth_method: Option<&'static str>,
        message: String,
    },
    Error(CoreError),
}

/// Threshold τ below which voice scoring fails even when ASR matched (spec
/// §4.9's reference default; the caller normally passes the configured value).
pub const DEFAULT_THRESHOLD: f32 = 0.75;

/// Mean of per-digit scores, treating a NaN/Inf contribution as zero (spec
/// §4.9 "Edge rule").
fn aggregate_score(scores: &[DigitScore]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    let sum: f32 = scores
        .iter()
        .map(|s| if s.score.is_finite() { s.score } else { 0.0 })
        .sum();
    sum / scores.len() as f32
}

/// A non-finite per-digit score zeroes that digit's contribution but also
/// forces the overall outcome to failure, regardless of the aggregate.
fn has_invalid_score(scores: &[DigitScore]) -> bool {
    scores.iter().any(|s| !s.score.is_finite())
}

pub fn transition(mut state: VerificationState, event: Event, threshold: f32) -> (VerificationState, Vec<Output>) {
    match (state.phase, event) {
        (Phase::AwaitingAudio, Event::AsrMismatch { asr_text }) => {
            state.phase = Phase::Terminal;
            (
                state,
                vec![Output::VerifyResult {
                    authenticated: false,
                    asr_result: Some(asr_text),
                    asr_matched: Some(false),
                    voice_similarity: None,
                    digit_scores: None,
                    can_fallback_to_pin: Some(false),
                    auth_method: None,
                    message: "発話内容が一致しませんでした".to_string(),
                }],
            )
        }
        (Phase::AwaitingAudio, Event::AsrMatchedScored { asr_text, scores }) => {
            let aggregate = aggregate_score(&scores);
            let invalid = has_invalid_score(&scores);
            let digit_scores: HashMap<String, f32> =
                scores.iter().map(|s| (s.digit.to_string(), if s.score.is_finite() { s.score } else { 0.0 })).collect();

            if aggregate >= threshold && !invalid {
                state.phase = Phase::Terminal;
                (
                    state,
                    vec![Output::VerifyResult {
                        authenticated: true,
                        asr_result: Some(asr_text),
                        asr_matched: Some(true),
                        voice_similarity: Some(aggregate),
                        digit_scores: Some(digit_scores),
                        can_fallback_to_pin: None,
                        auth_method: Some("voice"),
                        message: "認証成功".to_string(),
                    }],
                )
            } else {
                state.phase = Phase::AwaitingPin;
                (
                    state,
                    vec![Output::VerifyResult {
                        authenticated: false,
                        asr_result: Some(asr_text),
                        asr_matched: Some(true),
                        voice_similarity: Some(aggregate),
                        digit_scores: Some(digit_scores),
                        can_fallback_to_pin: Some(true),
                        auth_method: None,
                        message: "声紋が一致しませんでした。PINで認証してください".to_string(),
                    }],
                )
            }
        }
        (Phase::AwaitingPin, Event::VerifyPin { correct: true }) => {
            state.phase = Phase::Terminal;
            (
                state,
                vec![Output::VerifyResult {
                    authenticated: true,
                    asr_result: None,
                    asr_matched: None,
                    voice_similarity: None,
                    digit_scores: None,
                    can_fallback_to_pin: None,
                    auth_method: Some("pin"),
                    message: "認証成功".to_string(),
                }],
            )
        }
        (Phase::AwaitingPin, Event::VerifyPin { correct: false }) => {
            // Stays in AWAITING_PIN per spec §4.9 ("or TERMINAL at policy");
            // this implementation re-prompts rather than closing, matching
            // the enrollment machine's re-prompt-on-invalid-input stance.
            (
                state,
                vec![Output::VerifyResult {
                    authenticated: false,
                    asr_result: None,
                    asr_matched: None,
                    voice_similarity: None,
                    digit_scores: None,
                    can_fallback_to_pin: Some(true),
                    auth_method: None,
                    message: "PINが一致しません".to_string(),
                }],
            )
        }
        (_, Event::PipelineErrored(err)) => {
            state.phase = Phase::Terminal;
            (state, vec![Output::Error(err)])
        }
        (phase, _unexpected) => {
            state.phase = phase;
            (state, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(vals: [(char, f32); 4]) -> Vec<DigitScore> {
        vals.iter().map(|&(digit, score)| DigitScore { digit, score }).collect()
    }

    #[test]
    fn asr_mismatch_terminates_without_scoring() {
        let state = VerificationState::new("u1".into(), "4326".into());
        let (state, outputs) = transition(state, Event::AsrMismatch { asr_text: "4327".into() }, DEFAULT_THRESHOLD);
        assert_eq!(state.phase, Phase::Terminal);
        match &outputs[0] {
            Output::VerifyResult { authenticated, asr_matched, .. } => {
                assert!(!authenticated);
                assert_eq!(*asr_matched, Some(false));
            }
            _ => panic!("expected VerifyResult"),
        }
    }

    #[test]
    fn voice_match_above_threshold_succeeds() {
        let state = VerificationState::new("u1".into(), "4326".into());
        let s = scores([('4', 0.9), ('3', 0.85), ('2', 0.8), ('6', 0.95)]);
        let (state, outputs) =
            transition(state, Event::AsrMatchedScored { asr_text: "4326".into(), scores: s }, DEFAULT_THRESHOLD);
        assert_eq!(state.phase, Phase::Terminal);
        match &outputs[0] {
            Output::VerifyResult { authenticated, auth_method, .. } => {
                assert!(authenticated);
                assert_eq!(*auth_method, Some("voice"));
            }
            _ => panic!("expected VerifyResult"),
        }
    }

    #[test]
    fn voice_below_threshold_falls_back_to_pin() {
        let state = VerificationState::new("u1".into(), "4326".into());
        let s = scores([('4', 0.5), ('3', 0.4), ('2', 0.3), ('6', 0.45)]);
        let (state, outputs) =
            transition(state, Event::AsrMatchedScored { asr_text: "4326".into(), scores: s }, DEFAULT_THRESHOLD);
        assert_eq!(state.phase, Phase::AwaitingPin);
        match &outputs[0] {
            Output::VerifyResult { authenticated, can_fallback_to_pin, .. } => {
                assert!(!authenticated);
                assert_eq!(*can_fallback_to_pin, Some(true));
            }
            _ => panic!("expected VerifyResult"),
        }
    }

    #[test]
    fn pin_fallback_success_reports_pin_method() {
        let mut state = VerificationState::new("u1".into(), "4326".into());
        state.phase = Phase::AwaitingPin;
        let (state, outputs) = transition(state, Event::VerifyPin { correct: true }, DEFAULT_THRESHOLD);
        assert_eq!(state.phase, Phase::Terminal);
        match &outputs[0] {
            Output::VerifyResult { authenticated, auth_method, .. } => {
                assert!(authenticated);
                assert_eq!(*auth_method, Some("pin"));
            }
            _ => panic!("expected VerifyResult"),
        }
    }

    #[test]
    fn nan_score_zeroes_contribution_and_forces_failure() {
        let state = VerificationState::new("u1".into(), "4326".into());
        let s = scores([('4', f32::NAN), ('3', 1.0), ('2', 1.0), ('6', 1.0)]);
        let aggregate = aggregate_score(&s);
        assert!((aggregate - 0.75).abs() < 1e-6);
        assert!(has_invalid_score(&s));
        let (state, outputs) =
            transition(state, Event::AsrMatchedScored { asr_text: "4326".into(), scores: s }, DEFAULT_THRESHOLD);
        assert_eq!(state.phase, Phase::AwaitingPin);
        match &outputs[0] {
            Output::VerifyResult { authenticated, can_fallback_to_pin, .. } => {
                assert!(!authenticated);
                assert_eq!(*can_fallback_to_pin, Some(true));
            }
            _ => panic!("expected VerifyResult"),
        }
    }
}
