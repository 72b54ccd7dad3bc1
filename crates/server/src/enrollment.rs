//! The Enrollment Session state machine (spec §4.8): a pure `transition`
//! function from `(EnrollmentState, Event)` to `(EnrollmentState, Vec<Output>)`
//! per spec §9's redesign note — no I/O, no channel, testable directly.

use std::collections::HashMap;

use voxkey_core::{CoreError, Digit, Embedding, SpeakerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    AwaitingAudio { set_index: u8, retry_count: u32 },
    AwaitingPin,
    Committing,
    Terminal,
}

#[derive(Debug, Clone)]
pub struct EnrollmentState {
    pub speaker_id: SpeakerId,
    pub speaker_name: Option<String>,
    pub prompts: [String; 5],
    pub phase: Phase,
    pub accumulator: HashMap<Digit, Vec<Embedding>>,
    /// Set once a syntactically valid PIN is submitted; cleared on nothing
    /// (retained until commit). Never logged (I5).
    pub pending_pin: Option<String>,
}

impl EnrollmentState {
    pub fn new(speaker_id: SpeakerId, speaker_name: Option<String>, prompts: [String; 5]) -> Self {
        Self {
            speaker_id,
            speaker_name,
            prompts,
            phase: Phase::AwaitingAudio { set_index: 0, retry_count: 0 },
            accumulator: HashMap::new(),
            pending_pin: None,
        }
    }
}

/// Inputs driving the enrollment machine. `SetAccepted`/`SetMismatched`/
/// `SetErrored` are produced by the caller after running the audio pipeline
/// for the current set's binary frame; decode/VAD/ASR/segmentation failures
/// all fold into `SetErrored` (spec §4.10's "recoverable within the
/// enrollment state machine... count as a retry").
#[derive(Debug, Clone)]
pub enum Event {
    SetAccepted { asr_text: String, digits: Vec<(Digit, Embedding)> },
    SetMismatched { asr_text: String },
    SetErrored { message: String },
    RegisterPin { pin: String },
    CommitSucceeded,
    CommitFailed(CoreError),
}

#[derive(Debug, Clone)]
pub enum Output {
    AsrResult {
        success: bool,
        asr_result: String,
        set_index: u8,
        remaining_sets: Option<u8>,
        retry_count: Option<u32>,
        max_retries: Option<u32>,
        message: String,
    },
    PinRejected {
        message: String,
    },
    /// Instructs the caller to hash `pin` (voxkey-persistence::pin) and call
    /// `GalleryStore::commit` with the accumulated centroids, then feed the
    /// result back as `CommitSucceeded`/`CommitFailed`.
    RequestCommit {
        pin: String,
    },
    EnrollmentComplete {
        registered_digits: [String; 10],
        has_pin: bool,
    },
    Error(CoreError),
}

/// Fold the two accepted embeddings per digit into a unit-normalized centroid
/// (spec I3, §4.8 "Centroid computation"). Any digit holding != 2 entries is
/// an internal invariant violation — a bug in the accumulation logic, not a
/// client-triggerable state.
fn compute_centroids(accumulator: &HashMap<Digit, Vec<Embedding>>) -> Result<HashMap<Digit, Embedding>, CoreError> {
    let mut centroids = HashMap::with_capacity(10);
    for digit in Digit::ALL {
        let embeddings = accumulator.get(&digit).map(Vec::as_slice).unwrap_or(&[]);
        if embeddings.len() != 2 {
            return Err(CoreError::Internal(format!(
                "digit {digit} has {} accumulated embeddings, expected 2",
                embeddings.len()
            )));
        }
        let centroid = Embedding::mean(embeddings)
            .ok_or_else(|| CoreError::Internal(format!("centroid for digit {digit} has zero norm")))?;
        centroids.insert(digit, centroid);
    }
    Ok(centroids)
}

fn is_valid_pin_format(pin: &str) -> bool {
    pin.len() == 4 && pin.chars().all(|c| c.is_ascii_digit())
}

pub fn transition(mut state: EnrollmentState, event: Event, max_retries: u32) -> (EnrollmentState, Vec<Output>) {
    match (state.phase.clone(), event) {
        (Phase::AwaitingAudio { set_index, .. }, Event::SetAccepted { asr_text, digits }) => {
            for (digit, embedding) in digits {
                state.accumulator.entry(digit).or_default().push(embedding);
            }
            let next_index = set_index + 1;
            let outputs = vec![Output::AsrResult {
                success: true,
                asr_result: asr_text,
                set_index,
                remaining_sets: Some(5 - next_index),
                retry_count: None,
                max_retries: None,
                message: "セットを受理しました".to_string(),
            }];
            state.phase = if next_index < 5 {
                Phase::AwaitingAudio { set_index: next_index, retry_count: 0 }
            } else {
                Phase::AwaitingPin
            };
            (state, outputs)
        }
        (Phase::AwaitingAudio { set_index, retry_count }, Event::SetMismatched { asr_text }) => {
            retry_or_fail(state, set_index, retry_count, asr_text, max_retries)
        }
        (Phase::AwaitingAudio { set_index, retry_count }, Event::SetErrored { message }) => {
            retry_or_fail(state, set_index, retry_count, message, max_retries)
        }
        (Phase::AwaitingPin, Event::RegisterPin { pin }) => {
            if is_valid_pin_format(&pin) {
                state.pending_pin = Some(pin.clone());
                state.phase = Phase::Committing;
                (state, vec![Output::RequestCommit { pin }])
            } else {
                (
                    state,
                    vec![Output::PinRejected {
                        message: "PINは4桁の数字で入力してください".to_string(),
                    }],
                )
            }
        }
        (Phase::Committing, Event::CommitSucceeded) => {
            let registered_digits: [String; 10] =
                std::array::from_fn(|i| i.to_string());
            state.phase = Phase::Terminal;
            (
                state.clone(),
                vec![Output::EnrollmentComplete {
                    registered_digits,
                    has_pin: state.pending_pin.is_some(),
                }],
            )
        }
        (Phase::Committing, Event::CommitFailed(err)) => {
            state.phase = Phase::Terminal;
            (state, vec![Output::Error(err)])
        }
        (phase, _unexpected) => {
            // An out-of-sequence client message for the current phase; ignored
            // rather than torn down, matching the runtime's "ignore the client's
            // own numbering" stance (spec §4.8).
            state.phase = phase;
            (state, Vec::new())
        }
    }
}

fn retry_or_fail(
    mut state: EnrollmentState,
    set_index: u8,
    retry_count: u32,
    asr_result: String,
    max_retries: u32,
) -> (EnrollmentState, Vec<Output>) {
    let next_retry = retry_count + 1;
    if next_retry >= max_retries {
        state.phase = Phase::Terminal;
        (state, vec![Output::Error(CoreError::MaxRetriesExceeded)])
    } else {
        state.phase = Phase::AwaitingAudio { set_index, retry_count: next_retry };
        (
            state,
            vec![Output::AsrResult {
                success: false,
                asr_result,
                set_index,
                remaining_sets: None,
                retry_count: Some(next_retry),
                max_retries: Some(max_retries),
                message: "聞き取れませんでした。もう一度お願いします".to_string(),
            }],
        )
    }
}

/// Compute the ten centroids ready for `GalleryStore::commit`; called by the
/// runtime after receiving `Output::RequestCommit`, just before issuing the
/// store call (kept outside `transition` since it can fail on an internal
/// invariant violation that the caller needs to distinguish from the normal
/// commit-result event).
pub fn centroids_for_commit(state: &EnrollmentState) -> Result<HashMap<Digit, Embedding>, CoreError> {
    compute_centroids(&state.accumulator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxkey_core::traits::fakes::DeterministicExtractor;
    use voxkey_core::traits::EmbeddingExtractor;

    fn prompts() -> [String; 5] {
        ["4326".into(), "0198".into(), "5730".into(), "2846".into(), "9015".into()]
    }

    fn fake_embedding(seed: u8) -> Embedding {
        Embedding::new(vec![seed as f32, 1.0, 2.0]).unwrap()
    }

    #[test]
    fn happy_path_accumulates_and_advances_through_all_five_sets() {
        let mut state = EnrollmentState::new(SpeakerId::from("u1"), None, prompts());
        for i in 0u8..5 {
            let digits = vec![(Digit::new(4).unwrap(), fake_embedding(i))];
            let (next, outputs) = transition(
                state,
                Event::SetAccepted { asr_text: "4326".into(), digits },
                5,
            );
            state = next;
            match &outputs[0] {
                Output::AsrResult { success, remaining_sets, .. } => {
                    assert!(*success);
                    assert_eq!(*remaining_sets, Some(4 - i));
                }
                _ => panic!("expected AsrResult"),
            }
        }
        assert_eq!(state.phase, Phase::AwaitingPin);
    }

    #[test]
    fn mismatch_retries_same_set_index() {
        let state = EnrollmentState::new(SpeakerId::from("u1"), None, prompts());
        let (state, outputs) = transition(state, Event::SetMismatched { asr_text: "4327".into() }, 5);
        assert_eq!(state.phase, Phase::AwaitingAudio { set_index: 0, retry_count: 1 });
        match &outputs[0] {
            Output::AsrResult { success, retry_count, max_retries, .. } => {
                assert!(!success);
                assert_eq!(*retry_count, Some(1));
                assert_eq!(*max_retries, Some(5));
            }
            _ => panic!("expected AsrResult"),
        }
    }

    #[test]
    fn exhausting_retries_terminates_with_max_retries_exceeded() {
        let mut state = EnrollmentState::new(SpeakerId::from("u1"), None, prompts());
        for _ in 0..4 {
            let (next, _) = transition(state, Event::SetMismatched { asr_text: "wrong".into() }, 5);
            state = next;
        }
        let (state, outputs) = transition(state, Event::SetMismatched { asr_text: "wrong".into() }, 5);
        assert_eq!(state.phase, Phase::Terminal);
        match &outputs[0] {
            Output::Error(CoreError::MaxRetriesExceeded) => {}
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[test]
    fn malformed_pin_is_rejected_without_closing() {
        let mut state = EnrollmentState::new(SpeakerId::from("u1"), None, prompts());
        state.phase = Phase::AwaitingPin;
        let (state, outputs) = transition(state, Event::RegisterPin { pin: "12a4".into() }, 5);
        assert_eq!(state.phase, Phase::AwaitingPin);
        assert!(matches!(outputs[0], Output::PinRejected { .. }));
    }

    #[test]
    fn valid_pin_requests_commit() {
        let mut state = EnrollmentState::new(SpeakerId::from("u1"), None, prompts());
        state.phase = Phase::AwaitingPin;
        let (state, outputs) = transition(state, Event::RegisterPin { pin: "1234".into() }, 5);
        assert_eq!(state.phase, Phase::Committing);
        assert!(matches!(&outputs[0], Output::RequestCommit { pin } if pin == "1234"));
    }

    #[test]
    fn commit_success_emits_enrollment_complete() {
        let mut state = EnrollmentState::new(SpeakerId::from("u1"), None, prompts());
        state.phase = Phase::Committing;
        state.pending_pin = Some("1234".into());
        let (state, outputs) = transition(state, Event::CommitSucceeded, 5);
        assert_eq!(state.phase, Phase::Terminal);
        match &outputs[0] {
            Output::EnrollmentComplete { registered_digits, has_pin } => {
                assert_eq!(registered_digits.len(), 10);
                assert!(*has_pin);
            }
            other => panic!("expected EnrollmentComplete, got {other:?}"),
        }
    }

    #[test]
    fn centroid_computation_requires_exactly_two_embeddings_per_digit() {
        let extractor = DeterministicExtractor::new(3);
        let mut accumulator: HashMap<Digit, Vec<Embedding>> = HashMap::new();
        for d in Digit::ALL {
            accumulator.insert(d, vec![fake_embedding(1), fake_embedding(2)]);
        }
        let _ = extractor.dimension();
        assert!(compute_centroids(&accumulator).is_ok());

        accumulator.get_mut(&Digit::new(0).unwrap()).unwrap().pop();
        let err = compute_centroids(&accumulator).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
