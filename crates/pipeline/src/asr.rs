//! The ASR Engine (spec §4.3): digit-only recognition. No off-the-shelf digit
//! ASR model ships in this environment, so the production path wraps a CTC
//! acoustic model behind the `onnx` feature — the fixed swap point spec §9
//! calls for. Without the feature, callers use the deterministic
//! `voxkey_core::traits::fakes::PlantedAsr` in tests; there is no
//! always-available non-ONNX production ASR (see DESIGN.md).

use voxkey_core::traits::{AsrResult, AsrToken};

/// Frame hop of the acoustic model, used to convert frame indices to seconds
/// for the per-token timestamps spec §4.3 requires.
const FRAME_HOP_SECONDS: f32 = 0.02;
const BLANK_ID: u32 = 10;

/// Collapse per-frame digit-or-blank argmax ids into tokens: repeated ids
/// merge into a single run, blank ids are dropped, matching standard greedy
/// CTC decoding. `frames[i]` is the vocab-sized logit vector for frame `i`;
/// vocab ids 0-9 are digits, `BLANK_ID` is blank.
fn greedy_ctc_decode(frames: &[Vec<f32>]) -> AsrResult {
    let mut tokens = Vec::new();
    let mut last_id: Option<u32> = None;
    let mut run_start_frame = 0usize;

    for (i, logits) in frames.iter().enumerate() {
        let (id, _) = logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, &p)| (id as u32, p))
            .unwrap_or((BLANK_ID, 0.0));

        if Some(id) != last_id {
            if let Some(prev_id) = last_id {
                if prev_id != BLANK_ID {
                    tokens.push(AsrToken {
                        text: prev_id.to_string(),
                        start_seconds: run_start_frame as f32 * FRAME_HOP_SECONDS,
                        end_seconds: i as f32 * FRAME_HOP_SECONDS,
                    });
                }
            }
            run_start_frame = i;
            last_id = Some(id);
        }
    }
    if let Some(prev_id) = last_id {
        if prev_id != BLANK_ID {
            tokens.push(AsrToken {
                text: prev_id.to_string(),
                start_seconds: run_start_frame as f32 * FRAME_HOP_SECONDS,
                end_seconds: frames.len() as f32 * FRAME_HOP_SECONDS,
            });
        }
    }

    let text = tokens.iter().map(|t| t.text.as_str()).collect::<String>();
    AsrResult { text, tokens }
}

#[cfg(feature = "onnx")]
mod onnx_ctc {
    use super::greedy_ctc_decode;
    use async_trait::async_trait;
    use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
    use parking_lot::Mutex;
    use std::path::Path;
    use voxkey_core::traits::{Asr, AsrResult};
    use voxkey_core::{AudioFrame, CoreError, Result};

    /// Greedy CTC digit decoder: vocab is exactly "0".."9" plus a blank id.
    pub struct OnnxCtcAsr {
        session: Mutex<Session>,
    }

    impl OnnxCtcAsr {
        pub fn new(model_path: impl AsRef<Path>) -> std::result::Result<Self, crate::error::PipelineError> {
            let session = Session::builder()
                .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;

            Ok(Self {
                session: Mutex::new(session),
            })
        }

        fn run_logits(&self, audio: &AudioFrame) -> std::result::Result<Vec<Vec<f32>>, crate::error::PipelineError> {
            let input = ndarray::Array2::from_shape_vec((1, audio.samples.len()), audio.samples.to_vec())
                .map_err(|e| crate::error::PipelineError::Asr(e.to_string()))?;
            let input_tensor =
                Tensor::from_array(input).map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs!["input" => input_tensor])
                .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;

            let (shape, data) = outputs
                .get("logits")
                .ok_or_else(|| crate::error::PipelineError::Model("missing logits output".to_string()))?
                .try_extract_tensor::<f32>()
                .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;

            // Expect [1, num_frames, vocab_size].
            if shape.len() != 3 {
                return Err(crate::error::PipelineError::Model(format!(
                    "unexpected logits shape: {shape:?}"
                )));
            }
            let num_frames = shape[1] as usize;
            let vocab_size = shape[2] as usize;

            Ok(data
                .chunks_exact(vocab_size)
                .take(num_frames)
                .map(|frame| frame.to_vec())
                .collect())
        }
    }

    #[async_trait]
    impl Asr for OnnxCtcAsr {
        async fn transcribe(&self, audio: &AudioFrame) -> Result<AsrResult> {
            let frames = self.run_logits(audio).map_err(CoreError::from)?;
            Ok(greedy_ctc_decode(&frames))
        }

        fn name(&self) -> &str {
            "onnx-ctc-digit-asr"
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx_ctc::OnnxCtcAsr;

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(id: u32) -> Vec<f32> {
        let mut v = vec![0.0; 11];
        v[id as usize] = 1.0;
        v
    }

    #[test]
    fn collapses_repeated_frames_and_drops_blanks() {
        // "4" held for 3 frames, a blank gap, then "2" held for 2 frames.
        let frames: Vec<Vec<f32>> = [4, 4, 4, BLANK_ID, BLANK_ID, 2, 2]
            .iter()
            .map(|&id| one_hot(id))
            .collect();

        let result = greedy_ctc_decode(&frames);

        assert_eq!(result.text, "42");
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.tokens[0].text, "4");
        assert_eq!(result.tokens[1].text, "2");
        assert!(result.tokens[0].end_seconds <= result.tokens[1].start_seconds);
    }

    #[test]
    fn adjacent_equal_digits_separated_by_blank_stay_distinct() {
        let frames: Vec<Vec<f32>> = [7, 7, BLANK_ID, 7, 7]
            .iter()
            .map(|&id| one_hot(id))
            .collect();

        let result = greedy_ctc_decode(&frames);

        assert_eq!(result.text, "77");
        assert_eq!(result.tokens.len(), 2);
    }

    #[test]
    fn all_blank_input_yields_empty_result() {
        let frames: Vec<Vec<f32>> = (0..5).map(|_| one_hot(BLANK_ID)).collect();

        let result = greedy_ctc_decode(&frames);

        assert!(result.text.is_empty());
        assert!(result.tokens.is_empty());
    }
}
