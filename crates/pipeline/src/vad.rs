//! The VAD Gate: dual-path design. The ONNX path runs a Silero-style VAD v5
//! model with LSTM state threaded between calls; the energy-floor fallback
//! classifies speech purely from frame RMS, with hysteresis so a single loud
//! or quiet frame can't flip the verdict.

use async_trait::async_trait;
use voxkey_core::traits::{Vad, VadResult};
use voxkey_core::AudioFrame;

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
#[cfg(feature = "onnx")]
use parking_lot::Mutex;
#[cfg(feature = "onnx")]
use std::path::Path;

#[derive(Debug, Clone)]
pub struct VadConfig {
    pub threshold: f32,
    pub energy_floor_db: f32,
    pub min_speech_frames: usize,
    pub min_silence_frames: usize,
    pub chunk_size: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            energy_floor_db: -50.0,
            min_speech_frames: 8,
            min_silence_frames: 10,
            chunk_size: 512,
        }
    }
}

/// Energy-floor VAD: always available, no model required.
///
/// The speech range reported spans from the first chunk whose energy clears
/// the floor to the last one that does, in chunk-sized steps over the frame.
pub struct EnergyVad {
    config: VadConfig,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    fn scan(&self, frame: &AudioFrame) -> VadResult {
        if frame.samples.is_empty() {
            return VadResult::silence();
        }

        let chunk_size = self.config.chunk_size.max(1);
        let mut first_speech_chunk: Option<usize> = None;
        let mut last_speech_chunk: Option<usize> = None;
        let mut speech_run = 0usize;
        let mut silence_run = 0usize;
        let mut confirmed = false;

        for (i, chunk) in frame.samples.chunks(chunk_size).enumerate() {
            let energy_db = chunk_energy_db(chunk);
            let is_loud = energy_db >= self.config.energy_floor_db;

            if is_loud {
                speech_run += 1;
                silence_run = 0;
            } else {
                silence_run += 1;
                speech_run = 0;
            }

            if speech_run >= self.config.min_speech_frames {
                confirmed = true;
                if first_speech_chunk.is_none() {
                    first_speech_chunk = Some(i + 1 - self.config.min_speech_frames);
                }
                last_speech_chunk = Some(i);
            } else if confirmed && silence_run > 0 && silence_run < self.config.min_silence_frames {
                last_speech_chunk = Some(i);
            }
        }

        if !confirmed {
            return VadResult::silence();
        }

        let start = first_speech_chunk.unwrap_or(0) * chunk_size;
        let end = ((last_speech_chunk.unwrap_or(0) + 1) * chunk_size).min(frame.samples.len());

        VadResult {
            is_speech: true,
            speech_range: Some((start, end)),
        }
    }
}

#[async_trait]
impl Vad for EnergyVad {
    async fn detect(&self, audio: &AudioFrame) -> VadResult {
        self.scan(audio)
    }

    fn name(&self) -> &str {
        "energy-floor-vad"
    }
}

fn chunk_energy_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return -96.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    10.0 * energy.max(1e-10).log10()
}

/// Silero-style ONNX VAD. Maintains LSTM hidden/cell state across calls on
/// the same session, guarded by a single lock held for the whole inference
/// call (holding it only partially previously allowed a second caller to
/// observe stale state between the run and the state update).
///
/// The `Vad` trait is infallible by contract (spec §4.2 treats a VAD failure
/// as "no speech", not a distinct error); an inference error here is logged
/// and degrades to `VadResult::silence()` rather than propagating.
#[cfg(feature = "onnx")]
pub struct OnnxVad {
    session: Mutex<Session>,
    state: Mutex<(Array2<f32>, Array2<f32>)>,
    config: VadConfig,
}

#[cfg(feature = "onnx")]
impl OnnxVad {
    pub fn new(
        model_path: impl AsRef<Path>,
        config: VadConfig,
    ) -> std::result::Result<Self, crate::error::PipelineError> {
        let session = Session::builder()
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            state: Mutex::new((Array2::zeros((2, 64)), Array2::zeros((2, 64)))),
            config,
        })
    }

    fn infer_chunk(&self, chunk: &[f32]) -> std::result::Result<f32, crate::error::PipelineError> {
        let input = Array2::from_shape_vec((1, chunk.len()), chunk.to_vec())
            .map_err(|e| crate::error::PipelineError::Vad(e.to_string()))?;
        let sr = ndarray::arr1(&[16000i64]);

        let mut state = self.state.lock();
        let input_tensor =
            Tensor::from_array(input).map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;
        let sr_tensor =
            Tensor::from_array(sr).map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;
        let h_tensor = Tensor::from_array(state.0.clone())
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;
        let c_tensor = Tensor::from_array(state.1.clone())
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs!["input" => input_tensor, "sr" => sr_tensor, "h" => h_tensor, "c" => c_tensor])
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;

        let (_, speech_data) = outputs
            .get("output")
            .ok_or_else(|| crate::error::PipelineError::Model("missing output tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;
        let prob = speech_data.first().copied().unwrap_or(0.0);

        if let Some(hn) = outputs.get("hn") {
            let (shape, data) = hn
                .try_extract_tensor::<f32>()
                .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;
            if shape.len() == 2 {
                if let Ok(view) =
                    ndarray::ArrayView2::from_shape((shape[0] as usize, shape[1] as usize), data)
                {
                    state.0.assign(&view);
                }
            }
        }
        if let Some(cn) = outputs.get("cn") {
            let (shape, data) = cn
                .try_extract_tensor::<f32>()
                .map_err(|e| crate::error::PipelineError::Model(e.to_string()))?;
            if shape.len() == 2 {
                if let Ok(view) =
                    ndarray::ArrayView2::from_shape((shape[0] as usize, shape[1] as usize), data)
                {
                    state.1.assign(&view);
                }
            }
        }

        Ok(prob)
    }

    fn scan(&self, frame: &AudioFrame) -> std::result::Result<VadResult, crate::error::PipelineError> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut speech_run = 0usize;
        let mut confirmed = false;
        let mut first_speech_chunk: Option<usize> = None;
        let mut last_speech_chunk: Option<usize> = None;

        for (i, chunk) in frame.samples.chunks(chunk_size).enumerate() {
            if chunk.len() < chunk_size {
                break;
            }
            let prob = self.infer_chunk(chunk)?;

            if prob >= self.config.threshold {
                speech_run += 1;
                if speech_run >= self.config.min_speech_frames {
                    confirmed = true;
                    if first_speech_chunk.is_none() {
                        first_speech_chunk = Some(i + 1 - self.config.min_speech_frames);
                    }
                    last_speech_chunk = Some(i);
                }
            } else {
                speech_run = 0;
            }
        }

        if !confirmed {
            return Ok(VadResult::silence());
        }

        let start = first_speech_chunk.unwrap_or(0) * chunk_size;
        let end = ((last_speech_chunk.unwrap_or(0) + 1) * chunk_size).min(frame.samples.len());
        Ok(VadResult {
            is_speech: true,
            speech_range: Some((start, end)),
        })
    }
}

#[cfg(feature = "onnx")]
#[async_trait]
impl Vad for OnnxVad {
    async fn detect(&self, audio: &AudioFrame) -> VadResult {
        match self.scan(audio) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "VAD inference failed, reporting silence");
                VadResult::silence()
            }
        }
    }

    fn name(&self) -> &str {
        "silero-onnx-vad"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxkey_core::{Channels, SampleRate};

    #[tokio::test]
    async fn silence_is_rejected() {
        let vad = EnergyVad::new(VadConfig::default());
        let frame = AudioFrame::new(vec![0.0; 16000], SampleRate::Hz16000, Channels::Mono, 0);
        let result = vad.detect(&frame).await;
        assert!(!result.is_speech);
    }

    #[tokio::test]
    async fn loud_sustained_signal_is_confirmed_as_speech() {
        let vad = EnergyVad::new(VadConfig::default());
        let samples: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.05).sin() * 0.8).collect();
        let frame = AudioFrame::new(samples, SampleRate::Hz16000, Channels::Mono, 0);
        let result = vad.detect(&frame).await;
        assert!(result.is_speech);
        assert!(result.speech_range.is_some());
    }

    #[tokio::test]
    async fn empty_frame_is_silence() {
        let vad = EnergyVad::new(VadConfig::default());
        let frame = AudioFrame::new(vec![], SampleRate::Hz16000, Channels::Mono, 0);
        let result = vad.detect(&frame).await;
        assert!(!result.is_speech);
    }
}
