//! The Audio Decoder (spec §4.1): container bytes to mono 16 kHz PCM float.
//!
//! The always-available path reads 16-bit PCM WAV via `hound`. A second path,
//! behind the `opus` feature, decodes a stream of length-prefixed Opus frames
//! (the framing `MediaRecorder` produces is demuxed by the transport layer
//! before bytes reach this decoder; WebM container parsing is not this
//! decoder's job). Both paths converge on the same duration check and resample
//! step before returning.

use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;
use voxkey_core::{AudioFrame, Channels, CoreError, Result, SampleRate};
use voxkey_core::traits::AudioDecoder;

use crate::error::PipelineError;

pub struct WavPcmDecoder {
    target_sample_rate: SampleRate,
    min_duration: Duration,
    max_duration: Duration,
}

impl WavPcmDecoder {
    pub fn new(min_audio_seconds: f64, max_audio_seconds: f64) -> Self {
        Self {
            target_sample_rate: SampleRate::Hz16000,
            min_duration: Duration::from_secs_f64(min_audio_seconds),
            max_duration: Duration::from_secs_f64(max_audio_seconds),
        }
    }

    fn decode_wav(&self, bytes: &[u8]) -> std::result::Result<AudioFrame, PipelineError> {
        let reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        let spec = reader.spec();

        let channels = match spec.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => return Err(PipelineError::Decode(format!("unsupported channel count: {n}"))),
        };

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int if spec.bits_per_sample == 16 => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| PipelineError::Decode(e.to_string()))?,
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| PipelineError::Decode(e.to_string()))?,
            other => {
                return Err(PipelineError::Decode(format!(
                    "unsupported sample format: {other:?} @ {} bits",
                    spec.bits_per_sample
                )))
            }
        };

        if samples.is_empty() {
            return Err(PipelineError::Decode("empty audio".to_string()));
        }

        let source_rate = match spec.sample_rate {
            8000 => SampleRate::Hz8000,
            16000 => SampleRate::Hz16000,
            22050 => SampleRate::Hz22050,
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            other => {
                return Err(PipelineError::Decode(format!(
                    "unsupported sample rate: {other} Hz"
                )))
            }
        };

        Ok(AudioFrame::new(samples, source_rate, channels, 0))
    }

    #[cfg(feature = "opus")]
    fn decode_opus(&self, bytes: &[u8]) -> std::result::Result<AudioFrame, PipelineError> {
        use audiopus::{coder::Decoder as OpusDecoder, Channels as OpusChannels, SampleRate as OpusRate};

        if bytes.is_empty() {
            return Err(PipelineError::Decode("empty audio".to_string()));
        }

        let mut decoder = OpusDecoder::new(OpusRate::Hz48000, OpusChannels::Mono)
            .map_err(|e| PipelineError::Decode(e.to_string()))?;

        let mut samples = Vec::new();
        let mut cursor = 0usize;
        // Each frame is a 2-byte big-endian length prefix followed by the Opus packet.
        while cursor + 2 <= bytes.len() {
            let frame_len = u16::from_be_bytes([bytes[cursor], bytes[cursor + 1]]) as usize;
            cursor += 2;
            if cursor + frame_len > bytes.len() {
                return Err(PipelineError::Decode("truncated opus frame".to_string()));
            }
            let packet = &bytes[cursor..cursor + frame_len];
            cursor += frame_len;

            let mut pcm = vec![0i16; 5760]; // max frame size at 48kHz/120ms mono
            let decoded = decoder
                .decode(Some(packet), &mut pcm, false)
                .map_err(|e| PipelineError::Decode(e.to_string()))?;
            samples.extend(pcm[..decoded].iter().map(|&s| s as f32 / 32768.0));
        }

        if samples.is_empty() {
            return Err(PipelineError::Decode("no opus frames decoded".to_string()));
        }

        Ok(AudioFrame::new(samples, SampleRate::Hz48000, Channels::Mono, 0))
    }

    fn finish(&self, frame: AudioFrame) -> std::result::Result<AudioFrame, PipelineError> {
        let frame = frame.to_mono().resample(self.target_sample_rate);

        if frame.duration < self.min_duration {
            return Err(PipelineError::InvalidAudio(format!(
                "audio too short: {:.2}s < {:.2}s",
                frame.duration.as_secs_f64(),
                self.min_duration.as_secs_f64()
            )));
        }
        if frame.duration > self.max_duration {
            return Err(PipelineError::InvalidAudio(format!(
                "audio too long: {:.2}s > {:.2}s",
                frame.duration.as_secs_f64(),
                self.max_duration.as_secs_f64()
            )));
        }

        Ok(frame)
    }
}

#[async_trait]
impl AudioDecoder for WavPcmDecoder {
    async fn decode(&self, bytes: &[u8]) -> Result<AudioFrame> {
        if bytes.is_empty() {
            return Err(CoreError::DecodeError("empty input".to_string()));
        }

        let looks_like_wav = bytes.len() >= 4 && &bytes[0..4] == b"RIFF";

        let frame = if looks_like_wav {
            self.decode_wav(bytes)
        } else {
            #[cfg(feature = "opus")]
            {
                self.decode_opus(bytes)
            }
            #[cfg(not(feature = "opus"))]
            {
                Err(PipelineError::Decode(
                    "non-WAV input requires the opus feature".to_string(),
                ))
            }
        }
        .map_err(CoreError::from)?;

        self.finish(frame).map_err(CoreError::from)
    }

    fn name(&self) -> &'static str {
        "wav-pcm-decoder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buf = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn decodes_valid_wav_within_duration_bounds() {
        let samples = vec![1000i16; 16000 * 2]; // 2.0s at 16kHz
        let bytes = write_wav(&samples, 16000);
        let decoder = WavPcmDecoder::new(1.0, 10.0);
        let frame = decoder.decode(&bytes).await.unwrap();
        assert_eq!(frame.sample_rate, SampleRate::Hz16000);
        assert!(frame.duration.as_secs_f64() > 1.9);
    }

    #[tokio::test]
    async fn rejects_audio_shorter_than_minimum() {
        let samples = vec![1000i16; 16000 / 2]; // 0.5s
        let bytes = write_wav(&samples, 16000);
        let decoder = WavPcmDecoder::new(1.0, 10.0);
        let err = decoder.decode(&bytes).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_AUDIO");
    }

    #[tokio::test]
    async fn rejects_empty_input_as_decode_error() {
        let decoder = WavPcmDecoder::new(1.0, 10.0);
        let err = decoder.decode(&[]).await.unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
    }

    #[tokio::test]
    async fn rejects_malformed_container() {
        let decoder = WavPcmDecoder::new(1.0, 10.0);
        let err = decoder.decode(b"RIFFnotarealwav").await.unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
    }
}
