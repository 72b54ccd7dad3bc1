//! Main settings module.

use crate::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Runtime environment, controlling how strictly `Settings::validate` enforces
/// its checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub gallery: GalleryConfig,

    #[serde(default)]
    pub models: ModelPaths,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP + WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle timeout in seconds (spec §4.10, default 60s).
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_idle_timeout_seconds() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// Audio pipeline tuning (spec §6 "Environment/configuration inputs").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Fixed at 16000 Hz unless the models change (spec §6).
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,

    /// Segmentation padding in milliseconds, clamped to [50, 100] (spec §4.4).
    #[serde(default = "default_segmentation_padding_ms")]
    pub segmentation_padding_ms: u32,

    #[serde(default = "default_min_audio_seconds")]
    pub min_audio_seconds: f32,

    #[serde(default = "default_max_audio_seconds")]
    pub max_audio_seconds: f32,

    /// Per-set retry cap during enrollment (spec §4.8, default 5).
    #[serde(default = "default_retry_cap")]
    pub per_set_retry_cap: u32,

    /// Challenge prompt length range (spec §4.7, default [4, 6]).
    #[serde(default = "default_challenge_len_min")]
    pub challenge_length_min: u8,
    #[serde(default = "default_challenge_len_max")]
    pub challenge_length_max: u8,

    /// VAD energy floor fallback, used when the `onnx` feature is disabled.
    #[serde(default = "default_energy_floor_db")]
    pub vad_energy_floor_db: f32,

    /// Worker pool size; 0 means "number of physical cores" (spec §5).
    #[serde(default)]
    pub worker_pool_size: usize,
}

fn default_sample_rate_hz() -> u32 {
    16_000
}

fn default_segmentation_padding_ms() -> u32 {
    100
}

fn default_min_audio_seconds() -> f32 {
    1.0
}

fn default_max_audio_seconds() -> f32 {
    10.0
}

fn default_retry_cap() -> u32 {
    5
}

fn default_challenge_len_min() -> u8 {
    4
}

fn default_challenge_len_max() -> u8 {
    6
}

fn default_energy_floor_db() -> f32 {
    -50.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate_hz(),
            segmentation_padding_ms: default_segmentation_padding_ms(),
            min_audio_seconds: default_min_audio_seconds(),
            max_audio_seconds: default_max_audio_seconds(),
            per_set_retry_cap: default_retry_cap(),
            challenge_length_min: default_challenge_len_min(),
            challenge_length_max: default_challenge_len_max(),
            vad_energy_floor_db: default_energy_floor_db(),
            worker_pool_size: 0,
        }
    }
}

/// Gallery Store tuning (spec §4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Verification threshold τ (spec §4.9, default 0.75).
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_pin_hash_algorithm")]
    pub pin_hash_algorithm: String,
}

fn default_db_path() -> String {
    "data/voxkey.sqlite3".to_string()
}

fn default_similarity_threshold() -> f32 {
    0.75
}

fn default_pin_hash_algorithm() -> String {
    "sha256".to_string()
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            similarity_threshold: default_similarity_threshold(),
            pin_hash_algorithm: default_pin_hash_algorithm(),
        }
    }
}

/// Inference model paths (spec §6: embedding/ASR/VAD model paths are required).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelPaths {
    pub embedding_model_path: Option<String>,
    pub asr_model_path: Option<String>,
    pub vad_model_path: Option<String>,
}

/// Logging/metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    #[serde(default)]
    pub telemetry_enabled: bool,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            metrics_enabled: true,
            telemetry_enabled: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_pipeline()?;
        self.validate_gallery()?;
        if self.environment.is_strict() {
            self.validate_model_paths()?;
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "must not be zero".to_string(),
            });
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_connections".to_string(),
                message: "must not be zero".to_string(),
            });
        }
        if self.server.idle_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.idle_timeout_seconds".to_string(),
                message: "must not be zero".to_string(),
            });
        }
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if !(50..=100).contains(&p.segmentation_padding_ms) {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.segmentation_padding_ms".to_string(),
                message: "must be within [50, 100] ms".to_string(),
            });
        }
        if p.min_audio_seconds <= 0.0 || p.max_audio_seconds <= p.min_audio_seconds {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.min_audio_seconds/max_audio_seconds".to_string(),
                message: "min must be positive and less than max".to_string(),
            });
        }
        if p.per_set_retry_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.per_set_retry_cap".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if p.challenge_length_min < 1 || p.challenge_length_max < p.challenge_length_min {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.challenge_length_min/max".to_string(),
                message: "min must be >= 1 and max >= min".to_string(),
            });
        }
        Ok(())
    }

    fn validate_gallery(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.gallery.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "gallery.similarity_threshold".to_string(),
                message: "must be within [-1.0, 1.0]".to_string(),
            });
        }
        Ok(())
    }

    fn validate_model_paths(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.models.embedding_model_path.is_none() {
            missing.push("models.embedding_model_path");
        }
        if self.models.asr_model_path.is_none() {
            missing.push("models.asr_model_path");
        }
        if self.models.vad_model_path.is_none() {
            missing.push("models.vad_model_path");
        }
        if !missing.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "models".to_string(),
                message: format!("required in strict environments: {}", missing.join(", ")),
            });
        }
        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`VOXKEY__` prefix, `__` as the nesting separator)
/// 2. `config/{env}.yaml` (if `env` is specified)
/// 3. `config/default.yaml`
/// 4. struct defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOXKEY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_pass_validation() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_padding_outside_50_to_100_ms() {
        let mut settings = Settings::default();
        settings.pipeline.segmentation_padding_ms = 10;
        assert!(settings.validate().is_err());
        settings.pipeline.segmentation_padding_ms = 100;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_challenge_length_range_inverted() {
        let mut settings = Settings::default();
        settings.pipeline.challenge_length_min = 6;
        settings.pipeline.challenge_length_max = 4;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_similarity_threshold_out_of_range() {
        let mut settings = Settings::default();
        settings.gallery.similarity_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn production_requires_model_paths() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate().is_err());

        settings.models.embedding_model_path = Some("models/embed.onnx".to_string());
        settings.models.asr_model_path = Some("models/asr.onnx".to_string());
        settings.models.vad_model_path = Some("models/vad.onnx".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn development_does_not_require_model_paths() {
        let settings = Settings::default();
        assert_eq!(settings.environment, RuntimeEnvironment::Development);
        assert!(settings.validate().is_ok());
    }
}
