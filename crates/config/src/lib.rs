//! Layered runtime configuration for voxkey.
//!
//! Priority (highest to lowest): `VOXKEY__`-prefixed environment variables >
//! `config/{environment}.yaml` > `config/default.yaml` > struct defaults.

pub mod settings;

pub use settings::{
    load_settings, GalleryConfig, ModelPaths, ObservabilityConfig, PipelineConfig,
    RuntimeEnvironment, ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
