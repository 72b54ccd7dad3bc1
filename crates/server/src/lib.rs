//! `voxkey-server`: the duplex session runtime, enrollment/verification state
//! machines, and the `axum` HTTP/WebSocket binding around them.

pub mod enrollment;
pub mod http;
pub mod locale;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod state;
pub mod verification;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use session::{Session, SessionManager};
pub use state::AppState;
pub use websocket::WebSocketHandler;

use thiserror::Error;
use voxkey_core::CoreError;

/// Server-boundary error type. Every variant ultimately maps to the
/// client-visible `{code, message}` pair (spec §7) via `code()`/
/// `client_message()`; this is the only layer that ever speaks that taxonomy
/// to the wire.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("session error: {0}")]
    Session(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Core(err) => err.code(),
            ServerError::Protocol(_) | ServerError::Session(_) | ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The Japanese reference-locale message (spec §7). Protocol/session/
    /// internal errors never leak their `Display` text to the client.
    pub fn client_message(&self) -> String {
        match self {
            ServerError::Core(err) => locale::ja::message(err).to_string(),
            ServerError::Protocol(_) | ServerError::Session(_) | ServerError::Internal(_) => {
                locale::ja::message(&CoreError::Internal(String::new())).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_variant_keeps_its_taxonomy_code() {
        let err = ServerError::Core(CoreError::SpeakerNotFound("u1".into()));
        assert_eq!(err.code(), "SPEAKER_NOT_FOUND");
    }

    #[test]
    fn non_core_variants_never_leak_internal_detail() {
        let err = ServerError::Internal("stack trace with secrets".into());
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(!err.client_message().contains("secrets"));
    }
}
