//! Persistence error taxonomy, mapped onto `voxkey_core::CoreError` at the
//! `GalleryStore` trait boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("speaker not found: {0}")]
    SpeakerNotFound(String),

    #[error("speaker already exists: {0}")]
    SpeakerAlreadyExists(String),

    #[error("PIN not set for speaker")]
    PinNotSet,

    #[error("schema error: {0}")]
    Schema(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Caller maps this to SpeakerAlreadyExists with the speaker_id it
                // attempted to insert; this generic variant covers any other
                // constraint failure we didn't anticipate.
                PersistenceError::Storage(format!("constraint violation: {}", err))
            }
            _ => PersistenceError::Storage(err.to_string()),
        }
    }
}

impl From<PersistenceError> for voxkey_core::CoreError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::SpeakerNotFound(id) => voxkey_core::CoreError::SpeakerNotFound(id),
            PersistenceError::SpeakerAlreadyExists(id) => {
                voxkey_core::CoreError::SpeakerAlreadyExists(id)
            }
            PersistenceError::PinNotSet => voxkey_core::CoreError::PinNotSet,
            PersistenceError::Schema(msg) => voxkey_core::CoreError::Internal(msg),
            PersistenceError::Storage(msg) => voxkey_core::CoreError::Internal(msg),
        }
    }
}
