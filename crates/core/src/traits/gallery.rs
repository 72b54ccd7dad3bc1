//! The Gallery Store capability (spec §4.6).

use crate::domain::{Digit, DigitCentroid, Gallery, SpeakerId};
use crate::embedding::Embedding;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Persists and retrieves per-speaker, per-digit centroid vectors plus a
/// salted PIN digest. The only shared mutable state in the system (spec §5);
/// implementations are responsible for their own write-serialization
/// discipline (transaction or write-temp+rename).
#[async_trait]
pub trait GalleryStore: Send + Sync + 'static {
    /// Constant-semantics existence check.
    async fn exists(&self, speaker_id: &SpeakerId) -> Result<bool>;

    /// Atomically create a Speaker plus its full ten-digit gallery. Either all
    /// eleven rows appear or none do. Fails with `SpeakerAlreadyExists` if
    /// `speaker_id` is already present — re-enrollment is never an upsert
    /// (DESIGN.md open-question decision 1).
    async fn commit(
        &self,
        speaker_id: &SpeakerId,
        name: Option<&str>,
        pin_digest: Option<&[u8]>,
        centroids: HashMap<Digit, Embedding>,
    ) -> Result<()>;

    /// Load a speaker and its full gallery, or `SpeakerNotFound`.
    async fn load(&self, speaker_id: &SpeakerId) -> Result<Gallery>;

    /// Constant-time comparison of the stored digest against a candidate PIN.
    /// `PinNotSet` if the speaker has no PIN digest; `SpeakerNotFound` if the
    /// speaker doesn't exist.
    async fn verify_pin(&self, speaker_id: &SpeakerId, pin: &str) -> Result<bool>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fakes {
    use super::*;
    use crate::domain::Speaker;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;

    /// An in-memory gallery store for session/state-machine tests that don't
    /// need real persistence, preserving the same atomicity/uniqueness
    /// contract as the SQLite-backed store.
    #[derive(Default)]
    pub struct InMemoryGalleryStore {
        inner: Mutex<StdHashMap<String, Gallery>>,
    }

    #[async_trait]
    impl GalleryStore for InMemoryGalleryStore {
        async fn exists(&self, speaker_id: &SpeakerId) -> Result<bool> {
            Ok(self.inner.lock().contains_key(speaker_id.as_str()))
        }

        async fn commit(
            &self,
            speaker_id: &SpeakerId,
            name: Option<&str>,
            pin_digest: Option<&[u8]>,
            centroids: HashMap<Digit, Embedding>,
        ) -> Result<()> {
            let mut guard = self.inner.lock();
            if guard.contains_key(speaker_id.as_str()) {
                return Err(crate::error::CoreError::SpeakerAlreadyExists(
                    speaker_id.to_string(),
                ));
            }
            let speaker = Speaker {
                id: speaker_id.clone(),
                name: name.map(str::to_string),
                pin_digest: pin_digest.map(|d| d.to_vec()),
                created_at: Utc::now(),
            };
            let centroids = centroids
                .into_iter()
                .map(|(digit, embedding)| DigitCentroid {
                    speaker_id: speaker_id.clone(),
                    digit,
                    embedding,
                })
                .collect();
            guard.insert(
                speaker_id.to_string(),
                Gallery { speaker, centroids },
            );
            Ok(())
        }

        async fn load(&self, speaker_id: &SpeakerId) -> Result<Gallery> {
            self.inner
                .lock()
                .get(speaker_id.as_str())
                .cloned()
                .ok_or_else(|| crate::error::CoreError::SpeakerNotFound(speaker_id.to_string()))
        }

        async fn verify_pin(&self, speaker_id: &SpeakerId, pin: &str) -> Result<bool> {
            let guard = self.inner.lock();
            let gallery = guard
                .get(speaker_id.as_str())
                .ok_or_else(|| crate::error::CoreError::SpeakerNotFound(speaker_id.to_string()))?;
            let digest = gallery
                .speaker
                .pin_digest
                .as_ref()
                .ok_or(crate::error::CoreError::PinNotSet)?;
            // Deterministic fake digest scheme for tests only: sha256(pin) == digest.
            use sha2::{Digest as _, Sha256};
            let candidate = Sha256::digest(pin.as_bytes());
            Ok(candidate.as_slice() == digest.as_slice())
        }
    }
}
