//! Application state: the capability trait objects, worker pool, and session
//! manager shared across every connection (spec §5: "Sessions... share only
//! (a) the read-mostly model handles and (b) the gallery store").

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use voxkey_config::Settings;
use voxkey_core::traits::{Asr, AudioDecoder, EmbeddingExtractor, GalleryStore, Vad};
use voxkey_pipeline::WorkerPool;

use crate::session::SessionManager;

/// Shared across every WebSocket connection. Cloning is cheap: every field is
/// an `Arc` (or `Arc<RwLock<_>>` for the hot-reloadable config).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Settings>>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub vad: Arc<dyn Vad>,
    pub asr: Arc<dyn Asr>,
    pub extractor: Arc<dyn EmbeddingExtractor>,
    pub gallery: Arc<dyn GalleryStore>,
    pub pool: Arc<WorkerPool>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        decoder: Arc<dyn AudioDecoder>,
        vad: Arc<dyn Vad>,
        asr: Arc<dyn Asr>,
        extractor: Arc<dyn EmbeddingExtractor>,
        gallery: Arc<dyn GalleryStore>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(settings.pipeline.worker_pool_size));
        let sessions = Arc::new(SessionManager::new(
            settings.server.max_connections,
            Duration::from_secs(settings.server.idle_timeout_seconds),
            Duration::from_secs(30),
        ));

        Self {
            config: Arc::new(RwLock::new(settings)),
            decoder,
            vad,
            asr,
            extractor,
            gallery,
            pool,
            sessions,
        }
    }

    pub fn current_settings(&self) -> Settings {
        self.config.read().clone()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.config.read().server.idle_timeout_seconds)
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.config.read().gallery.similarity_threshold
    }

    pub fn reload_config(&self, new_settings: Settings) {
        *self.config.write() = new_settings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxkey_config::Settings;
    use voxkey_core::traits::fakes::{
        AlwaysSpeechVad, DeterministicExtractor, InMemoryGalleryStore, PlantedAsr, RawPcmDecoder,
    };

    fn test_state() -> AppState {
        AppState::new(
            Settings::default(),
            Arc::new(RawPcmDecoder),
            Arc::new(AlwaysSpeechVad),
            Arc::new(PlantedAsr::new("4326")),
            Arc::new(DeterministicExtractor::new(192)),
            Arc::new(InMemoryGalleryStore::default()),
        )
    }

    #[test]
    fn reload_config_replaces_settings_atomically() {
        let state = test_state();
        assert!((state.similarity_threshold() - 0.75).abs() < 1e-6);

        let mut updated = state.current_settings();
        updated.gallery.similarity_threshold = 0.9;
        state.reload_config(updated);

        assert!((state.similarity_threshold() - 0.9).abs() < 1e-6);
    }
}
