//! Per-connection session bookkeeping (spec §4.10). Each accepted duplex
//! connection registers one `Session` here; a background cleanup task sweeps
//! entries that have gone idle past the configured timeout. The enrollment/
//! verification state machines themselves live inside the connection's own
//! task (`crate::websocket`) — this manager only tracks liveness for metrics
//! and the idle-timeout safety net; per-connection protocol state does not
//! live here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::ServerError;

pub struct Session {
    pub id: String,
    pub created_at: Instant,
    last_activity: RwLock<Instant>,
    active: RwLock<bool>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            active: RwLock::new(true),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    pub fn close(&self) {
        *self.active.write() = false;
    }

    pub fn is_active(&self) -> bool {
        *self.active.read()
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, session_timeout: Duration, cleanup_interval: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            session_timeout,
            cleanup_interval,
        }
    }

    pub fn create(&self, id: String) -> Result<Arc<Session>, ServerError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(ServerError::Session(format!(
                "connection limit reached ({} active)",
                self.max_sessions
            )));
        }
        let session = Arc::new(Session::new(id.clone()));
        sessions.insert(id, session.clone());
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if let Some(session) = &removed {
            session.close();
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Remove and close every session that has gone idle past the configured
    /// timeout, returning how many were swept. The connection's own idle
    /// timer (`crate::runtime::IdleTimer`) is the primary enforcement path;
    /// this is a backstop for connections whose task has wedged.
    pub fn cleanup_expired(&self) -> usize {
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| s.is_expired(self.session_timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }

    /// Spawn the periodic cleanup loop, returning a `watch::Sender` the
    /// caller signals `true` on to stop it (teacher's `session.rs` idiom).
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (tx, mut rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = self.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = manager.cleanup_expired();
                        if swept > 0 {
                            debug!(swept, "cleanup task swept idle sessions");
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            info!("session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_and_remove_round_trip() {
        let manager = SessionManager::new(10, Duration::from_secs(60), Duration::from_secs(30));
        let session = manager.create("s1".into()).unwrap();
        assert!(session.is_active());
        assert_eq!(manager.count(), 1);
        assert!(manager.get("s1").is_some());
        manager.remove("s1");
        assert_eq!(manager.count(), 0);
        assert!(!session.is_active());
    }

    #[test]
    fn create_rejects_past_max_sessions() {
        let manager = SessionManager::new(1, Duration::from_secs(60), Duration::from_secs(30));
        manager.create("s1".into()).unwrap();
        let err = manager.create("s2".into()).unwrap_err();
        assert!(matches!(err, ServerError::Session(_)));
    }

    #[test]
    fn cleanup_expired_sweeps_idle_sessions_only() {
        let manager = SessionManager::new(10, Duration::from_millis(10), Duration::from_secs(30));
        manager.create("stale".into()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let fresh = manager.create("fresh".into()).unwrap();
        fresh.touch();

        let swept = manager.cleanup_expired();
        assert_eq!(swept, 1);
        assert!(manager.get("stale").is_none());
        assert!(manager.get("fresh").is_some());
    }

    #[tokio::test]
    async fn cleanup_task_stops_on_shutdown_signal() {
        let manager = Arc::new(SessionManager::new(10, Duration::from_secs(60), Duration::from_millis(5)));
        let shutdown = manager.start_cleanup_task();
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
