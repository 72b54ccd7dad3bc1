//! The SQLite-backed Gallery Store (spec §4.6).
//!
//! `rusqlite` is synchronous; every public method hands its SQL off to
//! `spawn_blocking` so the session runtime's async tasks never block on disk I/O.
//! The connection is guarded by a `parking_lot::Mutex` rather than shared across
//! a pool — SQLite itself serializes writers, and the Gallery Store is the only
//! shared mutable state in the system (spec §5), so a single connection behind a
//! lock matches the store's own concurrency discipline without adding one of our
//! own on top.

use crate::error::PersistenceError;
use crate::{pin, schema};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use voxkey_core::domain::{Digit, DigitCentroid, Gallery, Speaker, SpeakerId};
use voxkey_core::embedding::Embedding;
use voxkey_core::error::{CoreError, Result as CoreResult};
use voxkey_core::traits::GalleryStore;

pub struct SqliteGalleryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGalleryStore {
    /// Open (creating if necessary) the SQLite database at `path` and ensure its
    /// schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PersistenceError::Storage(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        schema::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        schema::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl GalleryStore for SqliteGalleryStore {
    async fn exists(&self, speaker_id: &SpeakerId) -> CoreResult<bool> {
        let conn = self.conn.clone();
        let id = speaker_id.to_string();
        tokio::task::spawn_blocking(move || exists_blocking(&conn, &id))
            .await
            .map_err(|e| CoreError::Internal(format!("join error: {e}")))?
            .map_err(Into::into)
    }

    async fn commit(
        &self,
        speaker_id: &SpeakerId,
        name: Option<&str>,
        pin_digest: Option<&[u8]>,
        centroids: HashMap<Digit, Embedding>,
    ) -> CoreResult<()> {
        if centroids.len() != 10 {
            return Err(CoreError::Internal(format!(
                "commit requires exactly 10 centroids, got {}",
                centroids.len()
            )));
        }
        let conn = self.conn.clone();
        let id = speaker_id.to_string();
        let name = name.map(str::to_string);
        let pin_digest = pin_digest.map(|d| d.to_vec());
        tokio::task::spawn_blocking(move || commit_blocking(&conn, &id, name, pin_digest, centroids))
            .await
            .map_err(|e| CoreError::Internal(format!("join error: {e}")))?
            .map_err(Into::into)
    }

    async fn load(&self, speaker_id: &SpeakerId) -> CoreResult<Gallery> {
        let conn = self.conn.clone();
        let id = speaker_id.to_string();
        tokio::task::spawn_blocking(move || load_blocking(&conn, &id))
            .await
            .map_err(|e| CoreError::Internal(format!("join error: {e}")))?
            .map_err(Into::into)
    }

    async fn verify_pin(&self, speaker_id: &SpeakerId, pin_value: &str) -> CoreResult<bool> {
        let conn = self.conn.clone();
        let id = speaker_id.to_string();
        let pin_value = pin_value.to_string();
        tokio::task::spawn_blocking(move || verify_pin_blocking(&conn, &id, &pin_value))
            .await
            .map_err(|e| CoreError::Internal(format!("join error: {e}")))?
            .map_err(Into::into)
    }
}

fn exists_blocking(conn: &Mutex<Connection>, speaker_id: &str) -> Result<bool, PersistenceError> {
    let conn = conn.lock();
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM speakers WHERE speaker_id = ?1",
            params![speaker_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn commit_blocking(
    conn: &Mutex<Connection>,
    speaker_id: &str,
    name: Option<String>,
    pin_digest: Option<Vec<u8>>,
    centroids: HashMap<Digit, Embedding>,
) -> Result<(), PersistenceError> {
    let mut conn = conn.lock();
    let tx = conn.transaction()?;

    if exists_in_tx(&tx, speaker_id)? {
        return Err(PersistenceError::SpeakerAlreadyExists(speaker_id.to_string()));
    }

    let created_at = chrono::Utc::now().to_rfc3339();
    let insert_speaker = tx.execute(
        "INSERT INTO speakers (speaker_id, name, pin_digest, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![speaker_id, name, pin_digest, created_at],
    );
    match insert_speaker {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(PersistenceError::SpeakerAlreadyExists(speaker_id.to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    for digit in Digit::ALL {
        let embedding = centroids
            .get(&digit)
            .ok_or_else(|| PersistenceError::Storage(format!("missing digit {digit}")))?;
        tx.execute(
            "INSERT INTO digit_centroids (speaker_id, digit, embedding) VALUES (?1, ?2, ?3)",
            params![speaker_id, digit.value() as i64, embedding.to_le_bytes()],
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn exists_in_tx(tx: &rusqlite::Transaction, speaker_id: &str) -> Result<bool, PersistenceError> {
    let found: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM speakers WHERE speaker_id = ?1",
            params![speaker_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn load_blocking(conn: &Mutex<Connection>, speaker_id: &str) -> Result<Gallery, PersistenceError> {
    let conn = conn.lock();

    let speaker_row: Option<(Option<String>, Option<Vec<u8>>, String)> = conn
        .query_row(
            "SELECT name, pin_digest, created_at FROM speakers WHERE speaker_id = ?1",
            params![speaker_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (name, pin_digest, created_at) = speaker_row
        .ok_or_else(|| PersistenceError::SpeakerNotFound(speaker_id.to_string()))?;

    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());

    let speaker = Speaker {
        id: SpeakerId::from(speaker_id.to_string()),
        name,
        pin_digest,
        created_at,
    };

    let mut stmt = conn.prepare("SELECT digit, embedding FROM digit_centroids WHERE speaker_id = ?1")?;
    let rows = stmt.query_map(params![speaker_id], |row| {
        let digit: i64 = row.get(0)?;
        let embedding: Vec<u8> = row.get(1)?;
        Ok((digit, embedding))
    })?;

    let mut centroids = Vec::with_capacity(10);
    for row in rows {
        let (digit, embedding_bytes) = row?;
        let digit = Digit::new(digit as u8)
            .ok_or_else(|| PersistenceError::Storage(format!("invalid stored digit {digit}")))?;
        let embedding = Embedding::from_le_bytes(&embedding_bytes)
            .ok_or_else(|| PersistenceError::Storage("corrupt embedding bytes".to_string()))?;
        centroids.push(DigitCentroid {
            speaker_id: SpeakerId::from(speaker_id.to_string()),
            digit,
            embedding,
        });
    }

    if centroids.len() != 10 {
        return Err(PersistenceError::Storage(format!(
            "gallery invariant I2 violated: expected 10 centroids, found {}",
            centroids.len()
        )));
    }

    Ok(Gallery { speaker, centroids })
}

fn verify_pin_blocking(
    conn: &Mutex<Connection>,
    speaker_id: &str,
    candidate_pin: &str,
) -> Result<bool, PersistenceError> {
    let conn = conn.lock();
    let digest: Option<Option<Vec<u8>>> = conn
        .query_row(
            "SELECT pin_digest FROM speakers WHERE speaker_id = ?1",
            params![speaker_id],
            |row| row.get(0),
        )
        .optional()?;

    let digest = digest.ok_or_else(|| PersistenceError::SpeakerNotFound(speaker_id.to_string()))?;
    let digest = digest.ok_or(PersistenceError::PinNotSet)?;

    Ok(pin::verify(candidate_pin, &digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_centroids() -> HashMap<Digit, Embedding> {
        Digit::ALL
            .iter()
            .map(|&digit| {
                let mut v = vec![0.0f32; 8];
                v[digit.value() as usize % 8] = 1.0;
                (digit, Embedding::new(v).unwrap())
            })
            .collect()
    }

    #[tokio::test]
    async fn commit_then_load_round_trips_all_ten_digits_as_unit_vectors() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        let id = SpeakerId::from("u1");
        store
            .commit(&id, Some("Taro"), None, sample_centroids())
            .await
            .unwrap();

        let gallery = store.load(&id).await.unwrap();
        assert_eq!(gallery.centroids.len(), 10);
        for digit in Digit::ALL {
            let e = gallery.centroid(digit);
            let norm: f32 = e.as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn duplicate_commit_is_rejected_and_does_not_mutate_gallery() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        let id = SpeakerId::from("u1");
        store.commit(&id, None, None, sample_centroids()).await.unwrap();

        let mut other_centroids = sample_centroids();
        other_centroids.insert(Digit::new(0).unwrap(), Embedding::new(vec![0.0, 1.0]).unwrap());
        let err = store.commit(&id, None, None, other_centroids).await.unwrap_err();
        assert_eq!(err.code(), "SPEAKER_ALREADY_EXISTS");

        let gallery = store.load(&id).await.unwrap();
        assert_eq!(gallery.centroids.len(), 10);
    }

    #[tokio::test]
    async fn verify_pin_requires_correct_pin() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        let id = SpeakerId::from("u1");
        let digest = pin::digest("1234");
        store
            .commit(&id, None, Some(&digest), sample_centroids())
            .await
            .unwrap();

        assert!(store.verify_pin(&id, "1234").await.unwrap());
        assert!(!store.verify_pin(&id, "0000").await.unwrap());
    }

    #[tokio::test]
    async fn verify_pin_without_a_set_pin_fails_with_pin_not_set() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        let id = SpeakerId::from("u1");
        store.commit(&id, None, None, sample_centroids()).await.unwrap();

        let err = store.verify_pin(&id, "1234").await.unwrap_err();
        assert_eq!(err.code(), "PIN_NOT_SET");
    }

    #[tokio::test]
    async fn load_unknown_speaker_fails_with_speaker_not_found() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        let err = store.load(&SpeakerId::from("ghost")).await.unwrap_err();
        assert_eq!(err.code(), "SPEAKER_NOT_FOUND");
    }
}
