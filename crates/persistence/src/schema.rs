//! SQLite schema for the Gallery Store.

use crate::error::PersistenceError;
use rusqlite::Connection;

/// Create the `speakers` and `digit_centroids` tables if they don't already
/// exist. Idempotent: safe to call on every startup.
pub fn ensure_schema(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS speakers (
            speaker_id   TEXT PRIMARY KEY,
            name         TEXT,
            pin_digest   BLOB,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS digit_centroids (
            speaker_id   TEXT NOT NULL REFERENCES speakers(speaker_id),
            digit        INTEGER NOT NULL,
            embedding    BLOB NOT NULL,
            PRIMARY KEY (speaker_id, digit)
        );
        "#,
    )
    .map_err(|e| PersistenceError::Schema(e.to_string()))?;

    Ok(())
}
