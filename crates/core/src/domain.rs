//! The persisted data model (spec §3): Speaker and its ten-digit centroid gallery.
//!
//! Both types are plain data — the Gallery Store trait owns their lifecycle, and
//! neither type holds a back-reference to the other (spec §9: "the data model is a
//! tree... avoid any back-references from centroids to speakers in memory").

use crate::embedding::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, externally-supplied speaker identifier, unique across active speakers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeakerId(pub String);

impl SpeakerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SpeakerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SpeakerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A digit in 0..=9, the unit the enrollment/verification gallery is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digit(u8);

impl Digit {
    pub const ALL: [Digit; 10] = [
        Digit(0),
        Digit(1),
        Digit(2),
        Digit(3),
        Digit(4),
        Digit(5),
        Digit(6),
        Digit(7),
        Digit(8),
        Digit(9),
    ];

    /// Construct a digit, returning `None` if `value` is not in 0..=9.
    pub fn new(value: u8) -> Option<Self> {
        if value <= 9 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Parse a single ASCII digit character.
    pub fn from_char(c: char) -> Option<Self> {
        c.to_digit(10).and_then(|d| Digit::new(d as u8))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn as_char(&self) -> char {
        (b'0' + self.0) as char
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// An enrolled identity (spec §3).
///
/// Lifecycle: created atomically with its ten `DigitCentroid`s at enrollment
/// commit; never mutated afterwards except that a PIN digest may be replaced by
/// re-enrollment — which this implementation rejects outright (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub id: SpeakerId,
    pub name: Option<String>,
    /// Opaque salted digest, see `voxkey_persistence::pin` for derivation.
    pub pin_digest: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// One record per (Speaker, digit). The embedding is the L2-normalized mean of
/// exactly two enrollment-time embeddings for that digit (spec I3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitCentroid {
    pub speaker_id: SpeakerId,
    pub digit: Digit,
    pub embedding: Embedding,
}

/// The full ten-digit gallery for one speaker, returned by `GalleryStore::load`.
#[derive(Debug, Clone)]
pub struct Gallery {
    pub speaker: Speaker,
    pub centroids: Vec<DigitCentroid>,
}

impl Gallery {
    /// Look up the centroid for a digit. Panics if the gallery is incomplete —
    /// callers must only construct a `Gallery` that satisfies invariant I2.
    pub fn centroid(&self, digit: Digit) -> &Embedding {
        self.centroids
            .iter()
            .find(|c| c.digit == digit)
            .map(|c| &c.embedding)
            .expect("gallery invariant I2 violated: missing digit centroid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_round_trips_through_char() {
        for d in 0..=9u8 {
            let digit = Digit::new(d).unwrap();
            assert_eq!(Digit::from_char(digit.as_char()).unwrap(), digit);
        }
    }

    #[test]
    fn digit_rejects_out_of_range() {
        assert!(Digit::new(10).is_none());
        assert!(Digit::from_char('a').is_none());
    }

    #[test]
    fn all_covers_zero_through_nine() {
        let values: Vec<u8> = Digit::ALL.iter().map(|d| d.value()).collect();
        assert_eq!(values, (0..=9).collect::<Vec<_>>());
    }
}
