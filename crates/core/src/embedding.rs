//! Fixed-dimension speaker embeddings: L2 normalization and cosine similarity.
//!
//! The `Embedding` newtype enforces normalization at construction so that every
//! centroid and every comparison vector flowing through the system is guaranteed
//! to be a unit vector, matching invariant I3 and testable property P6.

use serde::{Deserialize, Serialize};

/// A unit-normalized, fixed-dimension vector.
///
/// `Embedding::new` normalizes on construction; there is no way to obtain an
/// `Embedding` whose norm is not (within floating point error) 1.0, short of
/// `from_raw_unchecked` which exists only for round-tripping bytes already known
/// to be normalized (used by the Gallery Store on load).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Build a normalized embedding from a raw vector. Returns `None` if the
    /// vector has zero norm (undefined direction).
    pub fn new(raw: Vec<f32>) -> Option<Self> {
        let norm = l2_norm(&raw);
        if norm == 0.0 || !norm.is_finite() {
            return None;
        }
        Some(Self(raw.into_iter().map(|x| x / norm).collect()))
    }

    /// Wrap an already-normalized vector without re-normalizing, e.g. when
    /// reading bit-exact bytes back out of the Gallery Store.
    pub fn from_raw_unchecked(v: Vec<f32>) -> Self {
        Self(v)
    }

    /// The arithmetic mean of a set of embeddings, re-normalized (the centroid
    /// computation of spec §4.8: "L2-normalization of the arithmetic mean").
    pub fn mean(embeddings: &[Embedding]) -> Option<Self> {
        let dim = embeddings.first()?.0.len();
        let mut acc = vec![0.0f32; dim];
        for e in embeddings {
            if e.0.len() != dim {
                return None;
            }
            for (a, v) in acc.iter_mut().zip(e.0.iter()) {
                *a += v;
            }
        }
        for a in acc.iter_mut() {
            *a /= embeddings.len() as f32;
        }
        Embedding::new(acc)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    /// Pack to raw little-endian float32 bytes, the canonical Gallery Store
    /// column encoding (spec §4.6).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Unpack from raw little-endian float32 bytes written by `to_le_bytes`.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let v: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self::from_raw_unchecked(v))
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between two vectors: the dot product of their
/// L2-normalized forms. No clamping (spec §4.9).
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    debug_assert_eq!(a.dim(), b.dim(), "embeddings must share a dimension");
    a.0.iter().zip(b.0.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_to_unit_length() {
        let e = Embedding::new(vec![3.0, 4.0, 0.0]).unwrap();
        let norm = l2_norm(e.as_slice());
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_has_no_direction() {
        assert!(Embedding::new(vec![0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn cosine_identity_p6() {
        let v = Embedding::new(vec![1.0, 2.0, -3.0]).unwrap();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);

        let neg = Embedding::new(v.as_slice().iter().map(|x| -x).collect()).unwrap();
        assert!((cosine_similarity(&v, &neg) - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let a = Embedding::new(vec![1.0, 0.0]).unwrap();
        let b = Embedding::new(vec![0.0, 1.0]).unwrap();
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn mean_of_two_then_normalize_matches_centroid_rule() {
        let a = Embedding::new(vec![1.0, 0.0]).unwrap();
        let b = Embedding::new(vec![0.0, 1.0]).unwrap();
        let centroid = Embedding::mean(&[a, b]).unwrap();
        let norm = l2_norm(centroid.as_slice());
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn byte_round_trip_is_bit_exact() {
        let e = Embedding::new(vec![0.5, -0.25, 0.125, 0.75]).unwrap();
        let bytes = e.to_le_bytes();
        let back = Embedding::from_le_bytes(&bytes).unwrap();
        assert_eq!(e.as_slice(), back.as_slice());
    }
}
