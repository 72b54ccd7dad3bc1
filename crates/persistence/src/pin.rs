//! Salted, one-way PIN digesting (spec I5, §4.8: "H(salt ∥ PIN)").
//!
//! The salt is generated per-speaker at commit time and encoded alongside the
//! digest bytes rather than stored in a separate column, so `Speaker.pin_digest`
//! remains a single opaque byte sequence as spec §3 requires.

use rand::RngCore;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

/// Derive `salt ∥ sha256(salt ∥ pin)`, a self-contained digest that carries its
/// own salt for later verification.
pub fn digest(pin: &str) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    digest_with_salt(pin, &salt)
}

fn digest_with_salt(pin: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(pin.as_bytes());
    let hash = hasher.finalize();

    let mut out = Vec::with_capacity(SALT_LEN + hash.len());
    out.extend_from_slice(salt);
    out.extend_from_slice(&hash);
    out
}

/// Constant-time comparison of a candidate PIN against a stored digest.
pub fn verify(pin: &str, stored_digest: &[u8]) -> bool {
    if stored_digest.len() < SALT_LEN {
        return false;
    }
    let salt = &stored_digest[..SALT_LEN];
    let candidate = digest_with_salt(pin, salt);
    constant_time_eq(&candidate, stored_digest)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_does_not_contain_raw_pin() {
        let pin = "1234";
        let d = digest(pin);
        let as_text = String::from_utf8_lossy(&d);
        assert!(!as_text.contains(pin));
    }

    #[test]
    fn verify_accepts_correct_pin_and_rejects_wrong_pin() {
        let d = digest("1234");
        assert!(verify("1234", &d));
        assert!(!verify("4321", &d));
    }

    #[test]
    fn two_digests_of_the_same_pin_differ_by_salt() {
        let a = digest("1234");
        let b = digest("1234");
        assert_ne!(a, b);
        assert!(verify("1234", &a));
        assert!(verify("1234", &b));
    }
}
