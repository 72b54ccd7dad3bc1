//! The Prompt Generator (spec §4.7). Both modes draw from `OsRng`, the
//! cryptographically-strong source the spec requires so prompts can't be
//! predicted across sessions.

use rand::{rngs::OsRng, Rng};

const BALANCED_SET_COUNT: usize = 5;
const BALANCED_SET_LEN: usize = 4;
const MAX_ADJACENCY_RETRIES: usize = 64;

/// Draw five balanced four-digit strings: each digit 0-9 appears exactly
/// twice across the twenty positions, and no string repeats a digit in
/// adjacent positions (spec I3, P1).
pub fn balanced_prompts() -> [String; BALANCED_SET_COUNT] {
    let mut rng = OsRng;

    let mut multiset: Vec<u8> = (0..=9u8).flat_map(|d| [d, d]).collect();

    for attempt in 0..=MAX_ADJACENCY_RETRIES {
        shuffle(&mut rng, &mut multiset);

        let groups: Vec<Vec<u8>> = multiset
            .chunks(BALANCED_SET_LEN)
            .map(|c| c.to_vec())
            .collect();

        if groups.iter().all(|g| !has_adjacent_repeat(g)) {
            let mut out: [String; BALANCED_SET_COUNT] = Default::default();
            for (i, group) in groups.into_iter().enumerate() {
                out[i] = group.iter().map(|d| (b'0' + d) as char).collect();
            }
            return out;
        }

        if attempt == MAX_ADJACENCY_RETRIES {
            // Exceedingly unlikely with a 20-element multiset; fall back to a
            // per-group local fix-up rather than looping forever.
            let mut out: [String; BALANCED_SET_COUNT] = Default::default();
            for (i, group) in groups.into_iter().enumerate() {
                out[i] = fix_adjacency(group)
                    .iter()
                    .map(|d| (b'0' + d) as char)
                    .collect();
            }
            return out;
        }
    }

    unreachable!("loop always returns by the final attempt");
}

/// Draw a single uniformly-random digit string of `length` (spec: *L* in
/// [4, 6]). No uniqueness or adjacency constraint.
pub fn challenge_prompt(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| (b'0' + rng.gen_range(0..=9u8)) as char)
        .collect()
}

fn has_adjacent_repeat(group: &[u8]) -> bool {
    group.windows(2).any(|w| w[0] == w[1])
}

/// Swap any adjacent-equal pair with a later, non-conflicting element. Used
/// only on the rare adjacency-retry exhaustion path.
fn fix_adjacency(mut group: Vec<u8>) -> Vec<u8> {
    for i in 0..group.len() {
        if i > 0 && group[i] == group[i - 1] {
            if let Some(j) = (i + 1..group.len()).find(|&j| group[j] != group[i - 1]) {
                group.swap(i, j);
            }
        }
    }
    group
}

fn shuffle<R: Rng + ?Sized>(rng: &mut R, items: &mut [u8]) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn balanced_prompts_satisfy_p1() {
        for _ in 0..200 {
            let prompts = balanced_prompts();
            let mut counts: HashMap<char, usize> = HashMap::new();
            for p in &prompts {
                assert_eq!(p.len(), BALANCED_SET_LEN);
                assert!(!p.as_bytes().windows(2).any(|w| w[0] == w[1]));
                for c in p.chars() {
                    *counts.entry(c).or_default() += 1;
                }
            }
            assert_eq!(counts.len(), 10);
            for d in '0'..='9' {
                assert_eq!(counts[&d], 2, "digit {d} did not appear exactly twice");
            }
        }
    }

    #[test]
    fn challenge_prompts_respect_requested_length() {
        for len in 4..=6 {
            let p = challenge_prompt(len);
            assert_eq!(p.len(), len);
            assert!(p.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
