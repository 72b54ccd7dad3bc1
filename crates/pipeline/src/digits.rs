//! Digit normalization dictionary (spec §4.3, mandatory). Maps ASR token text
//! — ASCII digits, English number words, and Japanese digit readings — onto a
//! canonical `Digit`. Unknown tokens normalize to `None` and are dropped by
//! the caller (the Segmenter).

use once_cell::sync::Lazy;
use std::collections::HashMap;
use voxkey_core::Digit;

static DICTIONARY: Lazy<HashMap<&'static str, u8>> = Lazy::new(|| {
    let mut m = HashMap::new();

    let ascii: &[(&str, u8)] = &[
        ("0", 0),
        ("1", 1),
        ("2", 2),
        ("3", 3),
        ("4", 4),
        ("5", 5),
        ("6", 6),
        ("7", 7),
        ("8", 8),
        ("9", 9),
    ];
    for &(digit, d) in ascii {
        m.insert(digit, d);
    }

    let english: &[(&str, u8)] = &[
        ("zero", 0),
        ("one", 1),
        ("two", 2),
        ("three", 3),
        ("four", 4),
        ("five", 5),
        ("six", 6),
        ("seven", 7),
        ("eight", 8),
        ("nine", 9),
    ];
    for &(word, d) in english {
        m.insert(word, d);
    }

    // Japanese digit readings (spec §4.3: zero/seven named explicitly, plus
    // standard readings for the rest).
    let japanese: &[(&str, u8)] = &[
        ("ゼロ", 0),
        ("れい", 0),
        ("マル", 0),
        ("イチ", 1),
        ("いち", 1),
        ("ニ", 2),
        ("に", 2),
        ("サン", 3),
        ("さん", 3),
        ("ヨン", 4),
        ("よん", 4),
        ("シ", 4),
        ("し", 4),
        ("ゴ", 5),
        ("ご", 5),
        ("ロク", 6),
        ("ろく", 6),
        ("ナナ", 7),
        ("なな", 7),
        ("シチ", 7),
        ("しち", 7),
        ("ハチ", 8),
        ("はち", 8),
        ("キュウ", 9),
        ("きゅう", 9),
        ("ク", 9),
        ("く", 9),
    ];
    for &(word, d) in japanese {
        m.insert(word, d);
    }

    m
});

/// Normalize a single ASR token to a canonical digit, or `None` if it isn't
/// one of the recognized forms.
pub fn normalize_token(token: &str) -> Option<Digit> {
    let trimmed = token.trim();
    DICTIONARY
        .get(trimmed)
        .copied()
        .and_then(Digit::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ascii_digits() {
        for d in 0..=9u8 {
            assert_eq!(normalize_token(&d.to_string()).unwrap().value(), d);
        }
    }

    #[test]
    fn normalizes_named_japanese_readings() {
        assert_eq!(normalize_token("ゼロ").unwrap().value(), 0);
        assert_eq!(normalize_token("れい").unwrap().value(), 0);
        assert_eq!(normalize_token("マル").unwrap().value(), 0);
        assert_eq!(normalize_token("ナナ").unwrap().value(), 7);
        assert_eq!(normalize_token("シチ").unwrap().value(), 7);
    }

    #[test]
    fn normalizes_english_number_words() {
        assert_eq!(normalize_token("seven").unwrap().value(), 7);
    }

    #[test]
    fn unknown_tokens_drop_to_none() {
        assert!(normalize_token("the").is_none());
        assert!(normalize_token("").is_none());
    }
}
