//! Phonetic encoding helpers shared by the blocking encoders and the
//! encode-then-compare comparators.

use rphonetic::{Encoder, Metaphone, Nysiis, Soundex};
use unicode_normalization::UnicodeNormalization;

/// Normalize a string for phonetic encoding: decompose diacritics, keep
/// ASCII letters and single spaces, map a few common non-ASCII characters.
pub(crate) fn normalize_for_phonetic(s: &str) -> String {
    let s = s.trim();
    let mut out = String::with_capacity(s.len());
    for ch in s.nfd() {
        for lc in ch.to_lowercase() {
            if lc.is_ascii_alphabetic() {
                out.push(lc);
            } else if lc.is_ascii_whitespace() {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            } else {
                match lc {
                    'ß' => out.push_str("ss"),
                    'æ' | 'ǽ' => out.push_str("ae"),
                    'ø' => out.push('o'),
                    'đ' => out.push('d'),
                    _ => {}
                }
            }
        }
    }
    let new_len = out.trim_end().len();
    out.truncate(new_len);
    out
}

fn encode_guarded<F>(value: &str, label: &str, encode: F) -> Option<String>
where
    F: FnOnce(&str) -> String + std::panic::UnwindSafe,
{
    let cleaned = normalize_for_phonetic(value);
    if cleaned.is_empty() {
        return None;
    }
    // Protect against panics inside rphonetic by catching unwinds
    match std::panic::catch_unwind(move || encode(&cleaned)) {
        Ok(code) if !code.is_empty() => Some(code),
        Ok(_) => None,
        Err(_) => {
            log::warn!("{} encoder panicked on input: {:?}", label, value);
            None
        }
    }
}

pub(crate) fn soundex(value: &str) -> Option<String> {
    encode_guarded(value, "Soundex", |s| Soundex::default().encode(s))
}

pub(crate) fn nysiis(value: &str) -> Option<String> {
    encode_guarded(value, "Nysiis", |s| Nysiis::default().encode(s))
}

pub(crate) fn metaphone(value: &str) -> Option<String> {
    encode_guarded(value, "Metaphone", |s| Metaphone::default().encode(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_diacritics_and_case() {
        assert_eq!(normalize_for_phonetic("  JOSÉ  "), "jose");
        assert_eq!(normalize_for_phonetic("Anne-Marie"), "annemarie");
        assert_eq!(normalize_for_phonetic("van  der Berg"), "van der berg");
    }

    #[test]
    fn soundex_groups_similar_surnames() {
        assert_eq!(soundex("Robert"), soundex("Rupert"));
        assert_ne!(soundex("Robert"), soundex("Ashcraft"));
    }

    #[test]
    fn blank_input_has_no_code() {
        assert_eq!(soundex("   "), None);
        assert_eq!(nysiis(""), None);
        assert_eq!(metaphone("123"), None);
    }
}
