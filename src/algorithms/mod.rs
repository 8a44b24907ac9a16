//! Name-keyed registry of blocking-key encodings and field comparators.
//!
//! The set of algorithms is fixed at construction time; components receive
//! a `&AlgorithmRegistry` and look implementations up by the names used in
//! the project descriptor. An unknown name is a configuration error.

mod phonetic;

use std::collections::HashMap;

use strsim::{jaro_winkler, levenshtein};

use crate::config::ComparisonArgs;
use crate::error::ConfigError;

/// Transformation applied to blocking columns before the equi-join.
/// `None` means the value has no usable key (blank input), never an error.
pub trait Encoding: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, value: &str) -> Option<String>;
}

/// Pairwise field comparison. `None` propagates as "no match" when either
/// side is blank or unusable for the comparison.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &'static str;
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool>;
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

// --- Encodings ---

struct IdentityEncoding;

impl Encoding for IdentityEncoding {
    fn name(&self) -> &'static str {
        "EXACT"
    }
    fn encode(&self, value: &str) -> Option<String> {
        non_blank(value).map(str::to_string)
    }
}

struct SoundexEncoding;

impl Encoding for SoundexEncoding {
    fn name(&self) -> &'static str {
        "SOUNDEX"
    }
    fn encode(&self, value: &str) -> Option<String> {
        phonetic::soundex(value)
    }
}

struct NysiisEncoding;

impl Encoding for NysiisEncoding {
    fn name(&self) -> &'static str {
        "NYSIIS"
    }
    fn encode(&self, value: &str) -> Option<String> {
        phonetic::nysiis(value)
    }
}

struct MetaphoneEncoding;

impl Encoding for MetaphoneEncoding {
    fn name(&self) -> &'static str {
        "METAPHONE"
    }
    fn encode(&self, value: &str) -> Option<String> {
        phonetic::metaphone(value)
    }
}

// --- Comparators ---

struct ExactComparator;

impl Comparator for ExactComparator {
    fn name(&self) -> &'static str {
        "EXACT"
    }
    fn compare(&self, a: &str, b: &str, _args: &ComparisonArgs) -> Option<bool> {
        Some(non_blank(a)? == non_blank(b)?)
    }
}

struct SoundexComparator;

impl Comparator for SoundexComparator {
    fn name(&self) -> &'static str {
        "SOUNDEX"
    }
    fn compare(&self, a: &str, b: &str, _args: &ComparisonArgs) -> Option<bool> {
        Some(phonetic::soundex(a)? == phonetic::soundex(b)?)
    }
}

struct NysiisComparator;

impl Comparator for NysiisComparator {
    fn name(&self) -> &'static str {
        "NYSIIS"
    }
    fn compare(&self, a: &str, b: &str, _args: &ComparisonArgs) -> Option<bool> {
        Some(phonetic::nysiis(a)? == phonetic::nysiis(b)?)
    }
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Compares `[start, end)` character slices of both values.
struct SliceMatch;

impl Comparator for SliceMatch {
    fn name(&self) -> &'static str {
        "SLICE_MATCH"
    }
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool> {
        let a = non_blank(a)?;
        let b = non_blank(b)?;
        let start = args.start.unwrap_or(0);
        let end = args.end.unwrap_or(0);
        Some(char_slice(a, start, end) == char_slice(b, start, end))
    }
}

/// Compares the first `n` characters of both values.
struct HeadMatch;

impl Comparator for HeadMatch {
    fn name(&self) -> &'static str {
        "HEAD_MATCH"
    }
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool> {
        let a = non_blank(a)?;
        let b = non_blank(b)?;
        let n = args.n.unwrap_or(0);
        Some(char_slice(a, 0, n) == char_slice(b, 0, n))
    }
}

/// Compares the last `n` characters of both values.
struct TailMatch;

impl Comparator for TailMatch {
    fn name(&self) -> &'static str {
        "TAIL_MATCH"
    }
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool> {
        let a = non_blank(a)?;
        let b = non_blank(b)?;
        let n = args.n.unwrap_or(0);
        let tail = |s: &str| -> String {
            let count = s.chars().count();
            s.chars().skip(count.saturating_sub(n)).collect()
        };
        Some(tail(a) == tail(b))
    }
}

/// Both values must have exactly `length` characters.
struct FixedLength;

impl Comparator for FixedLength {
    fn name(&self) -> &'static str {
        "FIXED_LEN"
    }
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool> {
        let a = non_blank(a)?;
        let b = non_blank(b)?;
        let length = args.length.unwrap_or(0);
        Some(a.chars().count() == length && b.chars().count() == length)
    }
}

/// Both values must equal the declared constant.
struct FixedValue;

impl Comparator for FixedValue {
    fn name(&self) -> &'static str {
        "FIXED_VAL"
    }
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool> {
        let a = non_blank(a)?;
        let b = non_blank(b)?;
        let expected = args.value.as_deref()?;
        Some(a == expected && b == expected)
    }
}

/// Absolute numeric difference within a threshold.
struct AbsDiff;

impl Comparator for AbsDiff {
    fn name(&self) -> &'static str {
        "ABS_DIFF"
    }
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool> {
        let a: f64 = non_blank(a)?.parse().ok()?;
        let b: f64 = non_blank(b)?.parse().ok()?;
        let threshold = args.threshold.unwrap_or(0.0);
        Some((a - b).abs() <= threshold)
    }
}

/// Levenshtein edit distance within `max_edits`.
struct LevenshteinComparator;

impl Comparator for LevenshteinComparator {
    fn name(&self) -> &'static str {
        "LEVENSHTEIN"
    }
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool> {
        let a = non_blank(a)?;
        let b = non_blank(b)?;
        let max_edits = args.max_edits.unwrap_or(0);
        Some(levenshtein(a, b) <= max_edits)
    }
}

/// Jaro-Winkler similarity at or above a threshold.
struct JaroWinklerComparator;

impl Comparator for JaroWinklerComparator {
    fn name(&self) -> &'static str {
        "JARO_WINKLER"
    }
    fn compare(&self, a: &str, b: &str, args: &ComparisonArgs) -> Option<bool> {
        let a = non_blank(a)?;
        let b = non_blank(b)?;
        let threshold = args.threshold.unwrap_or(1.0);
        Some(jaro_winkler(a, b) >= threshold)
    }
}

/// Fixed lookup of encodings and comparators, built once at startup and
/// passed by reference into the components that need it.
pub struct AlgorithmRegistry {
    encodings: HashMap<&'static str, Box<dyn Encoding>>,
    comparators: HashMap<&'static str, Box<dyn Comparator>>,
}

impl AlgorithmRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            encodings: HashMap::new(),
            comparators: HashMap::new(),
        };
        registry.add_encoding(Box::new(IdentityEncoding));
        registry.add_encoding(Box::new(SoundexEncoding));
        registry.add_encoding(Box::new(NysiisEncoding));
        registry.add_encoding(Box::new(MetaphoneEncoding));

        registry.add_comparator(Box::new(ExactComparator));
        registry.add_comparator(Box::new(SoundexComparator));
        registry.add_comparator(Box::new(NysiisComparator));
        registry.add_comparator(Box::new(SliceMatch));
        registry.add_comparator(Box::new(HeadMatch));
        registry.add_comparator(Box::new(TailMatch));
        registry.add_comparator(Box::new(FixedLength));
        registry.add_comparator(Box::new(FixedValue));
        registry.add_comparator(Box::new(AbsDiff));
        registry.add_comparator(Box::new(LevenshteinComparator));
        registry.add_comparator(Box::new(JaroWinklerComparator));
        registry
    }

    fn add_encoding(&mut self, encoding: Box<dyn Encoding>) {
        self.encodings.insert(encoding.name(), encoding);
    }

    fn add_comparator(&mut self, comparator: Box<dyn Comparator>) {
        self.comparators.insert(comparator.name(), comparator);
    }

    pub fn encoding(&self, name: &str) -> Result<&dyn Encoding, ConfigError> {
        self.encodings
            .get(name)
            .map(|e| e.as_ref())
            .ok_or_else(|| ConfigError::UnknownAlgorithm {
                name: name.to_string(),
            })
    }

    pub fn comparator(&self, name: &str) -> Result<&dyn Comparator, ConfigError> {
        self.comparators
            .get(name)
            .map(|c| c.as_ref())
            .ok_or_else(|| ConfigError::UnknownAlgorithm {
                name: name.to_string(),
            })
    }
}
