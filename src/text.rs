//! Case and diacritic insensitive text comparison used for sheet names and row labels.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Uppercases and trims `text`, then removes combining marks after canonical decomposition, so
/// that `"México"` and `"MEXICO"` compare equal.
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_uppercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// True when either normalized string contains the other. Empty strings never match.
pub fn overlaps(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(b) || b.contains(a)
}
