//! Metadata string normalization.
//!
//! All comparisons in the matcher run on normalized strings: NFC, lowercase,
//! featured-artist and remaster decorations stripped, punctuation dropped,
//! whitespace collapsed.

use unicode_normalization::UnicodeNormalization;

/// Normalize a title or artist string for comparison and indexing.
pub fn normalize(s: &str) -> String {
    let lowered = s.trim().nfc().collect::<String>().to_lowercase();
    let stripped = strip_remaster_suffix(&strip_featured(&lowered));

    stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop featured-artist decorations: "song (feat. X)", "song ft. X", etc.
fn strip_featured(s: &str) -> String {
    for pattern in &["(feat", "(ft.", "[feat", "[ft.", " feat. ", " ft. ", " featuring "] {
        if let Some(pos) = s.find(pattern) {
            return s[..pos].to_string();
        }
    }
    s.to_string()
}

/// Drop "remastered" suffixes and trailing parenthesized years.
///
/// Handles the common shapes: "track - 2011 remaster", "track (remastered)",
/// "track (2009 remastered version)", "track (1994)".
fn strip_remaster_suffix(s: &str) -> String {
    let mut out = s.to_string();

    if let Some(idx) = out.find("remaster") {
        let head = &out[..idx];
        let cut = head
            .rfind('(')
            .or_else(|| head.rfind('['))
            .or_else(|| head.rfind(" - "));
        if let Some(cut) = cut {
            out.truncate(cut);
        }
    }

    // Trailing "(1987)" style year suffix.
    let trimmed = out.trim_end();
    if trimmed.ends_with(')') && trimmed.len() >= 6 {
        let open = trimmed.rfind('(');
        if let Some(open) = open {
            let inner = &trimmed[open + 1..trimmed.len() - 1];
            if inner.len() == 4 && inner.chars().all(|c| c.is_ascii_digit()) {
                out.truncate(open);
            }
        }
    }

    out
}
