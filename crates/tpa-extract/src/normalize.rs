//! Canonical text form used as the dedup key.

use regex::Regex;
use std::sync::LazyLock;

/// A trailing `(file.ext)` or `(path/file.ext:42)` annotation.
static DECORATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^()\s]+\.[A-Za-z0-9]{1,8}(?::\d+)?\)$").unwrap());

const TRAILING_PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '\u{2026}', '\u{3002}', '\u{3001}', '\u{ff01}', '\u{ff1f}',
];

/// Map raw task text to its dedup key.
///
/// Collapses whitespace, lowercases (unless `case_insensitive` is off) and
/// repeatedly strips trailing punctuation and trailing file annotations.
/// Never fails; text with nothing left normalizes to `""`.
pub fn normalize(raw: &str, case_insensitive: bool) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut text = if case_insensitive {
        collapsed.to_lowercase()
    } else {
        collapsed
    };

    loop {
        let before = text.len();
        if let Some(decoration) = DECORATION_RE.find(&text) {
            text.truncate(decoration.start());
        }
        let kept = text.trim_end_matches(TRAILING_PUNCTUATION).trim_end().len();
        text.truncate(kept);
        if text.len() == before {
            break;
        }
    }
    text
}
