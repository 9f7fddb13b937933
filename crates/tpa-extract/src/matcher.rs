//! Explicit task markers in line-oriented text.

use regex::Regex;
use std::sync::LazyLock;
use tpa_core::{DetectedState, SourceKind, TaskCandidate};

use crate::normalize::normalize;

/// All markers in one alternation so the leftmost one on a line wins.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)-\s*\[(?P<mark>\s*|x)\]|\b(?P<kw>TODO|FIXME|XXX):").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    ChecklistOpen,
    ChecklistDone,
    Todo,
    Fixme,
    Xxx,
}

impl Marker {
    pub fn detected_state(self) -> DetectedState {
        match self {
            Self::ChecklistDone => DetectedState::Completed,
            _ => DetectedState::Open,
        }
    }
}

/// Find the first marker on `line` and return it with the trimmed remainder.
pub fn match_line(line: &str) -> Option<(Marker, &str)> {
    let caps = MARKER_RE.captures(line)?;
    let whole = caps.get(0)?;
    let marker = if let Some(mark) = caps.name("mark") {
        if mark.as_str().eq_ignore_ascii_case("x") {
            Marker::ChecklistDone
        } else {
            Marker::ChecklistOpen
        }
    } else {
        match caps.name("kw")?.as_str().to_ascii_uppercase().as_str() {
            "TODO" => Marker::Todo,
            "FIXME" => Marker::Fixme,
            _ => Marker::Xxx,
        }
    };
    Some((marker, line[whole.end()..].trim()))
}

/// Lazy candidate sequence over one source text.
///
/// A clone taken before iteration yields the same candidates again.
#[derive(Debug, Clone)]
pub struct Candidates<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    kind: SourceKind,
    source_ref: &'a str,
    case_insensitive: bool,
}

/// Scan `text` for explicit markers.
///
/// Git diffs only contribute their added lines (`+`, not the `+++` header).
pub fn scan<'a>(
    text: &'a str,
    kind: SourceKind,
    source_ref: &'a str,
    case_insensitive: bool,
) -> Candidates<'a> {
    Candidates {
        lines: text.lines().enumerate(),
        kind,
        source_ref,
        case_insensitive,
    }
}

impl Iterator for Candidates<'_> {
    type Item = TaskCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        for (idx, line) in self.lines.by_ref() {
            let line = if self.kind == SourceKind::GitDiff {
                match line.strip_prefix('+') {
                    Some(added) if !line.starts_with("+++") => added,
                    _ => continue,
                }
            } else {
                line
            };

            let Some((marker, raw)) = match_line(line) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            return Some(TaskCandidate::explicit(
                raw.to_string(),
                normalize(raw, self.case_insensitive),
                self.kind,
                self.source_ref,
                marker.detected_state(),
                idx + 1,
            ));
        }
        None
    }
}
