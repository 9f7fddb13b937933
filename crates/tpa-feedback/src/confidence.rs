//! Deterministic confidence scoring over accumulated judgment counts.
//!
//! There is no trained state: every score is recomputed from a
//! [`FeedbackIndex`] built at run start.

use tpa_core::TaskCandidate;

use crate::entry::{FeedbackIndex, JudgmentCounts};

const PREFIX_TOKENS: usize = 3;

const WEIGHT_TEXT: f64 = 1.0;
const WEIGHT_PREFIX: f64 = 0.5;
const WEIGHT_SOURCE_REF: f64 = 0.3;
const WEIGHT_SOURCE_KIND: f64 = 0.2;

/// First three whitespace tokens of a normalized text.
///
/// Near-duplicate phrasings ("follow up with finance", "follow up with
/// legal") share a signature so their feedback pools together.
pub fn prefix_signature(normalized_text: &str) -> String {
    normalized_text
        .split_whitespace()
        .take(PREFIX_TOKENS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateReason {
    BelowThreshold,
    /// The exact text was rejected by reviewers too often.
    Suppressed { false_positives: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    Accepted(f64),
    Rejected { score: f64, reason: GateReason },
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceModel {
    threshold: f64,
    suppress_after: u32,
}

impl ConfidenceModel {
    pub fn new(threshold: f64, suppress_after: u32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            suppress_after,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score an implicit candidate against the judgment history, starting
    /// from the prior the candidate carries.
    ///
    /// Explicit-marker candidates always score 1.0.
    pub fn score(&self, candidate: &TaskCandidate, index: &FeedbackIndex) -> f64 {
        if !candidate.is_implicit() {
            return 1.0;
        }

        let exact = index.for_text(&candidate.normalized_text);
        if self.is_suppressed(&exact) {
            return 0.0;
        }

        let groups = [
            (exact, WEIGHT_TEXT),
            (
                index.for_prefix(&prefix_signature(&candidate.normalized_text)),
                WEIGHT_PREFIX,
            ),
            (index.for_source_ref(&candidate.source_ref), WEIGHT_SOURCE_REF),
            (index.for_kind(candidate.source_kind), WEIGHT_SOURCE_KIND),
        ];

        let score = groups
            .iter()
            .filter(|(counts, _)| !counts.is_empty())
            .fold(candidate.confidence, |acc, (counts, weight)| {
                acc + 0.5 * weight * signed_rate(counts)
            });
        score.clamp(0.0, 1.0)
    }

    pub fn gate(&self, candidate: &TaskCandidate, index: &FeedbackIndex) -> Gate {
        if !candidate.is_implicit() {
            return Gate::Accepted(1.0);
        }

        let exact = index.for_text(&candidate.normalized_text);
        if self.is_suppressed(&exact) {
            return Gate::Rejected {
                score: 0.0,
                reason: GateReason::Suppressed {
                    false_positives: exact.false_positive,
                },
            };
        }

        let score = self.score(candidate, index);
        if score >= self.threshold {
            Gate::Accepted(score)
        } else {
            Gate::Rejected {
                score,
                reason: GateReason::BelowThreshold,
            }
        }
    }

    fn is_suppressed(&self, exact: &JudgmentCounts) -> bool {
        self.suppress_after > 0 && exact.false_positive >= self.suppress_after
    }
}

/// Smoothed agreement in (-1, 1); two phantom observations damp small samples.
fn signed_rate(counts: &JudgmentCounts) -> f64 {
    let positive = f64::from(counts.positive());
    let negative = f64::from(counts.false_positive);
    (positive - negative) / (positive + negative + 2.0)
}
