use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tpa_core::{FeedbackEntry, Judgment, SourceKind};

use crate::confidence::prefix_signature;

/// An implicit suggestion surfaced by a run, waiting for a reviewer verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub normalized_text: String,
    pub display_text: String,
    pub source_ref: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub surfaced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentCounts {
    pub confirmed: u32,
    pub false_positive: u32,
    pub missed: u32,
}

impl JudgmentCounts {
    pub fn add(&mut self, judgment: Judgment) {
        match judgment {
            Judgment::Confirmed => self.confirmed += 1,
            Judgment::FalsePositive => self.false_positive += 1,
            Judgment::Missed => self.missed += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.confirmed + self.false_positive + self.missed
    }

    /// Judgments arguing for surfacing similar text.
    pub fn positive(&self) -> u32 {
        self.confirmed + self.missed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Aggregation key for [`crate::FeedbackStore::aggregate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateKey {
    /// Entries whose normalized text starts with this prefix.
    TextPrefix(String),
    SourceKind(SourceKind),
}

/// Counters over the whole judgment log, grouped by candidate signature.
///
/// Built once per run; the confidence model is a pure function over it.
#[derive(Debug, Clone, Default)]
pub struct FeedbackIndex {
    by_text: HashMap<String, JudgmentCounts>,
    by_prefix: HashMap<String, JudgmentCounts>,
    by_source_ref: HashMap<String, JudgmentCounts>,
    by_kind: HashMap<SourceKind, JudgmentCounts>,
}

impl FeedbackIndex {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a FeedbackEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.add(entry);
        }
        index
    }

    pub fn add(&mut self, entry: &FeedbackEntry) {
        self.by_text
            .entry(entry.normalized_text.clone())
            .or_default()
            .add(entry.judgment);
        self.by_prefix
            .entry(prefix_signature(&entry.normalized_text))
            .or_default()
            .add(entry.judgment);
        if !entry.source_ref.is_empty() {
            self.by_source_ref
                .entry(entry.source_ref.clone())
                .or_default()
                .add(entry.judgment);
        }
        self.by_kind
            .entry(entry.source_kind)
            .or_default()
            .add(entry.judgment);
    }

    pub fn for_text(&self, normalized_text: &str) -> JudgmentCounts {
        self.by_text
            .get(normalized_text)
            .copied()
            .unwrap_or_default()
    }

    pub fn for_prefix(&self, signature: &str) -> JudgmentCounts {
        self.by_prefix.get(signature).copied().unwrap_or_default()
    }

    pub fn for_source_ref(&self, source_ref: &str) -> JudgmentCounts {
        self.by_source_ref
            .get(source_ref)
            .copied()
            .unwrap_or_default()
    }

    pub fn for_kind(&self, kind: SourceKind) -> JudgmentCounts {
        self.by_kind.get(&kind).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_text.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackFilter {
    pub judgment: Option<Judgment>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: u32,
    pub confirmed: u32,
    pub false_positive: u32,
    pub missed: u32,
    /// confirmed / (confirmed + false_positive); 0 when nothing was judged.
    pub acceptance_rate: f64,
    /// Missed reports point at recall problems.
    pub recall_issues: u32,
    pub pending_reviews: usize,
    /// Most frequent reasons given for false positives, most common first.
    #[serde(default)]
    pub rejection_reasons: Vec<ReasonCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: u32,
}

/// A labelled example handed to the implicit detector as prompt context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackExample {
    pub text: String,
    pub judgment: Judgment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_text: Option<String>,
}

impl From<&FeedbackEntry> for FeedbackExample {
    fn from(entry: &FeedbackEntry) -> Self {
        Self {
            text: entry.display_text.clone(),
            judgment: entry.judgment,
            reason: entry.reason.clone(),
            corrected_text: entry.corrected_text.clone(),
        }
    }
}
