use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Where a candidate came from.
///
/// Variant order is source priority: when two candidates tie on position,
/// the one with the smaller kind wins (document > session log > git diff >
/// implicit).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Document,
    SessionLog,
    GitDiff,
    Implicit,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::SessionLog => "session_log",
            Self::GitDiff => "git_diff",
            Self::Implicit => "implicit",
        }
    }

    /// Explicit kinds come from the deterministic pattern matcher.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Self::Implicit)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "document" => Ok(Self::Document),
            "session_log" => Ok(Self::SessionLog),
            "git_diff" => Ok(Self::GitDiff),
            "implicit" => Ok(Self::Implicit),
            other => Err(format!(
                "Invalid source kind '{other}'. Valid: document, session_log, git_diff, implicit"
            )),
        }
    }
}

/// State observed on the candidate line itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedState {
    Open,
    Completed,
}

/// Lifecycle of a persisted task record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Open,
    Completed,
    Archived,
}

impl TaskState {
    /// Records only move forward: open -> completed -> archived
    /// (open may also be archived directly). Staying put is allowed.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (Self::Open, Self::Completed | Self::Archived) => true,
            (Self::Completed, Self::Archived) => true,
            _ => false,
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Archived)
    }
}

impl From<DetectedState> for TaskState {
    fn from(state: DetectedState) -> Self {
        match state {
            DetectedState::Open => Self::Open,
            DetectedState::Completed => Self::Completed,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Completed => write!(f, "completed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// Reviewer verdict on a detection.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Judgment {
    /// A task that should have been detected but was not.
    Missed,
    /// A surfaced suggestion that was not a real task.
    FalsePositive,
    /// A surfaced suggestion the reviewer kept.
    Confirmed,
}

impl Judgment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missed => "missed",
            Self::FalsePositive => "false_positive",
            Self::Confirmed => "confirmed",
        }
    }

    /// Missed and confirmed both argue for surfacing similar text.
    pub fn is_positive(&self) -> bool {
        !matches!(self, Self::FalsePositive)
    }
}

impl std::fmt::Display for Judgment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How sure the implicit detector says it is about one suggestion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
}

impl ConfidenceLabel {
    /// Starting score before judgment history is applied.
    pub fn prior(self) -> f64 {
        match self {
            Self::High => 0.8,
            Self::Medium => 0.5,
            Self::Low => 0.3,
        }
    }
}

impl std::str::FromStr for ConfidenceLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!(
                "Invalid confidence label '{other}'. Valid: high, medium, low"
            )),
        }
    }
}

/// A task mention extracted from raw text, before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCandidate {
    pub raw_text: String,
    pub normalized_text: String,
    pub source_kind: SourceKind,
    /// File path, commit label or session id.
    pub source_ref: String,
    pub detected_state: DetectedState,
    /// 1.0 for explicit markers. Implicit suggestions start at the
    /// detector's prior and carry the model score once gated.
    pub confidence: f64,
    /// 1-based line number for explicit candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Detector explanation for implicit candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl TaskCandidate {
    pub fn explicit(
        raw_text: String,
        normalized_text: String,
        source_kind: SourceKind,
        source_ref: &str,
        detected_state: DetectedState,
        line: usize,
    ) -> Self {
        Self {
            raw_text,
            normalized_text,
            source_kind,
            source_ref: source_ref.to_string(),
            detected_state,
            confidence: 1.0,
            line: Some(line),
            rationale: None,
        }
    }

    pub fn implicit(
        raw_text: String,
        normalized_text: String,
        source_ref: &str,
        rationale: Option<String>,
    ) -> Self {
        Self {
            raw_text,
            normalized_text,
            source_kind: SourceKind::Implicit,
            source_ref: source_ref.to_string(),
            detected_state: DetectedState::Open,
            confidence: ConfidenceLabel::Medium.prior(),
            line: None,
            rationale,
        }
    }

    /// Returns a copy carrying the given score, clamped to `[0, 1]`.
    pub fn scored(&self, confidence: f64) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
            ..self.clone()
        }
    }

    pub fn is_implicit(&self) -> bool {
        !self.source_kind.is_explicit()
    }
}

/// A task persisted in the store, keyed by `normalized_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub normalized_text: String,
    pub display_text: String,
    pub state: TaskState,
    pub first_seen: DateTime<Utc>,
    pub source_ref: String,
}

impl TaskRecord {
    pub fn from_candidate(candidate: &TaskCandidate, first_seen: DateTime<Utc>) -> Self {
        Self {
            normalized_text: candidate.normalized_text.clone(),
            display_text: candidate.raw_text.clone(),
            state: candidate.detected_state.into(),
            first_seen,
            source_ref: candidate.source_ref.clone(),
        }
    }

    /// Markdown checkbox line for this record.
    pub fn render_line(&self) -> String {
        let mark = match self.state {
            TaskState::Open => " ",
            TaskState::Completed | TaskState::Archived => "x",
        };
        format!("- [{mark}] {}", self.display_text)
    }
}

/// One reviewer correction. Append-only once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Ulid,
    pub normalized_text: String,
    /// Text as the reviewer saw or typed it.
    pub display_text: String,
    pub judgment: Judgment,
    pub source_kind: SourceKind,
    pub source_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Reviewer's improved phrasing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_text: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackEntry {
    pub fn new(
        normalized_text: String,
        display_text: String,
        judgment: Judgment,
        source_kind: SourceKind,
        source_ref: String,
    ) -> Self {
        Self {
            id: Ulid::new(),
            normalized_text,
            display_text,
            judgment,
            source_kind,
            source_ref,
            reason: None,
            corrected_text: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn with_corrected_text(mut self, corrected: Option<String>) -> Self {
        self.corrected_text = corrected.filter(|c| !c.trim().is_empty());
        self
    }
}

/// Output format for CLI responses
#[derive(Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
