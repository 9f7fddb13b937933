//! Shared domain types and error taxonomy for the task picker agent.

pub mod error;
pub mod types;

pub use error::AppError;
pub use types::{
    ConfidenceLabel, DetectedState, FeedbackEntry, Judgment, OutputFormat, SourceKind,
    TaskCandidate, TaskRecord, TaskState,
};
