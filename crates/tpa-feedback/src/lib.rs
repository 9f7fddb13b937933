//! Reviewer feedback: an append-only judgment log, the review queue of
//! surfaced implicit suggestions, and the confidence model that turns
//! accumulated judgments into gating decisions.

mod confidence;
mod entry;
mod store;

pub use confidence::{ConfidenceModel, Gate, GateReason, prefix_signature};
pub use entry::{
    AggregateKey, FeedbackExample, FeedbackFilter, FeedbackIndex, FeedbackStats, JudgmentCounts,
    ReasonCount, ReviewItem,
};
pub use store::FeedbackStore;
