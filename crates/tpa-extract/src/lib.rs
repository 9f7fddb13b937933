//! Task extraction and reconciliation.
//!
//! Raw text flows through the [`matcher`] and [`normalize`] into candidates,
//! optionally joined by [`detector`] suggestions gated by the feedback
//! confidence model. The [`orchestrator`] reconciles them against the
//! [`store`] via [`dedup`] and writes the result under an exclusive lock.
//! [`compare`] checks the detector against tasks the author wrote by hand.

pub mod compare;
pub mod dedup;
pub mod detector;
pub mod matcher;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod source;
pub mod store;

pub use compare::{DetectionGap, detection_gap};
pub use dedup::{ActiveRecords, Verdict, classify};
pub use detector::{
    ApiDetector, ImplicitDetector, ImplicitSuggestion, NoopDetector, format_examples,
};
pub use matcher::{Candidates, Marker, scan};
pub use normalize::normalize;
pub use orchestrator::{Orchestrator, RunOptions, RunOutcome};
pub use report::{RunReport, RunResult, SkippedSource};
pub use source::{LoadedSource, Source};
pub use store::{ApplyOutcome, StoreTxn, TaskStore};
