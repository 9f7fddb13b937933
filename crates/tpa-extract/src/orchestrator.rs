//! One extraction run: collect, gate, reconcile, write, report.
//!
//! The store lock is taken only after collection so a slow detector never
//! blocks other runs; the store is re-read under the lock.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tpa_config::TaskPickerConfig;
use tpa_core::{AppError, SourceKind, TaskCandidate, TaskRecord};
use tpa_feedback::{
    ConfidenceModel, FeedbackExample, FeedbackIndex, FeedbackStore, Gate, ReviewItem,
};
use tracing::{debug, info};

use crate::dedup::{ActiveRecords, Verdict, classify};
use crate::detector::ImplicitDetector;
use crate::matcher::scan;
use crate::normalize::normalize;
use crate::report::{RunReport, RunResult};
use crate::source::{LoadedSource, Source};
use crate::store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Run the whole pipeline but skip the writer and the review queue.
    pub dry_run: bool,
    pub dedup: bool,
    pub implicit: bool,
}

impl RunOptions {
    pub fn from_config(config: &TaskPickerConfig) -> Self {
        Self {
            dry_run: false,
            dedup: config.dedup.enabled,
            implicit: config.implicit.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub result: RunResult,
    pub report: RunReport,
}

pub struct Orchestrator {
    config: TaskPickerConfig,
    store: TaskStore,
    feedback: Option<FeedbackStore>,
    detector: Option<Arc<dyn ImplicitDetector>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store.path())
            .field("feedback", &self.feedback.as_ref().map(|f| f.base_dir()))
            .field("detector", &self.detector.is_some())
            .finish()
    }
}

/// Per-run inputs of the implicit path, loaded once.
struct ImplicitContext {
    detector: Arc<dyn ImplicitDetector>,
    model: ConfidenceModel,
    index: FeedbackIndex,
    examples: Vec<FeedbackExample>,
}

/// A candidate tagged with the position of its source in the run.
#[derive(Debug, Clone)]
struct Ordered {
    source_idx: usize,
    candidate: TaskCandidate,
}

impl Orchestrator {
    /// Store and feedback locations come from `config`; no detector.
    pub fn new(config: TaskPickerConfig) -> Self {
        let store = TaskStore::from_config(&config);
        let feedback = Some(FeedbackStore::new(config.feedback_path()));
        Self {
            config,
            store,
            feedback,
            detector: None,
        }
    }

    pub fn with_store(mut self, store: TaskStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_feedback(mut self, feedback: Option<FeedbackStore>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ImplicitDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Drive one run over `sources`, in the order given.
    ///
    /// Per-source input failures and detector failures end up in the report.
    /// Store and lock failures abort the run before anything is written.
    pub async fn run(&self, sources: &[Source], options: &RunOptions) -> Result<RunOutcome> {
        let mut report = RunReport {
            dry_run: options.dry_run,
            ..Default::default()
        };
        info!(
            sources = sources.len(),
            dry_run = options.dry_run,
            dedup = options.dedup,
            implicit = options.implicit,
            "extraction run started"
        );

        let implicit = if options.implicit {
            self.implicit_context(&mut report)
        } else {
            None
        };

        // COLLECT
        let mut collected = Vec::new();
        for (source_idx, source) in sources.iter().enumerate() {
            let loaded = match source.load(&self.config) {
                Ok(loaded) => loaded,
                Err(error) => {
                    report.skip(source.describe(), skip_reason(&error));
                    continue;
                }
            };
            report.sources_processed.push(loaded.source_ref.clone());

            collected.extend(
                scan(
                    &loaded.text,
                    loaded.kind,
                    &loaded.source_ref,
                    self.config.dedup.case_insensitive,
                )
                .map(|candidate| Ordered {
                    source_idx,
                    candidate,
                }),
            );

            if let Some(ctx) = &implicit {
                if loaded.supports_implicit() {
                    let found = self.detect(ctx, &loaded, &mut report).await;
                    collected.extend(found.into_iter().map(|candidate| Ordered {
                        source_idx,
                        candidate,
                    }));
                }
            }
        }
        report.candidates_found = collected.len();

        // FILTER
        let mut accepted = Vec::with_capacity(collected.len());
        for mut item in collected {
            if item.candidate.normalized_text.is_empty() {
                debug!(raw = %item.candidate.raw_text, "candidate normalizes to nothing");
                report.rejected += 1;
                continue;
            }
            if item.candidate.is_implicit() {
                let Some(ctx) = &implicit else {
                    report.rejected += 1;
                    continue;
                };
                match ctx.model.gate(&item.candidate, &ctx.index) {
                    Gate::Accepted(score) => item.candidate = item.candidate.scored(score),
                    Gate::Rejected { score, reason } => {
                        debug!(
                            text = %item.candidate.normalized_text,
                            score,
                            ?reason,
                            "implicit candidate gated out"
                        );
                        report.rejected += 1;
                        continue;
                    }
                }
            }
            accepted.push(item);
        }
        accepted.sort_by_key(|item| (item.source_idx, item.candidate.source_kind));
        report.accepted = accepted.len();

        // RECONCILE under the lock (or against a snapshot for dry runs)
        let mut txn = if options.dry_run {
            None
        } else {
            Some(self.store.lock("extract")?)
        };
        let records = match &txn {
            Some(txn) => txn.records(),
            None => self.store.snapshot()?,
        };
        let active = ActiveRecords::new(&records);
        let result = assemble(&accepted, &active, options.dedup, Utc::now());

        report.deduplicated = result.skipped_duplicates;
        report.new_entries = result.new_entries.len();
        report.completed_entries = result.completed_entries.len();

        if let Some(txn) = txn.as_mut() {
            report.written = Some(txn.apply(&result)?);
        }
        drop(txn);

        if !options.dry_run {
            self.enqueue_reviews(&accepted, &result, &mut report);
        }

        info!(
            new = report.new_entries,
            completed = report.completed_entries,
            skipped = report.deduplicated,
            rejected = report.rejected,
            warnings = report.warnings.len(),
            "extraction run finished"
        );
        Ok(RunOutcome { result, report })
    }

    fn implicit_context(&self, report: &mut RunReport) -> Option<ImplicitContext> {
        let Some(detector) = self.detector.clone() else {
            report.warn(
                AppError::Detector("implicit detection requested but no detector is configured".into())
                    .to_string(),
            );
            return None;
        };

        let (index, examples) = match &self.feedback {
            Some(feedback) => {
                let index = feedback.index().unwrap_or_else(|e| {
                    report.warn(format!("feedback history unavailable: {e:#}"));
                    FeedbackIndex::default()
                });
                let examples = feedback
                    .examples(self.config.implicit.example_count)
                    .unwrap_or_default();
                (index, examples)
            }
            None => (FeedbackIndex::default(), Vec::new()),
        };

        let model = ConfidenceModel::new(
            self.config.implicit.threshold,
            self.config.implicit.suppress_after,
        );
        debug!(
            threshold = model.threshold(),
            examples = examples.len(),
            "implicit detection enabled"
        );
        Some(ImplicitContext {
            detector,
            model,
            index,
            examples,
        })
    }

    /// Ask the detector, bounded by the configured timeout. Any failure
    /// degrades to no implicit candidates plus a warning.
    async fn detect(
        &self,
        ctx: &ImplicitContext,
        loaded: &LoadedSource,
        report: &mut RunReport,
    ) -> Vec<TaskCandidate> {
        let timeout = self.config.implicit.timeout();
        let call = ctx.detector.detect(&loaded.text, &ctx.examples);
        let suggestions = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(suggestions)) => suggestions,
            Ok(Err(error)) => {
                report.warn(detector_warning(&loaded.source_ref, &error));
                return Vec::new();
            }
            Err(_) => {
                report.warn(
                    AppError::Detector(format!(
                        "timed out after {} ms on {}",
                        timeout.as_millis(),
                        loaded.source_ref
                    ))
                    .to_string(),
                );
                return Vec::new();
            }
        };

        debug!(source = %loaded.source_ref, count = suggestions.len(), "implicit suggestions");
        suggestions
            .into_iter()
            .map(|suggestion| {
                let prior = suggestion.prior();
                let raw = suggestion.text.trim().to_string();
                let key = normalize(&raw, self.config.dedup.case_insensitive);
                TaskCandidate::implicit(raw, key, &loaded.source_ref, suggestion.rationale)
                    .scored(prior)
            })
            .collect()
    }

    /// Queue surfaced implicit entries for review. Failing here must not
    /// fail a run whose writes already landed.
    fn enqueue_reviews(&self, accepted: &[Ordered], result: &RunResult, report: &mut RunReport) {
        let Some(feedback) = &self.feedback else {
            return;
        };
        let surfaced: HashMap<&str, &TaskCandidate> = accepted
            .iter()
            .filter(|item| item.candidate.is_implicit())
            .map(|item| (item.candidate.normalized_text.as_str(), &item.candidate))
            .collect();

        let now = Utc::now();
        let items: Vec<ReviewItem> = result
            .new_entries
            .iter()
            .filter_map(|record| {
                let candidate = surfaced.get(record.normalized_text.as_str())?;
                Some(ReviewItem {
                    normalized_text: record.normalized_text.clone(),
                    display_text: record.display_text.clone(),
                    source_ref: record.source_ref.clone(),
                    confidence: candidate.confidence,
                    rationale: candidate.rationale.clone(),
                    surfaced_at: now,
                })
            })
            .collect();

        if let Err(error) = feedback.enqueue_reviews(&items) {
            report.warn(format!("could not queue implicit entries for review: {error:#}"));
        }
    }
}

fn skip_reason(error: &anyhow::Error) -> String {
    match error.downcast_ref::<AppError>() {
        Some(AppError::Input { reason, .. }) => reason.clone(),
        _ => format!("{error:#}"),
    }
}

fn detector_warning(source_ref: &str, error: &anyhow::Error) -> String {
    match error.downcast_ref::<AppError>() {
        Some(detector @ AppError::Detector(_)) => format!("{detector} ({source_ref})"),
        _ => AppError::Detector(format!("{error:#} ({source_ref})")).to_string(),
    }
}

#[derive(Debug)]
enum Planned {
    New(TaskRecord),
    Complete(TaskRecord),
    Noop,
}

impl Planned {
    fn is_noop(&self) -> bool {
        matches!(self, Planned::Noop)
    }
}

#[derive(Debug)]
struct Slot {
    source_idx: usize,
    kind: SourceKind,
    planned: Planned,
}

/// Reconcile ordered candidates against the active records.
///
/// With dedup on, one key yields at most one planned change per run: a later
/// source supersedes an earlier one, and within one source an explicit
/// marker beats an implicit suggestion. Every candidate that ends up not
/// producing a write counts as a skipped duplicate.
fn assemble(
    accepted: &[Ordered],
    active: &ActiveRecords,
    dedup: bool,
    now: DateTime<Utc>,
) -> RunResult {
    let mut slots: Vec<Slot> = Vec::new();
    let mut by_key: HashMap<&str, usize> = HashMap::new();
    let mut skipped = 0;

    for item in accepted {
        let candidate = &item.candidate;
        let planned = match classify(candidate, active) {
            Verdict::New => Planned::New(TaskRecord::from_candidate(candidate, now)),
            Verdict::StateTransition(record) => Planned::Complete(record),
            Verdict::AlreadyOpen | Verdict::DuplicateCompleted if !dedup => {
                Planned::New(TaskRecord::from_candidate(candidate, now))
            }
            Verdict::AlreadyOpen | Verdict::DuplicateCompleted => Planned::Noop,
            Verdict::Unstorable => continue,
        };
        let slot = Slot {
            source_idx: item.source_idx,
            kind: candidate.source_kind,
            planned,
        };

        if dedup {
            if let Some(&existing) = by_key.get(candidate.normalized_text.as_str()) {
                let current = &slots[existing];
                if current.source_idx == slot.source_idx && current.kind < slot.kind {
                    // Dropped in favour of a higher-priority kind from the same source.
                    skipped += 1;
                } else {
                    // Noop occurrences were counted when they were planned.
                    if !current.planned.is_noop() {
                        skipped += 1;
                    }
                    if slot.planned.is_noop() {
                        skipped += 1;
                    }
                    slots[existing] = slot;
                }
                continue;
            }
        }

        if slot.planned.is_noop() {
            skipped += 1;
        }
        by_key.insert(candidate.normalized_text.as_str(), slots.len());
        slots.push(slot);
    }

    let mut result = RunResult {
        skipped_duplicates: skipped,
        ..Default::default()
    };
    for slot in slots {
        match slot.planned {
            Planned::New(record) => result.new_entries.push(record),
            Planned::Complete(record) => result.completed_entries.push(record),
            Planned::Noop => {}
        }
    }
    result
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
