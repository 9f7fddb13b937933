use std::fmt;

use serde::Serialize;
use tpa_core::TaskRecord;

use crate::store::ApplyOutcome;

/// Outcome of reconciliation for one run, handed to the store writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    pub new_entries: Vec<TaskRecord>,
    pub completed_entries: Vec<TaskRecord>,
    pub skipped_duplicates: usize,
}

impl RunResult {
    pub fn has_writes(&self) -> bool {
        !self.new_entries.is_empty() || !self.completed_entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSource {
    pub source_ref: String,
    pub reason: String,
}

/// Human-facing summary of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub sources_processed: Vec<String>,
    pub sources_skipped: Vec<SkippedSource>,
    pub candidates_found: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub deduplicated: usize,
    pub new_entries: usize,
    pub completed_entries: usize,
    /// What the writer actually changed; absent for dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written: Option<ApplyOutcome>,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "extraction warning");
        self.warnings.push(message);
    }

    pub fn skip(&mut self, source_ref: impl Into<String>, reason: impl Into<String>) {
        let skipped = SkippedSource {
            source_ref: source_ref.into(),
            reason: reason.into(),
        };
        tracing::info!(source = %skipped.source_ref, reason = %skipped.reason, "source skipped");
        self.sources_skipped.push(skipped);
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Dry run: task store not modified")?;
        }
        writeln!(
            f,
            "Sources: {} processed, {} skipped",
            self.sources_processed.len(),
            self.sources_skipped.len()
        )?;
        for skipped in &self.sources_skipped {
            writeln!(f, "  skipped {}: {}", skipped.source_ref, skipped.reason)?;
        }
        writeln!(
            f,
            "Candidates: {} found, {} accepted, {} rejected, {} deduplicated",
            self.candidates_found, self.accepted, self.rejected, self.deduplicated
        )?;
        writeln!(
            f,
            "Result: {} new, {} completed",
            self.new_entries, self.completed_entries
        )?;
        if let Some(written) = &self.written {
            writeln!(
                f,
                "Written: {} appended, {} marked completed, {} already present",
                written.appended, written.completed, written.already_present
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "Warning: {warning}")?;
        }
        Ok(())
    }
}
