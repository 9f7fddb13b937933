use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tpa_core::{AppError, FeedbackEntry, Judgment};
use tracing::warn;

use crate::entry::{
    AggregateKey, FeedbackExample, FeedbackFilter, FeedbackIndex, FeedbackStats, JudgmentCounts,
    ReasonCount, ReviewItem,
};

const FEEDBACK_FILE_NAME: &str = "feedback.jsonl";
const REVIEW_FILE_NAME: &str = "review.jsonl";
const MAX_REJECTION_REASONS: usize = 20;

/// Append-only JSONL feedback log plus the review queue.
///
/// ```text
/// {feedback_dir}/
/// ├── feedback.jsonl   (one FeedbackEntry per line, never rewritten)
/// └── review.jsonl     (implicit suggestions surfaced by runs)
/// ```
///
/// Write failures surface as [`AppError::FeedbackIo`]; losing a judgment
/// silently would corrupt the learning loop.
#[derive(Debug, Clone)]
pub struct FeedbackStore {
    base_dir: PathBuf,
    feedback_path: PathBuf,
    review_path: PathBuf,
}

impl FeedbackStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            feedback_path: base_dir.join(FEEDBACK_FILE_NAME),
            review_path: base_dir.join(REVIEW_FILE_NAME),
            base_dir,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Append one judgment.
    pub fn record(&self, entry: &FeedbackEntry) -> Result<()> {
        append_lines(&self.base_dir, &self.feedback_path, std::slice::from_ref(entry))?;
        tracing::info!(
            judgment = %entry.judgment,
            text = %entry.normalized_text,
            source = %entry.source_ref,
            "recorded feedback"
        );
        Ok(())
    }

    /// Queue surfaced implicit suggestions for review.
    pub fn enqueue_reviews(&self, items: &[ReviewItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        append_lines(&self.base_dir, &self.review_path, items)
    }

    pub fn load_all(&self) -> Result<Vec<FeedbackEntry>> {
        read_jsonl(&self.feedback_path)
    }

    pub fn load_reviews(&self) -> Result<Vec<ReviewItem>> {
        read_jsonl(&self.review_path)
    }

    /// Review items with no judgment recorded since they were surfaced.
    ///
    /// Only the latest surfacing of each normalized text is considered.
    /// Sorted oldest first, the order a reviewer works through them.
    pub fn pending(&self) -> Result<Vec<ReviewItem>> {
        let entries = self.load_all()?;
        let mut latest: HashMap<String, ReviewItem> = HashMap::new();
        for item in self.load_reviews()? {
            match latest.get(&item.normalized_text) {
                Some(existing) if existing.surfaced_at >= item.surfaced_at => {}
                _ => {
                    latest.insert(item.normalized_text.clone(), item);
                }
            }
        }

        let mut pending: Vec<ReviewItem> = latest
            .into_values()
            .filter(|item| {
                !entries.iter().any(|entry| {
                    entry.normalized_text == item.normalized_text
                        && entry.recorded_at >= item.surfaced_at
                })
            })
            .collect();
        pending.sort_by(|a, b| a.surfaced_at.cmp(&b.surfaced_at));
        Ok(pending)
    }

    /// Judgments newest first, optionally filtered.
    pub fn list(&self, filter: FeedbackFilter) -> Result<Vec<FeedbackEntry>> {
        let mut entries: Vec<FeedbackEntry> = self
            .load_all()?
            .into_iter()
            .filter(|entry| match filter.judgment {
                Some(judgment) => entry.judgment == judgment,
                None => true,
            })
            .collect();

        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    pub fn aggregate(&self, key: &AggregateKey) -> Result<JudgmentCounts> {
        let mut counts = JudgmentCounts::default();
        for entry in self.load_all()? {
            let matches = match key {
                AggregateKey::TextPrefix(prefix) => entry.normalized_text.starts_with(prefix),
                AggregateKey::SourceKind(kind) => entry.source_kind == *kind,
            };
            if matches {
                counts.add(entry.judgment);
            }
        }
        Ok(counts)
    }

    pub fn index(&self) -> Result<FeedbackIndex> {
        Ok(FeedbackIndex::from_entries(&self.load_all()?))
    }

    pub fn stats(&self) -> Result<FeedbackStats> {
        let mut counts = JudgmentCounts::default();
        let mut reasons: HashMap<String, u32> = HashMap::new();
        for entry in self.load_all()? {
            counts.add(entry.judgment);
            if entry.judgment == Judgment::FalsePositive {
                if let Some(reason) = entry.reason.as_deref().map(str::trim) {
                    if !reason.is_empty() {
                        *reasons.entry(reason.to_string()).or_default() += 1;
                    }
                }
            }
        }
        let judged = counts.confirmed + counts.false_positive;
        let acceptance_rate = if judged > 0 {
            f64::from(counts.confirmed) / f64::from(judged)
        } else {
            0.0
        };

        Ok(FeedbackStats {
            total: counts.total(),
            confirmed: counts.confirmed,
            false_positive: counts.false_positive,
            missed: counts.missed,
            acceptance_rate,
            recall_issues: counts.missed,
            pending_reviews: self.pending()?.len(),
            rejection_reasons: top_reasons(reasons),
        })
    }

    /// Up to `per_judgment` most recent examples of each judgment,
    /// missed first, then false positives, then confirmed.
    pub fn examples(&self, per_judgment: usize) -> Result<Vec<FeedbackExample>> {
        if per_judgment == 0 {
            return Ok(Vec::new());
        }
        let entries = self.list(FeedbackFilter::default())?;
        let mut examples = Vec::new();
        for judgment in [Judgment::Missed, Judgment::FalsePositive, Judgment::Confirmed] {
            examples.extend(
                entries
                    .iter()
                    .filter(|entry| entry.judgment == judgment)
                    .take(per_judgment)
                    .map(FeedbackExample::from),
            );
        }
        Ok(examples)
    }
}

/// Reasons ranked by count, ties broken alphabetically.
fn top_reasons(reasons: HashMap<String, u32>) -> Vec<ReasonCount> {
    let mut ranked: Vec<ReasonCount> = reasons
        .into_iter()
        .map(|(reason, count)| ReasonCount { reason, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));
    ranked.truncate(MAX_REJECTION_REASONS);
    ranked
}

fn feedback_io(path: &Path, err: impl std::fmt::Display) -> anyhow::Error {
    AppError::FeedbackIo {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
    .into()
}

fn append_lines<T: Serialize>(base_dir: &Path, path: &Path, items: &[T]) -> Result<()> {
    ensure_storage_dir(base_dir)?;

    let mut buf = String::new();
    for item in items {
        let line = serde_json::to_string(item).context("failed to serialize feedback record")?;
        buf.push_str(&line);
        buf.push('\n');
    }

    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| feedback_io(path, e))?;
    set_file_mode_600(path)?;
    file.write_all(buf.as_bytes())
        .map_err(|e| feedback_io(path, e))?;
    file.flush().map_err(|e| feedback_io(path, e))?;
    file.sync_data().map_err(|e| feedback_io(path, e))?;
    Ok(())
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| feedback_io(path, e))?;
    let reader = BufReader::new(file);

    let mut items = Vec::new();
    for (idx, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| feedback_io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(item) => items.push(item),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    line_number = idx + 1,
                    %error,
                    "skipping corrupt feedback jsonl line"
                );
            }
        }
    }
    Ok(items)
}

fn ensure_storage_dir(base_dir: &Path) -> Result<()> {
    let dir_exists = base_dir.exists();
    fs::create_dir_all(base_dir).map_err(|e| feedback_io(base_dir, e))?;
    if !dir_exists {
        set_dir_mode_700(base_dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_mode_700(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("failed to chmod 700: {}", path.display()))
}

#[cfg(not(unix))]
fn set_dir_mode_700(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode_600(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to chmod 600: {}", path.display()))
}

#[cfg(not(unix))]
fn set_file_mode_600(_path: &Path) -> Result<()> {
    Ok(())
}
