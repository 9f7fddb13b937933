use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Serialize;

use tpa_config::TaskPickerConfig;
use tpa_core::{FeedbackEntry, Judgment, OutputFormat, SourceKind};
use tpa_extract::{ApiDetector, DetectionGap, Source, detection_gap, format_examples, normalize};
use tpa_feedback::{FeedbackFilter, FeedbackStore};

use crate::cli::JudgmentArgs;

fn open_store(config: &TaskPickerConfig) -> FeedbackStore {
    FeedbackStore::new(config.feedback_path())
}

/// Build the entry a reviewer verdict is recorded as.
fn judgment_entry(
    judgment: Judgment,
    args: JudgmentArgs,
    case_insensitive: bool,
) -> Result<FeedbackEntry> {
    let display = args.text.trim().to_string();
    let normalized = normalize(&display, case_insensitive);
    if normalized.is_empty() {
        bail!("Task text '{}' is empty after normalization", args.text);
    }
    Ok(
        FeedbackEntry::new(normalized, display, judgment, args.kind, args.source)
            .with_reason(args.reason)
            .with_corrected_text(args.corrected),
    )
}

pub(crate) fn handle_judgment(
    judgment: Judgment,
    args: JudgmentArgs,
    config: &TaskPickerConfig,
    format: OutputFormat,
) -> Result<()> {
    let entry = judgment_entry(judgment, args, config.dedup.case_insensitive)?;
    open_store(config).record(&entry)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entry)?),
        OutputFormat::Text => {
            println!("{}", entry.id);
            eprintln!("Recorded {}: {}", entry.judgment, entry.display_text);
        }
    }
    Ok(())
}

pub(crate) fn handle_pending(config: &TaskPickerConfig, format: OutputFormat) -> Result<()> {
    let pending = open_store(config).pending()?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }
    if pending.is_empty() {
        eprintln!("No implicit entries awaiting review.");
        return Ok(());
    }

    println!("{:<6}  {:<50}  SOURCE", "CONF", "TASK");
    for item in &pending {
        println!(
            "{:<6.2}  {:<50}  {}",
            item.confidence,
            truncate(&item.display_text, 50),
            item.source_ref
        );
        if let Some(rationale) = &item.rationale {
            println!("        {rationale}");
        }
    }
    eprintln!("Judge with: tpa feedback confirm|reject \"<task>\"");
    Ok(())
}

pub(crate) fn handle_list(
    judgment: Option<Judgment>,
    limit: usize,
    config: &TaskPickerConfig,
    format: OutputFormat,
) -> Result<()> {
    let entries = open_store(config).list(FeedbackFilter {
        judgment,
        limit: Some(limit),
    })?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        eprintln!("No feedback entries found.");
        return Ok(());
    }

    println!(
        "{:<20}  {:<14}  {:<40}  SOURCE",
        "RECORDED", "JUDGMENT", "TASK"
    );
    for entry in &entries {
        println!(
            "{:<20}  {:<14}  {:<40}  {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M").to_string(),
            entry.judgment.to_string(),
            truncate(&entry.display_text, 40),
            entry.source_ref,
        );
    }
    Ok(())
}

pub(crate) fn handle_stats(config: &TaskPickerConfig, format: OutputFormat) -> Result<()> {
    let stats = open_store(config).stats()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("Total judgments:  {}", stats.total);
            println!("  confirmed:      {}", stats.confirmed);
            println!("  false positive: {}", stats.false_positive);
            println!("  missed:         {}", stats.missed);
            println!("Acceptance rate:  {:.1}%", stats.acceptance_rate * 100.0);
            println!("Recall issues:    {}", stats.recall_issues);
            println!("Pending reviews:  {}", stats.pending_reviews);
            if !stats.rejection_reasons.is_empty() {
                println!("Rejection reasons:");
                for reason in &stats.rejection_reasons {
                    println!("  {:>4}  {}", reason.count, reason.reason);
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn handle_export(config: &TaskPickerConfig, format: OutputFormat) -> Result<()> {
    let examples = open_store(config).examples(config.implicit.example_count)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&examples)?),
        OutputFormat::Text => {
            if examples.is_empty() {
                eprintln!("No feedback examples available yet.");
            } else {
                print!("{}", format_examples(&examples));
            }
        }
    }
    Ok(())
}

const MISSED_BY_DETECTOR: &str = "written by hand; the implicit detector did not surface it";

#[derive(Serialize)]
struct CompareOutput<'a> {
    #[serde(flatten)]
    gap: &'a DetectionGap,
    recorded: usize,
}

pub(crate) async fn handle_compare(
    file: PathBuf,
    record: bool,
    config: &TaskPickerConfig,
    format: OutputFormat,
) -> Result<()> {
    let loaded = Source::Document(file).load(config)?;
    let detector = ApiDetector::from_config(&config.implicit)?;
    let store = open_store(config);
    let examples = store.examples(config.implicit.example_count)?;

    let gap = detection_gap(
        &loaded,
        &detector,
        &examples,
        config.implicit.timeout(),
        config.dedup.case_insensitive,
    )
    .await?;
    let recorded = if record {
        record_missed(&store, &gap)?
    } else {
        0
    };

    match format {
        OutputFormat::Json => {
            let output = CompareOutput {
                gap: &gap,
                recorded,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!(
                "{}: {} explicit tasks, {} implicit suggestions",
                gap.source_ref,
                gap.explicit,
                gap.detected.len()
            );
            if gap.undetected.is_empty() {
                println!("The detector covered every open task.");
            } else {
                println!("Not surfaced by the detector:");
                for candidate in &gap.undetected {
                    println!("  {:>4}  {}", candidate.line.unwrap_or_default(), candidate.raw_text);
                }
            }
            if record {
                eprintln!("Recorded {recorded} missed judgment(s).");
            } else if !gap.undetected.is_empty() {
                eprintln!("Record them with: tpa feedback compare --record <file>");
            }
        }
    }
    Ok(())
}

/// Record undetected tasks as missed, skipping keys already reported missed.
fn record_missed(store: &FeedbackStore, gap: &DetectionGap) -> Result<usize> {
    let index = store.index()?;
    let mut recorded = 0;
    for candidate in &gap.undetected {
        if index.for_text(&candidate.normalized_text).missed > 0 {
            continue;
        }
        let entry = FeedbackEntry::new(
            candidate.normalized_text.clone(),
            candidate.raw_text.clone(),
            Judgment::Missed,
            SourceKind::Implicit,
            gap.source_ref.clone(),
        )
        .with_reason(Some(MISSED_BY_DETECTOR.to_string()));
        store.record(&entry)?;
        recorded += 1;
    }
    Ok(recorded)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
