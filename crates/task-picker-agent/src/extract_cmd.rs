use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::warn;

use tpa_config::TaskPickerConfig;
use tpa_core::OutputFormat;
use tpa_extract::{ApiDetector, Orchestrator, RunOptions, RunOutcome, SkippedSource, Source};

use crate::cli::ExtractArgs;

/// Label attached to diffs produced by `--git-diff`.
const GIT_DIFF_LABEL: &str = "HEAD~1";

pub(crate) async fn handle_extract(
    args: ExtractArgs,
    config: TaskPickerConfig,
    format: OutputFormat,
) -> Result<()> {
    if !args.has_sources() {
        bail!("No sources given. Use --file, --session, --git-diff or --diff-file.");
    }

    let options = run_options(&args, &config);
    let (sources, unavailable) = collect_sources(&args, &config).await;

    let mut orchestrator = Orchestrator::new(config.clone());
    if options.implicit {
        match ApiDetector::from_config(&config.implicit) {
            Ok(detector) => orchestrator = orchestrator.with_detector(Arc::new(detector)),
            Err(e) => warn!("Implicit detector not available: {e:#}"),
        }
    }

    let mut outcome = orchestrator.run(&sources, &options).await?;
    for skipped in unavailable {
        outcome.report.skip(skipped.source_ref, skipped.reason);
    }
    print_outcome(&outcome, format)
}

fn run_options(args: &ExtractArgs, config: &TaskPickerConfig) -> RunOptions {
    let mut options = RunOptions::from_config(config);
    options.dry_run = args.dry_run;
    if args.no_dedup {
        options.dedup = false;
    }
    if args.implicit {
        options.implicit = true;
    }
    options
}

/// Sources in command-line order: files, session, then diff.
///
/// A diff that cannot be produced is returned as a skipped source so the
/// remaining sources still run and the report names it.
async fn collect_sources(
    args: &ExtractArgs,
    config: &TaskPickerConfig,
) -> (Vec<Source>, Vec<SkippedSource>) {
    let mut sources: Vec<Source> = args.files.iter().cloned().map(Source::Document).collect();
    let mut skipped = Vec::new();
    if let Some(id) = &args.session {
        sources.push(Source::SessionLog(id.clone()));
    }

    if args.git_diff {
        match git_diff_text(&config.workspace_root()).await {
            Ok(text) => sources.push(Source::GitDiff {
                label: GIT_DIFF_LABEL.to_string(),
                text,
            }),
            Err(e) => skipped.push(SkippedSource {
                source_ref: format!("git diff {GIT_DIFF_LABEL}"),
                reason: format!("{e:#}"),
            }),
        }
    } else if let Some(path) = &args.diff_file {
        match std::fs::read_to_string(path) {
            Ok(text) => sources.push(Source::GitDiff {
                label: path.display().to_string(),
                text,
            }),
            Err(e) => skipped.push(SkippedSource {
                source_ref: path.display().to_string(),
                reason: format!("unreadable: {e}"),
            }),
        }
    }
    (sources, skipped)
}

/// Markdown changes since the previous commit.
async fn git_diff_text(workspace: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["diff", GIT_DIFF_LABEL, "--", "*.md"])
        .current_dir(workspace)
        .output()
        .await
        .context("Failed to run git diff")?;
    if !output.status.success() {
        bail!(
            "git diff exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn print_outcome(outcome: &RunOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
        OutputFormat::Text => {
            print!("{}", outcome.report);
            for record in &outcome.result.new_entries {
                println!("  + {}", record.render_line());
            }
            for record in &outcome.result.completed_entries {
                println!("  ✓ {}", record.render_line());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_run_options_flags_override_config() {
        let config = TaskPickerConfig::default();
        let args = ExtractArgs {
            files: vec![PathBuf::from("a.md")],
            implicit: true,
            dry_run: true,
            no_dedup: true,
            ..Default::default()
        };
        let options = run_options(&args, &config);
        assert!(options.dry_run);
        assert!(!options.dedup);
        assert!(options.implicit);

        let defaults = run_options(&ExtractArgs::default(), &config);
        assert!(defaults.dedup);
        assert!(!defaults.implicit);
    }

    #[tokio::test]
    async fn test_collect_sources_keeps_order_and_reports_unreadable_diff() {
        let args = ExtractArgs {
            files: vec![PathBuf::from("b.md"), PathBuf::from("a.md")],
            session: Some("abc".into()),
            diff_file: Some(PathBuf::from("/nonexistent/changes.diff")),
            ..Default::default()
        };
        let (sources, skipped) = collect_sources(&args, &TaskPickerConfig::default()).await;
        assert_eq!(
            sources,
            vec![
                Source::Document(PathBuf::from("b.md")),
                Source::Document(PathBuf::from("a.md")),
                Source::SessionLog("abc".into()),
            ]
        );
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].source_ref, "/nonexistent/changes.diff");
        assert!(skipped[0].reason.starts_with("unreadable"));
    }

    #[tokio::test]
    async fn test_collect_sources_reads_diff_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("changes.diff");
        std::fs::write(&path, "@@ -0,0 +1 @@\n+- [ ] new\n").unwrap();
        let args = ExtractArgs {
            diff_file: Some(path.clone()),
            ..Default::default()
        };
        let (sources, skipped) = collect_sources(&args, &TaskPickerConfig::default()).await;
        assert!(skipped.is_empty());
        assert!(matches!(
            &sources[..],
            [Source::GitDiff { label, text }] if label == &path.display().to_string() && text.contains("+- [ ] new")
        ));
    }
}
