//! End-to-end extraction runs against a temporary workspace.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tpa_config::TaskPickerConfig;
use tpa_core::{AppError, TaskState};
use tpa_extract::{ImplicitDetector, ImplicitSuggestion, Orchestrator, RunOptions, Source};
use tpa_feedback::FeedbackExample;

struct Workspace {
    dir: TempDir,
    config: TaskPickerConfig,
}

impl Workspace {
    fn new() -> Self {
        Self::with_extra("")
    }

    fn with_extra(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskPickerConfig::from_toml_str(&format!(
            "workspace = \"{}\"\nfeedback_dir = \"{}\"\n{extra}",
            dir.path().display(),
            dir.path().join(".feedback").display()
        ))
        .unwrap();
        Self { dir, config }
    }

    fn write(&self, name: &str, content: &str) -> Source {
        let path = self.dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        Source::Document(path)
    }

    fn tasks_path(&self) -> PathBuf {
        self.dir.path().join("tasks.md")
    }

    fn tasks(&self) -> String {
        fs::read_to_string(self.tasks_path()).unwrap_or_default()
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.config.clone())
    }
}

fn options() -> RunOptions {
    RunOptions {
        dry_run: false,
        dedup: true,
        implicit: false,
    }
}

#[tokio::test]
async fn test_new_task_is_written_once() {
    let ws = Workspace::new();
    let notes = ws.write("notes.md", "- [ ] Fix login bug\n");
    let orchestrator = ws.orchestrator();

    let first = orchestrator
        .run(std::slice::from_ref(&notes), &options())
        .await
        .unwrap();
    assert_eq!(first.result.new_entries.len(), 1);
    assert_eq!(first.result.new_entries[0].display_text, "Fix login bug");
    assert!(ws.tasks().contains("- [ ] Fix login bug\n"));

    let before = ws.tasks();
    let second = orchestrator.run(&[notes], &options()).await.unwrap();
    assert!(second.result.new_entries.is_empty());
    assert!(second.result.completed_entries.is_empty());
    assert_eq!(second.result.skipped_duplicates, 1);
    assert_eq!(ws.tasks(), before);
}

#[tokio::test]
async fn test_checked_marker_completes_open_task() {
    let ws = Workspace::new();
    fs::write(ws.tasks_path(), "## Inbox\n\n- [ ] Fix login bug\n").unwrap();
    let notes = ws.write("notes.md", "Done today:\n- [x] Fix login bug\n");

    let outcome = ws.orchestrator().run(&[notes], &options()).await.unwrap();
    assert_eq!(outcome.result.completed_entries.len(), 1);
    assert_eq!(
        outcome.result.completed_entries[0].state,
        TaskState::Completed
    );
    assert_eq!(ws.tasks(), "## Inbox\n\n- [x] Fix login bug\n");
}

#[tokio::test]
async fn test_equivalent_phrasings_across_files_merge() {
    let ws = Workspace::new();
    let a = ws.write("a.md", "TODO: refactor auth module\n");
    let b = ws.write("b.md", "todo:   Refactor Auth Module.\n");

    let outcome = ws.orchestrator().run(&[a, b], &options()).await.unwrap();
    assert_eq!(outcome.result.new_entries.len(), 1);
    assert_eq!(outcome.result.skipped_duplicates, 1);
    assert_eq!(outcome.report.deduplicated, 1);
    assert_eq!(ws.tasks().matches("- [ ]").count(), 1);
}

struct SlowDetector;

#[async_trait]
impl ImplicitDetector for SlowDetector {
    async fn detect(
        &self,
        _text: &str,
        _examples: &[FeedbackExample],
    ) -> Result<Vec<ImplicitSuggestion>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec![ImplicitSuggestion {
            text: "never arrives".into(),
            rationale: None,
            confidence: None,
        }])
    }
}

#[tokio::test]
async fn test_detector_timeout_keeps_explicit_results() {
    let ws = Workspace::with_extra("[implicit]\ntimeout_ms = 50\n");
    let notes = ws.write("notes.md", "- [ ] Fix login bug\nShould ping Alice sometime.\n");
    let orchestrator = ws.orchestrator().with_detector(Arc::new(SlowDetector));
    let run_options = RunOptions {
        implicit: true,
        ..options()
    };

    let outcome = orchestrator.run(&[notes], &run_options).await.unwrap();
    assert_eq!(outcome.result.new_entries.len(), 1);
    assert_eq!(outcome.report.warnings.len(), 1);
    assert!(outcome.report.warnings[0].starts_with("Implicit detection unavailable"));
    assert!(outcome.report.warnings[0].contains("timed out after 50 ms"));
    assert!(!ws.tasks().contains("never arrives"));
}

#[tokio::test]
async fn test_completed_task_never_reopens() {
    let ws = Workspace::new();
    fs::write(ws.tasks_path(), "## Inbox\n\n- [x] Ship release\n").unwrap();
    let notes = ws.write("notes.md", "- [ ] Ship release\n");

    let outcome = ws.orchestrator().run(&[notes], &options()).await.unwrap();
    assert!(outcome.result.new_entries.is_empty());
    assert_eq!(outcome.result.skipped_duplicates, 1);
    assert_eq!(ws.tasks(), "## Inbox\n\n- [x] Ship release\n");
}

#[tokio::test]
async fn test_archived_completion_stays_archived_across_runs() {
    let ws = Workspace::new();
    let notes = ws.write("notes.md", "- [x] Ship release\n- [ ] Write changelog\n");
    let orchestrator = ws.orchestrator();

    orchestrator
        .run(std::slice::from_ref(&notes), &options())
        .await
        .unwrap();
    let archived = orchestrator
        .store()
        .lock("archive")
        .unwrap()
        .archive_completed()
        .unwrap();
    assert_eq!(archived, 1);
    let after_archive = ws.tasks();

    let rerun = orchestrator
        .run(std::slice::from_ref(&notes), &options())
        .await
        .unwrap();
    let written = rerun.report.written.unwrap();
    assert!(written.is_noop());
    assert_eq!(written.already_present, 1);
    assert_eq!(ws.tasks(), after_archive);

    orchestrator
        .store()
        .lock("archive")
        .unwrap()
        .archive_completed()
        .unwrap();
    assert_eq!(ws.tasks().matches("- [x] Ship release").count(), 1);
}

#[tokio::test]
async fn test_conflicting_states_in_one_run_last_source_wins() {
    let ws = Workspace::new();
    fs::write(ws.tasks_path(), "## Inbox\n\n- [ ] Ship release\n").unwrap();
    let done = ws.write("done.md", "- [x] Ship release\n");
    let open = ws.write("open.md", "- [ ] ship release\n");

    let kept_open = ws
        .orchestrator()
        .run(&[done.clone(), open.clone()], &options())
        .await
        .unwrap();
    assert!(kept_open.result.completed_entries.is_empty());
    assert_eq!(ws.tasks(), "## Inbox\n\n- [ ] Ship release\n");

    let closed = ws
        .orchestrator()
        .run(&[open, done], &options())
        .await
        .unwrap();
    assert_eq!(closed.result.completed_entries.len(), 1);
    assert_eq!(ws.tasks(), "## Inbox\n\n- [x] Ship release\n");
}

#[tokio::test]
async fn test_at_most_one_active_record_per_key() {
    let ws = Workspace::new();
    let notes = ws.write(
        "notes.md",
        "- [ ] Call Bob\n- [ ] call bob.\nTODO: Call   Bob\n- [ ] Email Carol\n",
    );
    let orchestrator = ws.orchestrator();

    orchestrator
        .run(std::slice::from_ref(&notes), &options())
        .await
        .unwrap();
    orchestrator.run(&[notes], &options()).await.unwrap();

    let records = orchestrator.store().snapshot().unwrap();
    let call_bob = records
        .iter()
        .filter(|r| r.normalized_text == "call bob" && r.state.is_active())
        .count();
    assert_eq!(call_bob, 1);
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_disabled_dedup_still_keeps_store_unique() {
    let ws = Workspace::new();
    let a = ws.write("a.md", "- [ ] Call Bob\n");
    let b = ws.write("b.md", "- [ ] call bob\n");
    let run_options = RunOptions {
        dedup: false,
        ..options()
    };

    let outcome = ws.orchestrator().run(&[a, b], &run_options).await.unwrap();
    assert_eq!(outcome.result.new_entries.len(), 2);
    assert_eq!(outcome.result.skipped_duplicates, 0);
    let written = outcome.report.written.unwrap();
    assert_eq!(written.appended, 1);
    assert_eq!(written.already_present, 1);
    assert_eq!(ws.tasks().matches("- [ ]").count(), 1);
}

#[tokio::test]
async fn test_bad_sources_are_skipped_not_fatal() {
    let ws = Workspace::with_extra("exclude = [\"private/**\"]\n");
    let good = ws.write("notes.md", "- [ ] Fix login bug\n");
    let private = ws.write("private/diary.md", "- [ ] Secret\n");
    let missing = Source::Document(ws.dir.path().join("missing.md"));
    let bad_diff = Source::GitDiff {
        label: "HEAD~1".into(),
        text: "not a diff at all".into(),
    };

    let outcome = ws
        .orchestrator()
        .run(&[private, missing, good, bad_diff], &options())
        .await
        .unwrap();
    assert_eq!(outcome.result.new_entries.len(), 1);
    assert_eq!(outcome.report.sources_processed.len(), 1);
    assert_eq!(outcome.report.sources_skipped.len(), 3);
    assert_eq!(outcome.report.sources_skipped[0].reason, "excluded");
    assert!(!ws.tasks().contains("Secret"));
}

#[tokio::test]
async fn test_excluded_directory_name_skips_nested_documents() {
    let ws = Workspace::with_extra("exclude = [\"drafts\"]\n");
    let draft = ws.write("drafts/idea.md", "- [ ] Secret draft task\n");
    let kept = ws.write("drafts-old/idea.md", "- [ ] Old idea\n");

    let outcome = ws.orchestrator().run(&[draft, kept], &options()).await.unwrap();
    assert_eq!(outcome.report.sources_skipped.len(), 1);
    assert_eq!(outcome.report.sources_skipped[0].reason, "excluded");
    assert!(!ws.tasks().contains("Secret draft task"));
    assert!(ws.tasks().contains("- [ ] Old idea"));
}

#[tokio::test]
async fn test_git_diff_only_uses_added_lines() {
    let ws = Workspace::new();
    let diff = Source::GitDiff {
        label: "HEAD~1".into(),
        text: "diff --git a/notes.md b/notes.md\n--- a/notes.md\n+++ b/notes.md\n@@ -1,2 +1,2 @@\n-- [ ] Old wording\n+- [x] New wording\n context TODO: not added\n"
            .into(),
    };

    let outcome = ws.orchestrator().run(&[diff], &options()).await.unwrap();
    assert_eq!(outcome.result.new_entries.len(), 1);
    assert_eq!(outcome.result.new_entries[0].normalized_text, "new wording");
    assert_eq!(outcome.result.new_entries[0].state, TaskState::Completed);
    assert!(ws.tasks().contains("- [x] New wording"));
}

#[tokio::test]
async fn test_concurrent_run_waits_for_lock() {
    let ws = Workspace::with_extra("[store]\nlock_timeout_ms = 100\n");
    let notes = ws.write("notes.md", "- [ ] Fix login bug\n");
    let _held = tpa_lock::acquire_store_lock(&ws.tasks_path(), "other run", Duration::from_secs(1))
        .unwrap();

    let err = ws
        .orchestrator()
        .run(&[notes], &options())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AppError>(),
        Some(AppError::StoreLocked { .. })
    ));
    assert!(!ws.tasks_path().exists());
}
