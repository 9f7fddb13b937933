use super::*;
use tempfile::tempdir;

fn store_at(path: &Path) -> TaskStore {
    TaskStore::new(
        path.to_path_buf(),
        "Inbox",
        "Archive",
        true,
        Duration::from_millis(200),
    )
}

fn record(text: &str, state: TaskState) -> TaskRecord {
    TaskRecord {
        normalized_text: normalize(text, true),
        display_text: text.to_string(),
        state,
        first_seen: Utc::now(),
        source_ref: "notes.md".to_string(),
    }
}

fn new_entries(texts: &[&str]) -> RunResult {
    RunResult {
        new_entries: texts
            .iter()
            .map(|text| record(text, TaskState::Open))
            .collect(),
        ..Default::default()
    }
}

#[test]
fn test_apply_creates_store_and_section() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    let store = store_at(&path);

    let outcome = store
        .lock("test")
        .unwrap()
        .apply(&new_entries(&["Fix login bug"]))
        .unwrap();
    assert_eq!(outcome.appended, 1);

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content, "## Inbox\n\n- [ ] Fix login bug\n");
    assert!(store.meta_path().exists());

    let records = store.snapshot().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].normalized_text, "fix login bug");
    assert_eq!(records[0].state, TaskState::Open);
    assert_eq!(records[0].source_ref, "notes.md");
}

#[test]
fn test_apply_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    let store = store_at(&path);
    let result = new_entries(&["Fix login bug", "Write docs"]);

    store.lock("first").unwrap().apply(&result).unwrap();
    let after_first = fs::read_to_string(&path).unwrap();

    let outcome = store.lock("second").unwrap().apply(&result).unwrap();
    assert!(outcome.is_noop());
    assert_eq!(outcome.already_present, 2);
    assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
}

#[test]
fn test_empty_result_writes_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    let outcome = store_at(&path)
        .lock("noop")
        .unwrap()
        .apply(&RunResult::default())
        .unwrap();
    assert!(outcome.is_noop());
    assert!(!path.exists());
}

#[test]
fn test_completed_entry_flips_line_in_place() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(
        &path,
        "# Tasks\n\n## Inbox\n\n- [ ] Fix login bug\n- [ ] Other\n",
    )
    .unwrap();
    let store = store_at(&path);

    let result = RunResult {
        completed_entries: vec![record("Fix login bug", TaskState::Completed)],
        ..Default::default()
    };
    let outcome = store.lock("flip").unwrap().apply(&result).unwrap();
    assert_eq!(outcome.completed, 1);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "# Tasks\n\n## Inbox\n\n- [x] Fix login bug\n- [ ] Other\n"
    );

    let again = store.lock("flip").unwrap().apply(&result).unwrap();
    assert!(again.is_noop());
    assert_eq!(again.already_present, 1);
}

#[test]
fn test_entries_outside_section_are_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(&path, "## Notes\n\n- [ ] Fix login bug\n\n## Inbox\n").unwrap();
    let store = store_at(&path);
    assert!(store.snapshot().unwrap().is_empty());

    let result = RunResult {
        new_entries: vec![record("Fix login bug", TaskState::Open)],
        completed_entries: vec![record("Fix login bug", TaskState::Completed)],
        skipped_duplicates: 0,
    };
    store.lock("scope").unwrap().apply(&result).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("## Notes\n\n- [ ] Fix login bug\n\n## Inbox\n"));
    assert!(content.ends_with("## Inbox\n\n- [x] Fix login bug\n"));
}

#[test]
fn test_append_lands_before_next_section() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(
        &path,
        "## Inbox\n\n- [ ] a\n\n## Archive\n\n- [x] old\n",
    )
    .unwrap();
    let store = store_at(&path);

    store
        .lock("append")
        .unwrap()
        .apply(&new_entries(&["b"]))
        .unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "## Inbox\n\n- [ ] a\n- [ ] b\n\n## Archive\n\n- [x] old\n"
    );
}

#[test]
fn test_empty_section_directly_followed_by_heading() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(&path, "## Inbox\n## Later\n").unwrap();
    store_at(&path)
        .lock("append")
        .unwrap()
        .apply(&new_entries(&["a"]))
        .unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "## Inbox\n\n- [ ] a\n\n## Later\n"
    );
}

#[test]
fn test_section_heading_is_case_insensitive_and_spans_subsections() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(
        &path,
        "# inbox\n\n- [ ] top\n\n### From meeting\n\n- [x] nested\n\n# Other\n\n- [ ] elsewhere\n",
    )
    .unwrap();
    let records = store_at(&path).snapshot().unwrap();
    let keys: Vec<_> = records.iter().map(|r| r.normalized_text.as_str()).collect();
    assert_eq!(keys, vec!["top", "nested"]);
    assert_eq!(records[1].state, TaskState::Completed);
}

#[test]
fn test_fenced_code_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(
        &path,
        "## Inbox\n\n```\n## Archive\n- [ ] example\n```\n- [ ] real\n",
    )
    .unwrap();
    let records = store_at(&path).snapshot().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].normalized_text, "real");
}

#[test]
fn test_archive_completed_moves_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(&path, "## Inbox\n\n- [x] done one\n- [ ] still open\n- [x] done two\n").unwrap();
    let store = store_at(&path);

    let moved = store.lock("archive").unwrap().archive_completed().unwrap();
    assert_eq!(moved, 2);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "## Inbox\n\n- [ ] still open\n\n## Archive\n\n- [x] done one\n- [x] done two\n"
    );

    let records = store.snapshot().unwrap();
    let archived: Vec<_> = records
        .iter()
        .filter(|r| r.state == TaskState::Archived)
        .collect();
    assert_eq!(archived.len(), 2);

    assert_eq!(store.lock("archive").unwrap().archive_completed().unwrap(), 0);
}

#[test]
fn test_archived_key_is_not_resurrected_by_completion() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(&path, "## Inbox\n\n## Archive\n\n- [x] shipped\n").unwrap();
    let store = store_at(&path);
    let before = fs::read_to_string(&path).unwrap();

    let result = RunResult {
        completed_entries: vec![record("shipped", TaskState::Completed)],
        ..Default::default()
    };
    let outcome = store.lock("late").unwrap().apply(&result).unwrap();
    assert_eq!(outcome.already_present, 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn test_apply_empty_result_does_not_create_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    let store = store_at(&path);

    let outcome = store
        .lock("empty")
        .unwrap()
        .apply(&RunResult::default())
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::default());
    assert!(!path.exists());
}

#[test]
fn test_archived_key_is_not_reappended_as_new_completed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(&path, "## Inbox\n\n## Archive\n\n- [x] Ship release\n").unwrap();
    let store = store_at(&path);
    let before = fs::read_to_string(&path).unwrap();

    // Dedup ignores archived records, so the source mention arrives as new.
    let result = RunResult {
        new_entries: vec![record("Ship release", TaskState::Completed)],
        ..Default::default()
    };
    let outcome = store.lock("rerun").unwrap().apply(&result).unwrap();
    assert_eq!(outcome.already_present, 1);
    assert!(outcome.is_noop());
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn test_archive_keeps_single_blank_separators() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(
        &path,
        "## Inbox\n\n- [ ] first\n\n- [x] done\n\n- [ ] last\n\n## Notes\n\n- [x] gone too\n",
    )
    .unwrap();
    let store = store_at(&path);

    let moved = store.lock("archive").unwrap().archive_completed().unwrap();
    assert_eq!(moved, 1);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "## Inbox\n\n- [ ] first\n\n- [ ] last\n\n## Notes\n\n- [x] gone too\n\n## Archive\n\n- [x] done\n"
    );

    fs::write(&path, "## Inbox\n\n- [x] only\n\n## Archive\n\n- [x] older\n").unwrap();
    store.lock("archive").unwrap().archive_completed().unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "## Inbox\n\n## Archive\n\n- [x] older\n- [x] only\n"
    );
}

#[test]
fn test_records_fall_back_without_metadata() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    fs::write(&path, "## Inbox\n\n- [ ] hand written\n").unwrap();
    fs::write(dir.path().join("tasks.md.meta.toml"), "not [valid toml").unwrap();

    let records = store_at(&path).snapshot().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_ref, path.display().to_string());
    assert!(records[0].first_seen <= Utc::now());
}

#[test]
fn test_metadata_keeps_original_first_seen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    let store = store_at(&path);

    let mut early = record("Fix login bug", TaskState::Open);
    early.first_seen = Utc::now() - chrono::Duration::days(3);
    store
        .lock("first")
        .unwrap()
        .apply(&RunResult {
            new_entries: vec![early.clone()],
            ..Default::default()
        })
        .unwrap();
    store
        .lock("second")
        .unwrap()
        .apply(&new_entries(&["Fix login bug", "Another"]))
        .unwrap();

    let records = store.snapshot().unwrap();
    let fixed = records
        .iter()
        .find(|r| r.normalized_text == "fix login bug")
        .unwrap();
    assert_eq!(fixed.first_seen, early.first_seen);
}

#[test]
fn test_lock_timeout_is_store_locked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tasks.md");
    let _held = acquire_store_lock(&path, "other run", Duration::from_secs(1)).unwrap();

    let store = TaskStore::new(path, "Inbox", "Archive", true, Duration::from_millis(50));
    let err = store.lock("blocked").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AppError>(),
        Some(AppError::StoreLocked { .. })
    ));
}

#[test]
fn test_unusable_location_is_store_io() {
    let store = store_at(Path::new("/dev/null/tasks.md"));
    let err = store.lock("io").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AppError>(),
        Some(AppError::StoreIo { .. })
    ));
}

#[test]
fn test_meta_path_appends_suffix() {
    let store = store_at(Path::new("/w/docs/tasks.md"));
    assert_eq!(store.meta_path(), PathBuf::from("/w/docs/tasks.md.meta.toml"));
}
