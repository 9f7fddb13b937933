use super::*;
use serial_test::serial;
use tempfile::tempdir;

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_load_without_files_returns_defaults() {
    let dir = tempdir().unwrap();
    let user = dir.path().join("missing.toml");
    let config = TaskPickerConfig::load_with_paths(Some(&user), None).unwrap();

    assert_eq!(config.inbox_section, "Inbox");
    assert!(config.dedup.enabled);
    assert!(config.dedup.case_insensitive);
    assert!(!config.implicit.enabled);
    assert_eq!(config.implicit.suppress_after, 2);
}

#[test]
fn test_explicit_layer_overrides_user_layer() {
    let dir = tempdir().unwrap();
    let user = dir.path().join("user.toml");
    let explicit = dir.path().join("explicit.toml");
    write(
        &user,
        "workspace = \"/w\"\ninbox_section = \"Captured\"\n[dedup]\ncase_insensitive = false\n",
    );
    write(&explicit, "[dedup]\nenabled = false\n");

    let config = TaskPickerConfig::load_with_paths(Some(&user), Some(&explicit)).unwrap();
    assert_eq!(config.workspace, "/w");
    assert_eq!(config.inbox_section, "Captured");
    assert!(!config.dedup.enabled);
    assert!(!config.dedup.case_insensitive);
}

#[test]
fn test_missing_explicit_file_is_invalid_config() {
    let dir = tempdir().unwrap();
    let err =
        TaskPickerConfig::load_with_paths(None, Some(&dir.path().join("nope.toml"))).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AppError>(),
        Some(AppError::InvalidConfig(_))
    ));
}

#[test]
fn test_malformed_toml_is_error() {
    let dir = tempdir().unwrap();
    let explicit = dir.path().join("bad.toml");
    write(&explicit, "workspace = [unclosed");
    assert!(TaskPickerConfig::load_with_paths(None, Some(&explicit)).is_err());
}

#[test]
fn test_threshold_out_of_range_rejected() {
    let err = TaskPickerConfig::from_toml_str("[implicit]\nthreshold = 1.5\n").unwrap_err();
    assert!(err.to_string().contains("implicit.threshold"));
}

#[test]
fn test_same_inbox_and_archive_rejected() {
    let err = TaskPickerConfig::from_toml_str("inbox_section = \"Tasks\"\narchive_section = \"tasks\"\n")
        .unwrap_err();
    assert!(err.to_string().contains("must differ"));
}

#[test]
fn test_zero_lock_timeout_rejected() {
    assert!(TaskPickerConfig::from_toml_str("[store]\nlock_timeout_ms = 0\n").is_err());
}

#[test]
fn test_bad_exclude_glob_rejected() {
    assert!(TaskPickerConfig::from_toml_str("exclude = [\"a[\"]\n").is_err());
}

#[test]
fn test_paths_resolve_against_workspace() {
    let config = TaskPickerConfig::from_toml_str(
        "workspace = \"/w\"\noutput = \"docs/tasks.md\"\nsessions_dir = \"/var/sessions\"\n",
    )
    .unwrap();
    assert_eq!(config.output_path(), PathBuf::from("/w/docs/tasks.md"));
    assert_eq!(config.sessions_path(), PathBuf::from("/var/sessions"));
}

#[test]
fn test_feedback_dir_defaults_to_state_dir() {
    let config = TaskPickerConfig::default();
    assert!(config.feedback_path().ends_with("feedback"));

    let config = TaskPickerConfig::from_toml_str("feedback_dir = \"/tmp/fb\"\n").unwrap();
    assert_eq!(config.feedback_path(), PathBuf::from("/tmp/fb"));
}

#[test]
fn test_is_excluded_globs_and_dir_prefix() {
    let config = TaskPickerConfig::from_toml_str(
        "workspace = \"/w\"\nexclude = [\"sessions/**\", \"tasks.md\", \"drafts/\", \"*.tmp.md\"]\n",
    )
    .unwrap();

    assert!(config.is_excluded(Path::new("/w/sessions/2026-10/session-1.md")));
    assert!(config.is_excluded(Path::new("/w/tasks.md")));
    assert!(config.is_excluded(Path::new("/w/drafts/deep/idea.md")));
    assert!(config.is_excluded(Path::new("/w/scratch.tmp.md")));
    assert!(!config.is_excluded(Path::new("/w/notes/tasks.md")));
    assert!(!config.is_excluded(Path::new("/w/notes/meeting.md")));
    assert!(!config.is_excluded(Path::new("/elsewhere/tasks.md")));
}

#[test]
fn test_is_excluded_bare_directory_name_covers_contents() {
    let config = TaskPickerConfig::from_toml_str(
        "workspace = \"/w\"\nexclude = [\"drafts\", \"archive/20*\"]\n",
    )
    .unwrap();

    assert!(config.is_excluded(Path::new("/w/drafts")));
    assert!(config.is_excluded(Path::new("/w/drafts/idea.md")));
    assert!(config.is_excluded(Path::new("/w/drafts/deep/idea.md")));
    assert!(config.is_excluded(Path::new("/w/archive/2025/q1.md")));
    assert!(!config.is_excluded(Path::new("/w/drafts-old/idea.md")));
    assert!(!config.is_excluded(Path::new("/w/notes/drafts.md")));
    assert!(!config.is_excluded(Path::new("/w/archive/misc.md")));
}

#[test]
fn test_debug_redacts_api_key() {
    let config =
        TaskPickerConfig::from_toml_str("[implicit]\napi_key = \"sk-verysecretvalue\"\n").unwrap();
    let debug = format!("{:?}", config.implicit);
    assert!(!debug.contains("verysecretvalue"));
    assert!(debug.contains("sk-v****"));
    assert_eq!(
        config.redacted_for_display().implicit.api_key,
        "sk-v****".to_string()
    );
}

#[test]
#[serial]
fn test_api_key_env_fallback() {
    let config = TaskPickerConfig::default();
    // SAFETY: serialized with other env-touching tests.
    unsafe { std::env::set_var(API_KEY_ENV, "env-key") };
    assert_eq!(config.implicit.resolved_api_key().as_deref(), Some("env-key"));
    unsafe { std::env::remove_var(API_KEY_ENV) };
    assert!(config.implicit.resolved_api_key().is_none());
}

#[test]
#[serial]
fn test_configured_api_key_wins_over_env() {
    let config = TaskPickerConfig::from_toml_str("[implicit]\napi_key = \"cfg-key\"\n").unwrap();
    // SAFETY: serialized with other env-touching tests.
    unsafe { std::env::set_var(API_KEY_ENV, "env-key") };
    assert_eq!(config.implicit.resolved_api_key().as_deref(), Some("cfg-key"));
    unsafe { std::env::remove_var(API_KEY_ENV) };
}

#[test]
fn test_template_parses_to_defaults() {
    let config = TaskPickerConfig::from_toml_str(&default_config_toml()).unwrap();
    let defaults = TaskPickerConfig::default();
    assert_eq!(config.output, defaults.output);
    assert_eq!(config.exclude, defaults.exclude);
    assert_eq!(config.implicit.threshold, defaults.implicit.threshold);
}
