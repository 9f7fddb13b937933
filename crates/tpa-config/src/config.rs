use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tpa_core::AppError;

use crate::config_merge::{merge_toml_values, warn_unknown_keys};
use crate::paths;

/// Environment variable consulted when `implicit.api_key` is empty.
pub const API_KEY_ENV: &str = "TPA_API_KEY";

/// Effective configuration: built-in defaults, then the user-level file,
/// then an explicit `--config` file, deep-merged in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPickerConfig {
    /// Workspace root; `~` is expanded.
    pub workspace: String,
    /// Task store file, relative to the workspace unless absolute.
    pub output: String,
    /// Session log directory, relative to the workspace unless absolute.
    pub sessions_dir: String,
    /// Section header under which new entries are appended.
    pub inbox_section: String,
    /// Section header receiving archived entries.
    pub archive_section: String,
    /// Glob patterns (relative to the workspace) never scanned.
    pub exclude: Vec<String>,
    /// Feedback store directory. Empty means `{state_dir}/feedback`.
    pub feedback_dir: String,
    pub dedup: DedupConfig,
    pub store: StoreConfig,
    pub implicit: ImplicitConfig,
    pub logging: LoggingConfig,
}

impl Default for TaskPickerConfig {
    fn default() -> Self {
        Self {
            workspace: "~/notes".to_string(),
            output: "tasks.md".to_string(),
            sessions_dir: "sessions".to_string(),
            inbox_section: "Inbox".to_string(),
            archive_section: "Archive".to_string(),
            exclude: vec![
                "sessions/**".to_string(),
                "tasks.md".to_string(),
                ".git/**".to_string(),
                "node_modules/**".to_string(),
                ".obsidian/**".to_string(),
            ],
            feedback_dir: String::new(),
            dedup: DedupConfig::default(),
            store: StoreConfig::default(),
            implicit: ImplicitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Suppress candidates already present in the store or earlier in the run.
    pub enabled: bool,
    /// Lowercase text before comparing.
    pub case_insensitive: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            case_insensitive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bounded wait for the store lock.
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplicitConfig {
    /// Ask the external detector for tasks beyond explicit markers.
    pub enabled: bool,
    /// Minimum confidence for an implicit candidate to be surfaced.
    pub threshold: f64,
    /// Exact-text false positives after which a suggestion is never surfaced.
    pub suppress_after: u32,
    pub timeout_ms: u64,
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    /// API key; falls back to `TPA_API_KEY` when empty.
    pub api_key: String,
    pub model: String,
    /// Few-shot feedback examples per judgment included in the prompt.
    pub example_count: usize,
}

impl Default for ImplicitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.3,
            suppress_after: 2,
            timeout_ms: 30_000,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            example_count: 3,
        }
    }
}

impl ImplicitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured key, else the `TPA_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn redacted_api_key(&self) -> String {
        mask_api_key(&self.api_key)
    }
}

impl fmt::Debug for ImplicitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplicitConfig")
            .field("enabled", &self.enabled)
            .field("threshold", &self.threshold)
            .field("suppress_after", &self.suppress_after)
            .field("timeout_ms", &self.timeout_ms)
            .field("base_url", &self.base_url)
            .field("api_key", &self.redacted_api_key())
            .field("model", &self.model)
            .field("example_count", &self.example_count)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
    /// Optional log file; empty means stderr only.
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: String::new(),
        }
    }
}

impl LoggingConfig {
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.file.trim().is_empty() {
            None
        } else {
            Some(paths::expand_home(&self.file))
        }
    }
}

fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let visible: String = key.chars().take(4).collect();
    if key.chars().count() <= 8 {
        return "****".to_string();
    }
    format!("{visible}****")
}

impl TaskPickerConfig {
    /// Load defaults, the user-level file and an optional explicit file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let user_path = paths::user_config_path();
        Self::load_with_paths(user_path.as_deref(), explicit)
    }

    /// Load from explicit paths. Testable without global filesystem state.
    ///
    /// A missing user file is skipped; a missing explicit file is an error.
    pub fn load_with_paths(user_path: Option<&Path>, explicit: Option<&Path>) -> Result<Self> {
        let mut merged = toml::Value::Table(toml::Table::new());

        if let Some(path) = user_path.filter(|p| p.exists()) {
            merged = merge_toml_values(merged, read_layer(path)?);
        }
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(AppError::InvalidConfig(format!(
                    "config file not found: {}",
                    path.display()
                ))
                .into());
            }
            merged = merge_toml_values(merged, read_layer(path)?);
        }

        // Roundtrip through string for reliable deserialization
        let merged_str = toml::to_string(&merged).context("Failed to serialize merged config")?;
        let config: Self =
            toml::from_str(&merged_str).context("Failed to deserialize merged config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> anyhow::Error { AppError::InvalidConfig(msg).into() };

        if !(0.0..=1.0).contains(&self.implicit.threshold) {
            return Err(invalid(format!(
                "implicit.threshold must be within [0, 1], got {}",
                self.implicit.threshold
            )));
        }
        if self.inbox_section.trim().is_empty() {
            return Err(invalid("inbox_section must not be empty".to_string()));
        }
        if self.archive_section.trim().is_empty() {
            return Err(invalid("archive_section must not be empty".to_string()));
        }
        if self
            .inbox_section
            .trim()
            .eq_ignore_ascii_case(self.archive_section.trim())
        {
            return Err(invalid(
                "inbox_section and archive_section must differ".to_string(),
            ));
        }
        if self.store.lock_timeout_ms == 0 {
            return Err(invalid("store.lock_timeout_ms must be > 0".to_string()));
        }
        if self.output.trim().is_empty() {
            return Err(invalid("output must not be empty".to_string()));
        }
        for pattern in &self.exclude {
            glob::Pattern::new(pattern.trim_end_matches('/'))
                .map_err(|e| invalid(format!("invalid exclude glob '{pattern}': {e}")))?;
        }
        Ok(())
    }

    pub fn workspace_root(&self) -> PathBuf {
        paths::expand_home(&self.workspace)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve_in_workspace(&self.output)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.resolve_in_workspace(&self.sessions_dir)
    }

    pub fn feedback_path(&self) -> PathBuf {
        if self.feedback_dir.trim().is_empty() {
            paths::state_dir().join("feedback")
        } else {
            paths::expand_home(&self.feedback_dir)
        }
    }

    fn resolve_in_workspace(&self, value: &str) -> PathBuf {
        let expanded = paths::expand_home(value);
        if expanded.is_absolute() {
            expanded
        } else {
            self.workspace_root().join(expanded)
        }
    }

    /// Whether `path` matches one of the exclude patterns.
    ///
    /// Patterns are matched against the path relative to the workspace and
    /// against each of its parent directories, so a pattern naming a
    /// directory (`drafts`, `drafts/`, `archive/20*`) excludes its contents.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let Some(relative) = self.relative_to_workspace(path) else {
            return false;
        };

        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        self.exclude.iter().any(|raw| {
            let raw = raw.trim_end_matches('/');
            let Ok(pattern) = glob::Pattern::new(raw) else {
                return false;
            };
            relative
                .ancestors()
                .filter(|candidate| !candidate.as_os_str().is_empty())
                .any(|candidate| pattern.matches_path_with(candidate, options))
        })
    }

    fn relative_to_workspace(&self, path: &Path) -> Option<PathBuf> {
        let root = self.workspace_root();
        if let Ok(rel) = path.strip_prefix(&root) {
            return Some(rel.to_path_buf());
        }
        let canonical_root = root.canonicalize().ok()?;
        let canonical_path = path.canonicalize().ok()?;
        canonical_path
            .strip_prefix(&canonical_root)
            .ok()
            .map(Path::to_path_buf)
    }

    /// Copy suitable for printing: secrets masked.
    pub fn redacted_for_display(&self) -> Self {
        let mut redacted = self.clone();
        redacted.implicit.api_key = self.implicit.redacted_api_key();
        redacted
    }
}

fn read_layer(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let raw: toml::Value = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    warn_unknown_keys(&raw, &path.display().to_string());
    Ok(raw)
}

/// Commented template written by `tpa config init`.
pub fn default_config_toml() -> String {
    r#"# task-picker-agent configuration
workspace = "~/notes"
output = "tasks.md"
sessions_dir = "sessions"
inbox_section = "Inbox"
archive_section = "Archive"
exclude = ["sessions/**", "tasks.md", ".git/**", "node_modules/**", ".obsidian/**"]
# feedback_dir = "~/.local/state/task-picker-agent/feedback"

[dedup]
enabled = true
case_insensitive = true

[store]
lock_timeout_ms = 5000

[implicit]
enabled = false
threshold = 0.3
suppress_after = 2
timeout_ms = 30000
base_url = "https://api.openai.com/v1"
# api_key = ""   # or set TPA_API_KEY
model = "gpt-4o-mini"
example_count = 3

[logging]
level = "info"
# file = "~/.local/state/task-picker-agent/tpa.log"
"#
    .to_string()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
