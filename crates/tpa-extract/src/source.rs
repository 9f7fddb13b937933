use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tpa_config::TaskPickerConfig;
use tpa_core::{AppError, SourceKind};

/// One trigger input for an extraction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Document(PathBuf),
    /// Session identifier, resolved under the configured sessions directory.
    SessionLog(String),
    /// Unified diff text; `label` names it in reports (e.g. `HEAD~1`).
    GitDiff { label: String, text: String },
}

/// Source text ready for matching.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub kind: SourceKind,
    pub source_ref: String,
    pub text: String,
}

impl LoadedSource {
    /// Whether the implicit detector should read this text. Diffs are
    /// fragments without enough context for free-text inference.
    pub fn supports_implicit(&self) -> bool {
        matches!(self.kind, SourceKind::Document | SourceKind::SessionLog)
    }
}

impl Source {
    /// Reference used in reports before the source is resolved.
    pub fn describe(&self) -> String {
        match self {
            Self::Document(path) => path.display().to_string(),
            Self::SessionLog(id) => format!("session-{id}"),
            Self::GitDiff { label, .. } => format!("git-diff:{label}"),
        }
    }

    /// Resolve and read the source.
    ///
    /// Every failure carries an [`AppError::Input`] so the orchestrator can
    /// skip this source and continue with the others.
    pub fn load(&self, config: &TaskPickerConfig) -> Result<LoadedSource> {
        match self {
            Self::Document(path) => {
                if config.is_excluded(path) {
                    return Err(input_error(self.describe(), "excluded"));
                }
                Ok(LoadedSource {
                    kind: SourceKind::Document,
                    source_ref: path.display().to_string(),
                    text: read_text(path, &self.describe())?,
                })
            }
            Self::SessionLog(id) => {
                let path = resolve_session(&config.sessions_path(), id)?;
                Ok(LoadedSource {
                    kind: SourceKind::SessionLog,
                    source_ref: self.describe(),
                    text: read_text(&path, &self.describe())?,
                })
            }
            Self::GitDiff { text, .. } => {
                validate_diff(text).map_err(|reason| input_error(self.describe(), reason))?;
                Ok(LoadedSource {
                    kind: SourceKind::GitDiff,
                    source_ref: self.describe(),
                    text: text.clone(),
                })
            }
        }
    }
}

fn input_error(source_ref: String, reason: impl Into<String>) -> anyhow::Error {
    AppError::Input {
        source_ref,
        reason: reason.into(),
    }
    .into()
}

fn read_text(path: &Path, source_ref: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| input_error(source_ref.to_string(), e.to_string()))
}

/// Reject ids that could escape the sessions directory.
fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(input_error(
            "session-".to_string(),
            "session id must not be empty",
        ));
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(input_error(
            format!("session-{id}"),
            "invalid session id (path traversal detected)",
        ));
    }
    Ok(())
}

/// `{sessions_dir}/session-{id}.md`, else the first
/// `{sessions_dir}/{subdir}/session-{id}.md` in name order.
pub fn resolve_session(sessions_dir: &Path, id: &str) -> Result<PathBuf> {
    validate_session_id(id)?;
    let file_name = format!("session-{id}.md");

    let direct = sessions_dir.join(&file_name);
    if direct.is_file() {
        return Ok(direct);
    }

    let mut subdirs: Vec<PathBuf> = match fs::read_dir(sessions_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    };
    subdirs.sort();

    subdirs
        .into_iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            input_error(
                format!("session-{id}"),
                format!("session log not found under {}", sessions_dir.display()),
            )
        })
}

/// An empty diff is valid (nothing changed); anything else must look like
/// unified diff output.
fn validate_diff(text: &str) -> std::result::Result<(), &'static str> {
    if text.trim().is_empty() {
        return Ok(());
    }
    let looks_unified = text
        .lines()
        .any(|line| line.starts_with("diff --git") || line.starts_with("@@"));
    if looks_unified {
        Ok(())
    } else {
        Err("malformed diff: no 'diff --git' or '@@' hunk header")
    }
}
