//! Markdown task store.
//!
//! ```text
//! {workspace}/
//! ├── tasks.md              (the store; only the inbox and archive sections are touched)
//! ├── tasks.md.meta.toml    (first_seen / source_ref per normalized key)
//! └── .tasks.md.lock        (flock held for the read-modify-write cycle)
//! ```
//!
//! Every write goes through [`StoreTxn`], which holds the lock from the read
//! until the temp-file + rename of both files.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tpa_config::TaskPickerConfig;
use tpa_core::{AppError, TaskRecord, TaskState};
use tpa_lock::{StoreLock, acquire_store_lock};
use tracing::{debug, info, warn};

use crate::normalize::normalize;
use crate::report::RunResult;

const META_SUFFIX: &str = ".meta.toml";

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").unwrap());
static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)-\s*\[(\s*|[xX])\]\s+(\S.*?)\s*$").unwrap());

/// What a writer call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub appended: usize,
    pub completed: usize,
    /// Entries skipped because the store already reflects them.
    pub already_present: usize,
}

impl ApplyOutcome {
    pub fn is_noop(&self) -> bool {
        self.appended == 0 && self.completed == 0
    }
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
    inbox_section: String,
    archive_section: String,
    case_insensitive: bool,
    lock_timeout: Duration,
}

impl TaskStore {
    pub fn new(
        path: PathBuf,
        inbox_section: impl Into<String>,
        archive_section: impl Into<String>,
        case_insensitive: bool,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            path,
            inbox_section: inbox_section.into(),
            archive_section: archive_section.into(),
            case_insensitive,
            lock_timeout,
        }
    }

    pub fn from_config(config: &TaskPickerConfig) -> Self {
        Self::new(
            config.output_path(),
            &config.inbox_section,
            &config.archive_section,
            config.dedup.case_insensitive,
            config.store.lock_timeout(),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar metadata path: `<store>.meta.toml`.
    pub fn meta_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tasks.md".into());
        name.push(META_SUFFIX);
        self.path.with_file_name(name)
    }

    /// Current records without taking the lock. Read-only callers only.
    pub fn snapshot(&self) -> Result<Vec<TaskRecord>> {
        let doc = self.load_document()?;
        let meta = self.load_meta();
        Ok(self.collect_records(&doc, &meta))
    }

    /// Take the exclusive lock and read the current state.
    pub fn lock(&self, reason: &str) -> Result<StoreTxn<'_>> {
        let lock = acquire_store_lock(&self.path, reason, self.lock_timeout).map_err(|e| {
            if e.downcast_ref::<AppError>().is_some() {
                e
            } else {
                store_io(&self.path, format!("{e:#}"))
            }
        })?;
        let doc = self.load_document()?;
        let meta = self.load_meta();
        debug!(store = %self.path.display(), lines = doc.lines.len(), "task store loaded");
        Ok(StoreTxn {
            store: self,
            _lock: lock,
            doc,
            meta,
        })
    }

    fn load_document(&self) -> Result<StoreDocument> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let modified = fs::metadata(&self.path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(StoreDocument {
                    lines: content.lines().map(str::to_string).collect(),
                    modified,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoreDocument {
                lines: Vec::new(),
                modified: Utc::now(),
            }),
            Err(e) => Err(store_io(&self.path, e)),
        }
    }

    /// Missing or unreadable metadata degrades to fallbacks, never fails.
    fn load_meta(&self) -> StoreMeta {
        let path = self.meta_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return StoreMeta::default(),
            Err(error) => {
                warn!(path = %path.display(), %error, "cannot read task store metadata");
                return StoreMeta::default();
            }
        };
        toml::from_str(&content).unwrap_or_else(|error| {
            warn!(path = %path.display(), %error, "ignoring corrupt task store metadata");
            StoreMeta::default()
        })
    }

    fn key(&self, text: &str) -> String {
        normalize(text, self.case_insensitive)
    }

    fn collect_records(&self, doc: &StoreDocument, meta: &StoreMeta) -> Vec<TaskRecord> {
        let kinds = doc.kinds();
        let mut records = Vec::new();
        let sections = [
            (&self.inbox_section, false),
            (&self.archive_section, true),
        ];
        for (name, archived) in sections {
            let Some(section) = find_section(&kinds, name) else {
                continue;
            };
            for (_, entry) in section_entries(&kinds, section) {
                let key = self.key(&entry.text);
                if key.is_empty() {
                    continue;
                }
                let state = match (archived, entry.done) {
                    (true, _) => TaskState::Archived,
                    (false, true) => TaskState::Completed,
                    (false, false) => TaskState::Open,
                };
                let (first_seen, source_ref) = match meta.tasks.get(&key) {
                    Some(m) => (m.first_seen, m.source_ref.clone()),
                    None => (doc.modified, self.path.display().to_string()),
                };
                records.push(TaskRecord {
                    normalized_text: key,
                    display_text: entry.text.clone(),
                    state,
                    first_seen,
                    source_ref,
                });
            }
        }
        records
    }
}

/// Locked read-modify-write cycle over the store.
///
/// The lock is released when the transaction is dropped.
pub struct StoreTxn<'a> {
    store: &'a TaskStore,
    _lock: StoreLock,
    doc: StoreDocument,
    meta: StoreMeta,
}

impl std::fmt::Debug for StoreTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTxn")
            .field("store", &self.store.path)
            .field("lines", &self.doc.lines.len())
            .finish()
    }
}

impl StoreTxn<'_> {
    /// Records in the inbox (open/completed) and archive (archived) sections.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.store.collect_records(&self.doc, &self.meta)
    }

    /// Write a run result. Idempotent: entries the store already reflects
    /// are counted as `already_present` and left alone.
    pub fn apply(&mut self, result: &RunResult) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        if !result.has_writes() {
            debug!(store = %self.store.path.display(), "nothing to write");
            return Ok(outcome);
        }
        let mut inbox = self.inbox_index();
        let archived = self.archived_keys();
        let mut appends = Vec::new();

        for record in &result.completed_entries {
            match inbox.get(&record.normalized_text).copied() {
                Some(InboxSlot::Line { idx, done: false }) => {
                    self.mark_done(idx);
                    inbox.insert(
                        record.normalized_text.clone(),
                        InboxSlot::Line { idx, done: true },
                    );
                    outcome.completed += 1;
                }
                Some(_) => outcome.already_present += 1,
                None if archived.contains(&record.normalized_text) => {
                    outcome.already_present += 1;
                }
                None => {
                    // Reconciled against an older snapshot; keep the information.
                    inbox.insert(record.normalized_text.clone(), InboxSlot::Appended);
                    appends.push(self.track_append(record, TaskState::Completed));
                    outcome.appended += 1;
                }
            }
        }

        for record in &result.new_entries {
            match inbox.get(&record.normalized_text).copied() {
                Some(InboxSlot::Line { idx, done: false })
                    if record.state == TaskState::Completed =>
                {
                    self.mark_done(idx);
                    inbox.insert(
                        record.normalized_text.clone(),
                        InboxSlot::Line { idx, done: true },
                    );
                    outcome.completed += 1;
                }
                Some(_) => outcome.already_present += 1,
                // Archived records are inactive, so a completed mention is
                // classified new again; it is already filed.
                None if record.state == TaskState::Completed
                    && archived.contains(&record.normalized_text) =>
                {
                    outcome.already_present += 1;
                }
                None => {
                    inbox.insert(record.normalized_text.clone(), InboxSlot::Appended);
                    appends.push(self.track_append(record, record.state));
                    outcome.appended += 1;
                }
            }
        }

        if outcome.is_noop() {
            debug!(store = %self.store.path.display(), "task store unchanged");
            return Ok(outcome);
        }
        if !appends.is_empty() {
            let inbox_section = self.store.inbox_section.clone();
            self.doc.append_to_section(&inbox_section, appends);
        }
        self.commit()?;
        info!(
            store = %self.store.path.display(),
            appended = outcome.appended,
            completed = outcome.completed,
            "task store updated"
        );
        Ok(outcome)
    }

    /// Move completed inbox entries under the archive section.
    pub fn archive_completed(&mut self) -> Result<usize> {
        let kinds = self.doc.kinds();
        let Some(section) = find_section(&kinds, &self.store.inbox_section) else {
            return Ok(0);
        };
        let done: Vec<(usize, String)> = section_entries(&kinds, section)
            .filter(|(_, entry)| entry.done)
            .map(|(idx, entry)| (idx, entry.text.clone()))
            .collect();
        if done.is_empty() {
            return Ok(0);
        }

        for (idx, _) in done.iter().rev() {
            self.doc.remove_line(*idx);
        }
        let lines: Vec<String> = done
            .iter()
            .map(|(_, text)| format!("- [x] {text}"))
            .collect();
        let archive = self.store.archive_section.clone();
        self.doc.append_to_section(&archive, lines);
        self.commit()?;

        info!(store = %self.store.path.display(), archived = done.len(), "archived completed tasks");
        Ok(done.len())
    }

    /// Normalized key -> slot for inbox entries; the first line wins.
    fn inbox_index(&self) -> HashMap<String, InboxSlot> {
        let kinds = self.doc.kinds();
        let mut index = HashMap::new();
        if let Some(section) = find_section(&kinds, &self.store.inbox_section) {
            for (idx, entry) in section_entries(&kinds, section) {
                index
                    .entry(self.store.key(&entry.text))
                    .or_insert(InboxSlot::Line {
                        idx,
                        done: entry.done,
                    });
            }
        }
        index
    }

    fn archived_keys(&self) -> HashSet<String> {
        let kinds = self.doc.kinds();
        match find_section(&kinds, &self.store.archive_section) {
            Some(section) => section_entries(&kinds, section)
                .map(|(_, entry)| self.store.key(&entry.text))
                .collect(),
            None => HashSet::new(),
        }
    }

    fn mark_done(&mut self, idx: usize) {
        if let Line::Entry(entry) = parse_line(&self.doc.lines[idx]) {
            self.doc.lines[idx] = format!("{}- [x] {}", entry.indent, entry.text);
        }
    }

    /// Render the line for a new entry and remember its metadata.
    fn track_append(&mut self, record: &TaskRecord, state: TaskState) -> String {
        self.meta
            .tasks
            .entry(record.normalized_text.clone())
            .or_insert_with(|| RecordMeta {
                first_seen: record.first_seen,
                source_ref: record.source_ref.clone(),
            });
        TaskRecord {
            state,
            ..record.clone()
        }
        .render_line()
    }

    fn commit(&self) -> Result<()> {
        atomic_write(&self.store.path, self.doc.render().as_bytes())?;
        let meta = toml::to_string(&self.meta).context("Failed to serialize task metadata")?;
        atomic_write(&self.store.meta_path(), meta.as_bytes())
    }
}

#[derive(Debug, Clone, Copy)]
enum InboxSlot {
    Line { idx: usize, done: bool },
    /// Added by the current `apply`, not yet in the document.
    Appended,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreMeta {
    #[serde(default)]
    tasks: BTreeMap<String, RecordMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordMeta {
    first_seen: DateTime<Utc>,
    source_ref: String,
}

#[derive(Debug)]
struct StoreDocument {
    lines: Vec<String>,
    /// Fallback `first_seen` for records without metadata.
    modified: DateTime<Utc>,
}

impl StoreDocument {
    fn kinds(&self) -> Vec<Line> {
        let mut in_fence = false;
        self.lines
            .iter()
            .map(|line| {
                if line.trim_start().starts_with("```") {
                    in_fence = !in_fence;
                    return Line::Other;
                }
                if in_fence {
                    Line::Other
                } else {
                    parse_line(line)
                }
            })
            .collect()
    }

    /// Remove a line without leaving two blank lines next to each other.
    fn remove_line(&mut self, idx: usize) {
        self.lines.remove(idx);
        let blank = |line: Option<&String>| line.is_some_and(|l| l.trim().is_empty());
        if idx > 0 && blank(self.lines.get(idx - 1)) && blank(self.lines.get(idx)) {
            self.lines.remove(idx);
        }
    }

    /// Append lines at the end of a section, creating it at the end of the
    /// document when absent.
    fn append_to_section(&mut self, name: &str, entries: Vec<String>) {
        let kinds = self.kinds();
        match find_section(&kinds, name) {
            Some(section) => {
                let last_content = (section.heading + 1..section.end)
                    .rev()
                    .find(|idx| !self.lines[*idx].trim().is_empty());
                let mut block = Vec::new();
                let insert_at = match last_content {
                    Some(idx) => idx + 1,
                    None => {
                        block.push(String::new());
                        section.heading + 1
                    }
                };
                block.extend(entries);
                if insert_at < self.lines.len() && !self.lines[insert_at].trim().is_empty() {
                    block.push(String::new());
                }
                self.lines.splice(insert_at..insert_at, block);
            }
            None => {
                if self.lines.last().is_some_and(|l| !l.trim().is_empty()) {
                    self.lines.push(String::new());
                }
                self.lines.push(format!("## {name}"));
                self.lines.push(String::new());
                self.lines.extend(entries);
            }
        }
    }

    fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    indent: String,
    done: bool,
    text: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Heading { level: usize, title: String },
    Entry(Entry),
    Other,
}

fn parse_line(line: &str) -> Line {
    if let Some(caps) = HEADING_RE.captures(line) {
        return Line::Heading {
            level: caps[1].len(),
            title: caps[2].to_string(),
        };
    }
    if let Some(caps) = ENTRY_RE.captures(line) {
        return Line::Entry(Entry {
            indent: caps[1].to_string(),
            done: caps[2].eq_ignore_ascii_case("x"),
            text: caps[3].to_string(),
        });
    }
    Line::Other
}

#[derive(Debug, Clone, Copy)]
struct Section {
    heading: usize,
    /// Exclusive: next heading of the same or a higher level, or EOF.
    end: usize,
}

fn find_section(kinds: &[Line], name: &str) -> Option<Section> {
    let name = name.trim();
    let (heading, level) = kinds.iter().enumerate().find_map(|(idx, kind)| match kind {
        Line::Heading { level, title } if title.trim().eq_ignore_ascii_case(name) => {
            Some((idx, *level))
        }
        _ => None,
    })?;
    let end = kinds
        .iter()
        .enumerate()
        .skip(heading + 1)
        .find_map(|(idx, kind)| match kind {
            Line::Heading { level: l, .. } if *l <= level => Some(idx),
            _ => None,
        })
        .unwrap_or(kinds.len());
    Some(Section { heading, end })
}

fn section_entries(kinds: &[Line], section: Section) -> impl Iterator<Item = (usize, &Entry)> {
    kinds[section.heading + 1..section.end]
        .iter()
        .enumerate()
        .filter_map(move |(offset, kind)| match kind {
            Line::Entry(entry) => Some((section.heading + 1 + offset, entry)),
            _ => None,
        })
}

fn store_io(path: &Path, err: impl std::fmt::Display) -> anyhow::Error {
    AppError::StoreIo {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
    .into()
}

/// Write via temp file + rename so readers never see a partial file.
fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| store_io(parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| store_io(parent, e))?;
    std::io::Write::write_all(&mut tmp, data).map_err(|e| store_io(target, e))?;
    tmp.as_file().sync_all().map_err(|e| store_io(target, e))?;
    tmp.persist(target).map_err(|e| store_io(target, e.error))?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
