//! Reconciliation of one candidate against the persisted records.
//!
//! Lookup is exact match on the normalized key; fuzzy matching of
//! near-duplicate phrasing is not attempted.

use std::collections::HashMap;

use tpa_core::{TaskCandidate, TaskRecord, TaskState};

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    New,
    AlreadyOpen,
    /// The open record that should now be marked completed.
    StateTransition(TaskRecord),
    DuplicateCompleted,
    /// Empty normalized text: never written.
    Unstorable,
}

/// Non-archived records keyed by normalized text.
///
/// When the store holds the same key twice (hand edits), the first one is
/// authoritative.
#[derive(Debug, Clone, Default)]
pub struct ActiveRecords {
    by_key: HashMap<String, TaskRecord>,
}

impl ActiveRecords {
    pub fn new<'a>(records: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut by_key = HashMap::new();
        for record in records {
            if record.state.is_active() {
                by_key
                    .entry(record.normalized_text.clone())
                    .or_insert_with(|| record.clone());
            }
        }
        Self { by_key }
    }

    pub fn get(&self, key: &str) -> Option<&TaskRecord> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

pub fn classify(candidate: &TaskCandidate, active: &ActiveRecords) -> Verdict {
    if candidate.normalized_text.is_empty() {
        return Verdict::Unstorable;
    }
    let Some(existing) = active.get(&candidate.normalized_text) else {
        return Verdict::New;
    };

    let observed = TaskState::from(candidate.detected_state);
    if observed == existing.state {
        return match observed {
            TaskState::Open => Verdict::AlreadyOpen,
            _ => Verdict::DuplicateCompleted,
        };
    }
    // Completed records never reopen.
    if !existing.state.can_transition_to(observed) {
        return Verdict::DuplicateCompleted;
    }
    let mut moved = existing.clone();
    moved.state = observed;
    Verdict::StateTransition(moved)
}
