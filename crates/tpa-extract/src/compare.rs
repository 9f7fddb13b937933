//! Explicit tasks in a document that the implicit detector would not have
//! surfaced on its own.
//!
//! Each one is a candidate "missed" judgment: the author had to write it
//! down by hand.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tpa_core::{AppError, DetectedState, TaskCandidate};
use tpa_feedback::FeedbackExample;
use tracing::debug;

use crate::detector::ImplicitDetector;
use crate::matcher::scan;
use crate::normalize::normalize;
use crate::source::LoadedSource;

#[derive(Debug, Clone, Serialize)]
pub struct DetectionGap {
    pub source_ref: String,
    /// Distinct open explicit tasks in the document.
    pub explicit: usize,
    /// Normalized texts the detector suggested.
    pub detected: Vec<String>,
    /// Open explicit tasks no suggestion covers, in document order.
    pub undetected: Vec<TaskCandidate>,
}

/// Run the detector over `loaded` and list the open explicit tasks it did
/// not cover. A suggestion covers a task when either normalized text
/// contains the other.
///
/// Unlike an extraction run, detector failure is an error here: without a
/// reply every explicit task would look missed.
pub async fn detection_gap(
    loaded: &LoadedSource,
    detector: &dyn ImplicitDetector,
    examples: &[FeedbackExample],
    timeout: Duration,
    case_insensitive: bool,
) -> Result<DetectionGap> {
    let suggestions = tokio::time::timeout(timeout, detector.detect(&loaded.text, examples))
        .await
        .map_err(|_| {
            AppError::Detector(format!(
                "timed out after {} ms on {}",
                timeout.as_millis(),
                loaded.source_ref
            ))
        })??;

    let detected: Vec<String> = suggestions
        .iter()
        .map(|s| normalize(&s.text, case_insensitive))
        .filter(|key| !key.is_empty())
        .collect();

    let mut seen = HashSet::new();
    let explicit: Vec<TaskCandidate> = scan(
        &loaded.text,
        loaded.kind,
        &loaded.source_ref,
        case_insensitive,
    )
    .filter(|c| c.detected_state == DetectedState::Open && !c.normalized_text.is_empty())
    .filter(|c| seen.insert(c.normalized_text.clone()))
    .collect();

    let total = explicit.len();
    let undetected: Vec<TaskCandidate> = explicit
        .into_iter()
        .filter(|c| !covered(&c.normalized_text, &detected))
        .collect();
    debug!(
        source = %loaded.source_ref,
        explicit = total,
        detected = detected.len(),
        undetected = undetected.len(),
        "detection gap computed"
    );

    Ok(DetectionGap {
        source_ref: loaded.source_ref.clone(),
        explicit: total,
        detected,
        undetected,
    })
}

fn covered(key: &str, detected: &[String]) -> bool {
    detected
        .iter()
        .any(|d| d.contains(key) || key.contains(d.as_str()))
}
