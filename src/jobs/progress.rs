use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of one step entry in the progress log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Loading,
    Success,
    Error,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Loading => write!(f, "loading"),
            StepStatus::Success => write!(f, "success"),
            StepStatus::Error => write!(f, "error"),
        }
    }
}

/// An append-only telemetry record of a step transition.
///
/// Events are advisory: the job row is the source of job state, never a
/// fold over these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: String,
    pub job_id: String,
    pub step: String,
    pub status: StepStatus,
    pub percent: Option<u8>,
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: impl Into<String>, step: impl Into<String>, status: StepStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            step: step.into(),
            status,
            percent: None,
            message: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Latest known state of a single step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepView {
    pub step: String,
    pub status: StepStatus,
    pub percent: Option<u8>,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Visible step timeline folded from progress events.
///
/// Steps keep the order of their first appearance. Delivery is
/// at-least-once, so events are deduplicated by id, and an event older than
/// what a step already shows never overwrites it. Replaying the log from
/// the last-seen timestamp therefore lands on the same state as an
/// uninterrupted stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressTimeline {
    steps: Vec<StepView>,
    seen: HashSet<String>,
    last_seen: Option<DateTime<Utc>>,
}

impl ProgressTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: &[ProgressEvent]) -> Self {
        let mut timeline = Self::new();
        timeline.replay(events);
        timeline
    }

    /// Fold one event in. Returns `false` for duplicates.
    pub fn apply(&mut self, event: &ProgressEvent) -> bool {
        if !self.seen.insert(event.id.clone()) {
            return false;
        }
        self.last_seen = Some(match self.last_seen {
            Some(ts) if ts > event.created_at => ts,
            _ => event.created_at,
        });

        match self.steps.iter_mut().find(|s| s.step == event.step) {
            Some(view) => {
                if event.created_at >= view.updated_at {
                    view.status = event.status;
                    view.updated_at = event.created_at;
                    if event.percent.is_some() {
                        view.percent = event.percent;
                    }
                    if event.message.is_some() {
                        view.message = event.message.clone();
                    }
                }
                if event.created_at < view.started_at {
                    view.started_at = event.created_at;
                }
            }
            None => self.steps.push(StepView {
                step: event.step.clone(),
                status: event.status,
                percent: event.percent,
                message: event.message.clone(),
                started_at: event.created_at,
                updated_at: event.created_at,
            }),
        }
        true
    }

    /// Catch up from a full or partial log. Events older than the last-seen
    /// timestamp are skipped; equal timestamps go through the id dedup.
    pub fn replay(&mut self, events: &[ProgressEvent]) -> usize {
        let mut ordered: Vec<&ProgressEvent> = events
            .iter()
            .filter(|e| self.last_seen.is_none_or(|ts| e.created_at >= ts))
            .collect();
        ordered.sort_by_key(|e| e.created_at);
        ordered.into_iter().filter(|e| self.apply(e)).count()
    }

    pub fn steps(&self) -> &[StepView] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&StepView> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Highest percent reported by any step.
    pub fn latest_percent(&self) -> Option<u8> {
        self.steps.iter().filter_map(|s| s.percent).max()
    }

    pub fn has_errors(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Error)
    }
}
