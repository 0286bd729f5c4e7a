use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackerError;

/// Lifecycle status of an optimization run.
///
/// The external engine drives every transition; `Done`, `Error` and
/// `Canceled` are terminal and immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Canceled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// One asynchronous run, as stored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub owner: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub current_step: Option<String>,
    pub percent: Option<u8>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(owner: impl Into<String>, job_type: impl Into<String>, metadata: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            job_type: job_type.into(),
            status: JobStatus::Queued,
            current_step: None,
            percent: None,
            error_message: None,
            metadata,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an engine-reported update.
    ///
    /// Terminal jobs reject every update. A running job never goes back to
    /// `Queued`.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), TrackerError> {
        if self.is_terminal() {
            return Err(TrackerError::TerminalJob {
                job_id: self.id.clone(),
                status: self.status,
            });
        }
        if let Some(p) = update.percent
            && p > 100
        {
            return Err(TrackerError::InvalidPercent(p));
        }
        if let Some(next) = update.status
            && self.status == JobStatus::Running
            && next == JobStatus::Queued
        {
            return Err(TrackerError::IllegalJobTransition {
                job_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if let Some(status) = update.status {
            self.status = status;
            if status.is_terminal() {
                self.finished_at = Some(now);
            }
        }
        if update.current_step.is_some() {
            self.current_step = update.current_step;
        }
        if update.percent.is_some() {
            self.percent = update.percent;
        }
        if update.error_message.is_some() {
            self.error_message = update.error_message;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// A partial update of a [`Job`] row as written by the engine.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub current_step: Option<String>,
    pub percent: Option<u8>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    pub fn percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job() -> Job {
        Job::new("user-1", "optimize", serde_json::json!({"ad_account_id": "act_1"}))
    }

    #[test]
    fn job_creation_defaults() {
        let job = make_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.current_step.is_none());
        assert!(job.percent.is_none());
        assert!(job.finished_at.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn engine_update_sets_step_and_percent() {
        let mut job = make_job();
        job.apply(JobUpdate::status(JobStatus::Running).step("fetch").percent(40))
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.current_step.as_deref(), Some("fetch"));
        assert_eq!(job.percent, Some(40));

        // Fields absent from the update are kept.
        job.apply(JobUpdate::default().step("plan")).unwrap();
        assert_eq!(job.percent, Some(40));
        assert_eq!(job.current_step.as_deref(), Some("plan"));
    }

    #[test]
    fn terminal_state_is_immutable() {
        let mut job = make_job();
        job.apply(JobUpdate::status(JobStatus::Done).percent(100)).unwrap();
        assert!(job.finished_at.is_some());

        let err = job.apply(JobUpdate::status(JobStatus::Running)).unwrap_err();
        assert_eq!(
            err,
            TrackerError::TerminalJob {
                job_id: job.id.clone(),
                status: JobStatus::Done
            }
        );
        assert_eq!(job.status, JobStatus::Done);
    }

    #[test]
    fn percent_above_hundred_is_rejected() {
        let mut job = make_job();
        let err = job.apply(JobUpdate::default().percent(101)).unwrap_err();
        assert_eq!(err, TrackerError::InvalidPercent(101));
        assert!(job.percent.is_none());
    }

    #[test]
    fn running_job_cannot_requeue() {
        let mut job = make_job();
        job.apply(JobUpdate::status(JobStatus::Running)).unwrap();
        let err = job.apply(JobUpdate::status(JobStatus::Queued)).unwrap_err();
        assert!(matches!(err, TrackerError::IllegalJobTransition { .. }));
    }

    #[test]
    fn job_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&JobStatus::Canceled).unwrap(), "\"canceled\"");
        let job = make_job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "optimize");
        assert_eq!(json["status"], "queued");
    }
}
