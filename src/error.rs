use thiserror::Error;

use crate::api::ApiError;
use crate::decision::DecisionStatus;
use crate::jobs::JobStatus;

/// Client-local rejections. These never reach the network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("edit for {action_key} is {proposed}% but the cap is ±{cap}%")]
    EditExceedsCap {
        action_key: String,
        proposed: f64,
        cap: f64,
    },

    #[error("select at least one action before approving")]
    EmptySelection,

    #[error("no selected action differs from its recommendation")]
    NoEditsMade,

    #[error("action {action_key} is not a budget change and cannot be edited")]
    EditNotAllowed { action_key: String },

    #[error("unknown action key: {action_key}")]
    UnknownAction { action_key: String },

    #[error("decision is {status} and cannot be reviewed")]
    NotActionable { status: DecisionStatus },

    #[error("invalid campaign spec: {0}")]
    InvalidSpec(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("job {job_id} is already {status}")]
    TerminalJob { job_id: String, status: JobStatus },

    #[error("job {job_id} cannot move from {from} to {to}")]
    IllegalJobTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("percent must lie in [0, 100], got {0}")]
    InvalidPercent(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("decision cannot move from {from} to {to}")]
pub struct DecisionTransitionError {
    pub from: DecisionStatus,
    pub to: DecisionStatus,
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The callback could not be delivered. Local review state is untouched.
    #[error("decision callback failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Transition(#[from] DecisionTransitionError),
}

impl ReviewError {
    /// Only transient transport failures are worth resubmitting; validation failures need an edit first.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReviewError::Transport { source, .. } => source.is_retryable(),
            ReviewError::Validation(_) | ReviewError::Transition(_) => false,
        }
    }
}
