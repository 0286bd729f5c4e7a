use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use super::error::ApiError;
use super::types::{AccountSettings, DecisionCallback, ReviewAction, TriggerRunRequest, TriggerRunResponse};
use super::OptimizerApi;
use crate::decision::{DecisionStatus, DecisionView};
use crate::jobs::{JobTracker, ProgressSnapshot};

#[derive(Default)]
struct Backend {
    decisions: HashMap<String, DecisionView>,
    settings: HashMap<String, AccountSettings>,
    /// Accepted callbacks by idempotency key.
    callbacks: HashMap<String, DecisionCallback>,
    /// Decision ids handed to execution, once per accepted callback.
    executions: Vec<String>,
    deliveries: usize,
    fail_next: usize,
}

/// In-process optimizer backend.
///
/// Runs backed by a [`JobTracker`], callbacks deduplicated by idempotency
/// key. Used by `adpilot demo` and as a test double.
pub struct InMemoryOptimizer {
    tracker: JobTracker,
    state: Mutex<Backend>,
}

impl InMemoryOptimizer {
    pub fn new(tracker: JobTracker) -> Self {
        Self {
            tracker,
            state: Mutex::new(Backend::default()),
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Publish a decision as the engine would after a run.
    pub fn insert_decision(&self, view: DecisionView) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.decisions.insert(view.decision.id.clone(), view);
    }

    /// Make the next `n` callback deliveries fail with a 503.
    pub fn fail_next_callbacks(&self, n: usize) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).fail_next = n;
    }

    pub fn executions(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .executions
            .clone()
    }

    /// Every callback request received, including duplicates and failures.
    pub fn deliveries(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).deliveries
    }

    pub fn accepted_callbacks(&self) -> Vec<DecisionCallback> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .values()
            .cloned()
            .collect()
    }

    pub fn settings(&self, ad_account_id: &str) -> Option<AccountSettings> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .settings
            .get(ad_account_id)
            .cloned()
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("{what} not found"),
    }
}

impl OptimizerApi for InMemoryOptimizer {
    async fn trigger_run(&self, req: &TriggerRunRequest) -> Result<TriggerRunResponse, ApiError> {
        if req.ad_account_id.trim().is_empty() {
            return Ok(TriggerRunResponse::Rejected {
                error: "ad account is required".into(),
            });
        }
        let job = self.tracker.create(
            &req.owner,
            "optimize",
            serde_json::json!({
                "ad_account_id": req.ad_account_id,
                "mode": req.mode,
                "caps": req.caps,
            }),
        );
        Ok(TriggerRunResponse::Started { job_id: job.id })
    }

    async fn send_decision_callback(&self, callback: &DecisionCallback) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.deliveries += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ApiError::Status {
                status: 503,
                message: "backend unavailable".into(),
            });
        }
        if state.callbacks.contains_key(&callback.idempotency_key) {
            debug!(idempotency_key = %callback.idempotency_key, "duplicate callback ignored");
            return Ok(());
        }

        let view = state
            .decisions
            .get_mut(&callback.decision_id)
            .ok_or_else(|| not_found("decision"))?;
        if !view.decision.is_actionable() {
            return Err(ApiError::Status {
                status: 409,
                message: format!("decision is {}", view.decision.status),
            });
        }
        let next = match callback.action {
            ReviewAction::Approve | ReviewAction::Edit => DecisionStatus::Approved,
            ReviewAction::Deny => DecisionStatus::Rejected,
        };
        view.decision.status = next;

        if next == DecisionStatus::Approved {
            state.executions.push(callback.decision_id.clone());
        }
        state
            .callbacks
            .insert(callback.idempotency_key.clone(), callback.clone());
        info!(decision_id = %callback.decision_id, action = %callback.action, "callback accepted");
        Ok(())
    }

    async fn fetch_decision(&self, decision_id: &str) -> Result<DecisionView, ApiError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .decisions
            .get(decision_id)
            .cloned()
            .ok_or_else(|| not_found("decision"))
    }

    async fn fetch_progress(&self, job_id: &str) -> Result<ProgressSnapshot, ApiError> {
        self.tracker.get_progress(job_id).map_err(|_| not_found("job"))
    }

    async fn save_settings(&self, ad_account_id: &str, settings: &AccountSettings) -> Result<(), ApiError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .settings
            .insert(ad_account_id.to_string(), settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::CallbackEdits;
    use crate::decision::fixtures::scenario_a;
    use crate::decision::{Caps, DecisionMode};
    use crate::jobs::JobStatus;

    fn deny(key: &str) -> DecisionCallback {
        DecisionCallback {
            decision_id: "dec-1".into(),
            owner: "user-1".into(),
            ad_account_id: "act_1".into(),
            action: ReviewAction::Deny,
            selection: vec![],
            edits: CallbackEdits::default(),
            comment: String::new(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn trigger_creates_queued_job() {
        let backend = InMemoryOptimizer::new(JobTracker::default());
        let response = backend
            .trigger_run(&TriggerRunRequest {
                owner: "user-1".into(),
                ad_account_id: "act_1".into(),
                mode: DecisionMode::Review,
                caps: Caps::default(),
            })
            .await
            .unwrap();
        let TriggerRunResponse::Started { job_id } = response else {
            panic!("expected job id");
        };
        let snapshot = backend.fetch_progress(&job_id).await.unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn trigger_without_account_is_rejected() {
        let backend = InMemoryOptimizer::new(JobTracker::default());
        let response = backend
            .trigger_run(&TriggerRunRequest {
                owner: "user-1".into(),
                ad_account_id: " ".into(),
                mode: DecisionMode::Review,
                caps: Caps::default(),
            })
            .await
            .unwrap();
        assert!(matches!(response, TriggerRunResponse::Rejected { .. }));
    }

    #[tokio::test]
    async fn duplicate_key_is_applied_once() {
        let backend = InMemoryOptimizer::new(JobTracker::default());
        backend.insert_decision(scenario_a());

        backend.send_decision_callback(&deny("k1")).await.unwrap();
        backend.send_decision_callback(&deny("k1")).await.unwrap();
        assert_eq!(backend.deliveries(), 2);
        assert_eq!(backend.accepted_callbacks().len(), 1);

        let view = backend.fetch_decision("dec-1").await.unwrap();
        assert_eq!(view.decision.status, DecisionStatus::Rejected);

        // A different key for a resolved decision is refused.
        let err = backend.send_decision_callback(&deny("k2")).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 409, .. }));
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let backend = InMemoryOptimizer::new(JobTracker::default());
        backend.insert_decision(scenario_a());
        backend.fail_next_callbacks(1);

        let err = backend.send_decision_callback(&deny("k1")).await.unwrap_err();
        assert!(err.is_retryable());
        backend.send_decision_callback(&deny("k1")).await.unwrap();
        assert!(backend.accepted_callbacks().len() == 1);
    }
}
