//! Human review of a decision: selection, capped edits and one atomic submission.
//!
//! A [`ReviewSession`] holds all selection and edit state locally until the
//! reviewer submits. Each logical submission gets a fresh idempotency key;
//! retries of that same submission reuse it. Nothing changes locally until
//! the backend accepts the callback.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{
    CallbackEdits, DecisionCallback, EditedAction, OptimizerApi, RetryConfig, ReviewAction, retry_transport,
};
use crate::decision::{Action, DecisionStatus, DecisionView};
use crate::error::{ReviewError, ValidationError};
use crate::guardrail::CapEngine;

/// Per-action inclusion flags. Keys absent from the map count as selected,
/// so reviewers opt out rather than in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection(BTreeMap<String, bool>);

impl Selection {
    pub fn is_selected(&self, key: &str) -> bool {
        self.0.get(key).copied().unwrap_or(true)
    }

    pub fn set(&mut self, key: impl Into<String>, selected: bool) {
        self.0.insert(key.into(), selected);
    }
}

/// Sparse edited deltas keyed by `action_key`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Edits(BTreeMap<String, f64>);

impl Edits {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, delta_pct: f64) {
        self.0.insert(key.into(), delta_pct);
    }
}

/// Summary of an accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewAudit {
    pub decision_id: String,
    pub action: ReviewAction,
    pub idempotency_key: String,
    pub selected: Vec<String>,
    pub edited: Vec<EditedAction>,
    pub net_delta_pct: f64,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
}

/// A submission that has been built but not yet accepted.
#[derive(Debug, Clone)]
struct PendingSubmission {
    callback: DecisionCallback,
    attempts: u32,
}

pub struct ReviewSession {
    view: DecisionView,
    selection: Selection,
    edits: Edits,
    comment: String,
    retry: RetryConfig,
    pending: Option<PendingSubmission>,
}

impl ReviewSession {
    /// Start a review. Every action is selected and every budget change's
    /// edit starts at its recommendation.
    pub fn new(view: DecisionView, retry: RetryConfig) -> Self {
        let mut edits = Edits::default();
        for action in &view.actions {
            if let Some(recommended) = action.recommended_delta() {
                edits.set(action.action_key.clone(), recommended);
            }
        }
        Self {
            view,
            selection: Selection::default(),
            edits,
            comment: String::new(),
            retry,
            pending: None,
        }
    }

    pub fn view(&self) -> &DecisionView {
        &self.view
    }

    pub fn status(&self) -> DecisionStatus {
        self.view.decision.status
    }

    pub fn is_actionable(&self) -> bool {
        self.view.decision.is_actionable()
    }

    pub fn cap(&self) -> f64 {
        self.view.decision.cap()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn edits(&self) -> &Edits {
        &self.edits
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    fn ensure_actionable(&self) -> Result<(), ValidationError> {
        if self.is_actionable() {
            Ok(())
        } else {
            Err(ValidationError::NotActionable { status: self.status() })
        }
    }

    fn action(&self, key: &str) -> Result<&Action, ValidationError> {
        self.view.action(key).ok_or_else(|| ValidationError::UnknownAction {
            action_key: key.to_string(),
        })
    }

    pub fn is_selected(&self, key: &str) -> bool {
        self.selection.is_selected(key)
    }

    pub fn set_selected(&mut self, key: &str, selected: bool) -> Result<(), ValidationError> {
        self.ensure_actionable()?;
        self.action(key)?;
        self.selection.set(key, selected);
        Ok(())
    }

    pub fn select_all(&mut self, selected: bool) -> Result<(), ValidationError> {
        self.ensure_actionable()?;
        for action in &self.view.actions {
            self.selection.set(action.action_key.clone(), selected);
        }
        Ok(())
    }

    pub fn selected_keys(&self) -> Vec<String> {
        self.view
            .actions_by_key()
            .into_iter()
            .filter(|a| self.selection.is_selected(&a.action_key))
            .map(|a| a.action_key.clone())
            .collect()
    }

    pub fn edit_value(&self, key: &str) -> Option<f64> {
        self.edits.get(key)
    }

    /// Set the draft delta for a budget change.
    ///
    /// The value is kept even when it breaks the cap, so the reviewer can see
    /// and correct it; the returned error is the cap check, and submission
    /// stays blocked until it passes.
    pub fn set_edit(&mut self, key: &str, delta_pct: f64) -> Result<(), ValidationError> {
        self.ensure_actionable()?;
        let cap = self.cap();
        let action = self.action(key)?;
        if !action.is_budget_change() {
            return Err(ValidationError::EditNotAllowed {
                action_key: key.to_string(),
            });
        }
        let check = CapEngine::validate_edit(action, delta_pct, cap);
        self.edits.set(key, delta_pct);
        check
    }

    /// Reset an edit to exactly the recommended delta.
    pub fn use_recommendation(&mut self, key: &str) -> Result<(), ValidationError> {
        self.ensure_actionable()?;
        let recommended = self
            .action(key)?
            .recommended_delta()
            .ok_or_else(|| ValidationError::EditNotAllowed {
                action_key: key.to_string(),
            })?;
        self.edits.set(key, recommended);
        Ok(())
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Informational sum of selected budget deltas.
    pub fn net_selected_delta(&self) -> f64 {
        CapEngine::net_selected_delta(&self.view.actions, &self.selection, &self.edits)
    }

    /// Cap violations among selected budget changes.
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        let cap = self.cap();
        self.view
            .actions_by_key()
            .into_iter()
            .filter(|a| a.is_budget_change() && self.selection.is_selected(&a.action_key))
            .filter_map(|a| {
                let value = self.edits.get(&a.action_key)?;
                CapEngine::validate_edit(a, value, cap).err()
            })
            .collect()
    }

    /// Whether any selected budget change departs from its recommendation.
    pub fn has_edits(&self) -> bool {
        self.edited_actions().iter().any(|edit| {
            self.view
                .action(&edit.key)
                .and_then(Action::recommended_delta)
                .is_some_and(|recommended| recommended != edit.delta_pct)
        })
    }

    fn edited_actions(&self) -> Vec<EditedAction> {
        self.view
            .actions_by_key()
            .into_iter()
            .filter(|a| a.is_budget_change() && self.selection.is_selected(&a.action_key))
            .filter_map(|a| {
                let delta_pct = self.edits.get(&a.action_key).or_else(|| a.recommended_delta())?;
                Some(EditedAction {
                    key: a.action_key.clone(),
                    delta_pct,
                })
            })
            .collect()
    }

    /// Audit code an approval would carry: `edit` if any delta was changed.
    pub fn approval_action(&self) -> ReviewAction {
        if self.has_edits() {
            ReviewAction::Edit
        } else {
            ReviewAction::Approve
        }
    }

    /// Build and validate the payload for `action` without sending it.
    ///
    /// If a matching submission is still pending from a failed attempt, its
    /// idempotency key is reused; otherwise a fresh key is minted.
    pub fn prepare(&self, action: ReviewAction) -> Result<DecisionCallback, ValidationError> {
        self.ensure_actionable()?;

        let (selection, edits) = match action {
            ReviewAction::Deny => (Vec::new(), Vec::new()),
            ReviewAction::Approve | ReviewAction::Edit => {
                let selection = self.selected_keys();
                if selection.is_empty() {
                    return Err(ValidationError::EmptySelection);
                }
                if let Some(err) = self.validation_errors().into_iter().next() {
                    return Err(err);
                }
                if action == ReviewAction::Edit && !self.has_edits() {
                    return Err(ValidationError::NoEditsMade);
                }
                (selection, self.edited_actions())
            }
        };

        let decision = &self.view.decision;
        let mut callback = DecisionCallback {
            decision_id: decision.id.clone(),
            owner: decision.owner.clone(),
            ad_account_id: decision.ad_account_id.clone(),
            action,
            selection,
            edits: CallbackEdits { actions: edits },
            comment: self.comment.clone(),
            idempotency_key: Uuid::new_v4().to_string(),
        };
        if let Some(pending) = &self.pending
            && pending.callback.same_content(&callback)
        {
            callback.idempotency_key = pending.callback.idempotency_key.clone();
        }
        Ok(callback)
    }

    /// Approve the selection, tagged `edit` when any delta was changed.
    pub async fn approve(&mut self, api: &impl OptimizerApi) -> Result<ReviewAudit, ReviewError> {
        let action = self.approval_action();
        self.submit(api, action).await
    }

    /// Deny the whole decision. Selection and edits are sent empty.
    pub async fn deny(&mut self, api: &impl OptimizerApi) -> Result<ReviewAudit, ReviewError> {
        self.submit(api, ReviewAction::Deny).await
    }

    /// Validate, send one callback (with transport retries), then transition.
    ///
    /// On failure the session is unchanged apart from remembering the pending
    /// payload, so calling again with the same content resends the same key.
    pub async fn submit(&mut self, api: &impl OptimizerApi, action: ReviewAction) -> Result<ReviewAudit, ReviewError> {
        let callback = self.prepare(action)?;
        let next = match action {
            ReviewAction::Approve | ReviewAction::Edit => DecisionStatus::Approved,
            ReviewAction::Deny => DecisionStatus::Rejected,
        };
        if !self.status().can_transition_to(next) {
            return Err(crate::error::DecisionTransitionError {
                from: self.status(),
                to: next,
            }
            .into());
        }

        let previous_attempts = match &self.pending {
            Some(p) if p.callback.idempotency_key == callback.idempotency_key => p.attempts,
            _ => 0,
        };
        let (result, attempts) = retry_transport(&self.retry, || api.send_decision_callback(&callback)).await;
        let attempts = previous_attempts + attempts;

        if let Err(source) = result {
            warn!(
                decision_id = %callback.decision_id,
                idempotency_key = %callback.idempotency_key,
                attempts,
                error = %source,
                "decision callback failed"
            );
            self.pending = Some(PendingSubmission {
                callback,
                attempts,
            });
            return Err(ReviewError::Transport { attempts, source });
        }

        let net_delta_pct = match action {
            ReviewAction::Deny => 0.0,
            _ => self.net_selected_delta(),
        };
        self.view.decision.status = next;
        self.pending = None;
        info!(
            decision_id = %callback.decision_id,
            action = %action,
            selected = callback.selection.len(),
            net_delta_pct,
            "review submitted"
        );

        Ok(ReviewAudit {
            decision_id: callback.decision_id,
            action,
            idempotency_key: callback.idempotency_key,
            selected: callback.selection,
            edited: callback.edits.actions,
            net_delta_pct,
            attempts,
            submitted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryOptimizer;
    use crate::decision::fixtures::{budget, decision, scenario_a};
    use crate::decision::{DecisionMode, DecisionStatus};
    use crate::jobs::JobTracker;

    fn session() -> ReviewSession {
        ReviewSession::new(scenario_a(), RetryConfig::none())
    }

    fn backend() -> InMemoryOptimizer {
        let backend = InMemoryOptimizer::new(JobTracker::default());
        backend.insert_decision(scenario_a());
        backend
    }

    #[test]
    fn defaults_select_all_and_seed_recommendations() {
        let s = session();
        assert!(s.is_selected("X"));
        assert!(s.is_selected("Y"));
        assert_eq!(s.edit_value("X"), Some(10.0));
        assert_eq!(s.edit_value("Y"), None);
        assert!(!s.has_edits());
    }

    #[test]
    fn use_recommendation_resets_exactly() {
        let mut s = session();
        s.set_edit("X", -12.5).unwrap();
        assert!(s.has_edits());
        s.use_recommendation("X").unwrap();
        assert_eq!(s.edit_value("X"), Some(10.0));
        assert!(!s.has_edits());
    }

    #[test]
    fn edits_only_apply_to_budget_changes() {
        let mut s = session();
        assert!(matches!(s.set_edit("Y", 5.0), Err(ValidationError::EditNotAllowed { .. })));
        assert!(matches!(s.use_recommendation("Y"), Err(ValidationError::EditNotAllowed { .. })));
        assert!(matches!(s.set_edit("Z", 5.0), Err(ValidationError::UnknownAction { .. })));
    }

    #[test]
    fn read_only_when_not_needs_review() {
        let view = DecisionView {
            decision: decision(DecisionMode::Review, DecisionStatus::Approved, 25.0),
            actions: vec![budget("X", "x", 10.0)],
        };
        let mut s = ReviewSession::new(view, RetryConfig::none());
        assert!(!s.is_actionable());
        assert!(matches!(
            s.set_selected("X", false),
            Err(ValidationError::NotActionable { .. })
        ));
        assert!(matches!(
            s.prepare(ReviewAction::Approve),
            Err(ValidationError::NotActionable { .. })
        ));
    }

    #[tokio::test]
    async fn scenario_a_approve_unchanged() {
        let api = backend();
        let mut s = session();
        s.set_selected("Y", false).unwrap();

        let callback = s.prepare(ReviewAction::Approve).unwrap();
        assert_eq!(callback.action, ReviewAction::Approve);
        assert_eq!(callback.selection, vec!["X".to_string()]);
        assert_eq!(
            callback.edits.actions,
            vec![EditedAction {
                key: "X".into(),
                delta_pct: 10.0
            }]
        );

        let audit = s.approve(&api).await.unwrap();
        assert_eq!(audit.action, ReviewAction::Approve);
        assert_eq!(audit.net_delta_pct, 10.0);
        assert_eq!(s.status(), DecisionStatus::Approved);
        assert!(!s.is_actionable());
        assert_eq!(api.executions(), vec!["dec-1".to_string()]);
    }

    #[tokio::test]
    async fn scenario_b_over_cap_edit_blocks_approval() {
        let api = backend();
        let mut s = session();
        let err = s.set_edit("X", 30.0).unwrap_err();
        assert!(matches!(err, ValidationError::EditExceedsCap { .. }));
        assert_eq!(s.edit_value("X"), Some(30.0));

        let result = s.approve(&api).await;
        assert!(matches!(
            result,
            Err(ReviewError::Validation(ValidationError::EditExceedsCap { .. }))
        ));
        assert_eq!(api.deliveries(), 0);
        assert_eq!(s.status(), DecisionStatus::NeedsReview);
    }

    #[tokio::test]
    async fn scenario_c_deny_all() {
        let api = backend();
        let mut s = session();
        s.set_comment("not this week");

        let callback = s.prepare(ReviewAction::Deny).unwrap();
        assert!(callback.selection.is_empty());
        assert!(callback.edits.actions.is_empty());

        let audit = s.deny(&api).await.unwrap();
        assert_eq!(audit.action, ReviewAction::Deny);
        assert_eq!(s.status(), DecisionStatus::Rejected);
        assert!(api.executions().is_empty());
        assert_eq!(api.accepted_callbacks()[0].comment, "not this week");
    }

    #[tokio::test]
    async fn deselected_over_cap_edit_does_not_block() {
        let api = backend();
        let mut s = session();
        let _ = s.set_edit("X", 40.0);
        s.set_selected("X", false).unwrap();
        let callback = s.prepare(ReviewAction::Approve).unwrap();
        assert_eq!(callback.selection, vec!["Y".to_string()]);
        assert!(callback.edits.actions.is_empty());
        s.approve(&api).await.unwrap();
    }

    #[tokio::test]
    async fn empty_selection_is_never_sent() {
        let api = backend();
        let mut s = session();
        s.select_all(false).unwrap();
        let result = s.approve(&api).await;
        assert!(matches!(
            result,
            Err(ReviewError::Validation(ValidationError::EmptySelection))
        ));
        assert_eq!(api.deliveries(), 0);
    }

    #[tokio::test]
    async fn changed_delta_is_tagged_edit() {
        let api = backend();
        let mut s = session();
        s.set_edit("X", 25.0).unwrap();
        assert_eq!(s.approval_action(), ReviewAction::Edit);

        let audit = s.approve(&api).await.unwrap();
        assert_eq!(audit.action, ReviewAction::Edit);
        assert_eq!(audit.edited[0].delta_pct, 25.0);
    }

    #[test]
    fn explicit_edit_requires_a_change() {
        let s = session();
        assert_eq!(s.prepare(ReviewAction::Edit).unwrap_err(), ValidationError::NoEditsMade);
    }

    #[tokio::test]
    async fn transport_failure_keeps_state_and_key() {
        let api = backend();
        api.fail_next_callbacks(1);
        let mut s = session();
        s.set_selected("Y", false).unwrap();

        let err = s.approve(&api).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(s.status(), DecisionStatus::NeedsReview);
        assert!(!s.is_selected("Y"));
        let failed_key = s.pending.as_ref().unwrap().callback.idempotency_key.clone();

        let audit = s.approve(&api).await.unwrap();
        assert_eq!(audit.idempotency_key, failed_key);
        assert_eq!(audit.attempts, 2);
        assert_eq!(api.executions().len(), 1);
    }

    #[tokio::test]
    async fn changed_content_after_failure_gets_new_key() {
        let api = backend();
        api.fail_next_callbacks(1);
        let mut s = session();

        s.approve(&api).await.unwrap_err();
        let failed_key = s.pending.as_ref().unwrap().callback.idempotency_key.clone();

        s.set_selected("Y", false).unwrap();
        let audit = s.approve(&api).await.unwrap();
        assert_ne!(audit.idempotency_key, failed_key);
        assert_eq!(audit.attempts, 1);
    }

    #[tokio::test]
    async fn automatic_retries_reuse_one_key() {
        let api = backend();
        api.fail_next_callbacks(2);
        let mut s = ReviewSession::new(
            scenario_a(),
            RetryConfig {
                max_retries: 3,
                base_delay_ms: 1,
            },
        );

        let audit = s.approve(&api).await.unwrap();
        assert_eq!(audit.attempts, 3);
        assert_eq!(api.deliveries(), 3);
        assert_eq!(api.accepted_callbacks().len(), 1);
        assert_eq!(api.executions().len(), 1);
    }

    #[test]
    fn fresh_submissions_get_fresh_keys() {
        let s = session();
        let a = s.prepare(ReviewAction::Approve).unwrap();
        let b = s.prepare(ReviewAction::Approve).unwrap();
        assert_ne!(a.idempotency_key, b.idempotency_key);
    }

    #[tokio::test]
    async fn resubmitting_a_delivered_key_does_not_execute_twice() {
        let api = backend();
        let s = session();
        let callback = s.prepare(ReviewAction::Approve).unwrap();
        api.send_decision_callback(&callback).await.unwrap();
        api.send_decision_callback(&callback).await.unwrap();
        assert_eq!(api.executions().len(), 1);
    }

    #[test]
    fn selection_follows_key_not_position() {
        let mut view = scenario_a();
        view.actions.reverse();
        let mut s = ReviewSession::new(view, RetryConfig::none());
        s.set_selected("Y", false).unwrap();
        assert_eq!(s.selected_keys(), vec!["X".to_string()]);
    }
}
