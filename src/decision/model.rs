use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::Action;
use crate::error::DecisionTransitionError;

/// Autonomy level of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    Shadow,
    Review,
    Auto,
    Canary,
}

impl fmt::Display for DecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionMode::Shadow => write!(f, "shadow"),
            DecisionMode::Review => write!(f, "review"),
            DecisionMode::Auto => write!(f, "auto"),
            DecisionMode::Canary => write!(f, "canary"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Planned,
    NeedsReview,
    Approved,
    Executed,
    Rejected,
    Failed,
}

impl DecisionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DecisionStatus::Executed | DecisionStatus::Rejected | DecisionStatus::Failed
        )
    }

    /// Allowed edges of the decision lifecycle.
    ///
    /// `planned → needs_review | approved`, `needs_review → approved | rejected`,
    /// `approved → executed | failed`. Terminal states have no outgoing edges.
    pub fn can_transition_to(self, next: DecisionStatus) -> bool {
        use DecisionStatus::*;
        matches!(
            (self, next),
            (Planned, NeedsReview)
                | (Planned, Approved)
                | (NeedsReview, Approved)
                | (NeedsReview, Rejected)
                | (Approved, Executed)
                | (Approved, Failed)
        )
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionStatus::Planned => write!(f, "planned"),
            DecisionStatus::NeedsReview => write!(f, "needs_review"),
            DecisionStatus::Approved => write!(f, "approved"),
            DecisionStatus::Executed => write!(f, "executed"),
            DecisionStatus::Rejected => write!(f, "rejected"),
            DecisionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    HumanIfHighImpact,
    HumanRequired,
    Auto,
}

/// Guardrail caps attached to a plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Caps {
    /// Largest permitted |delta_pct| for a single budget change.
    pub max_account_budget_change_pct: f64,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_account_budget_change_pct: 25.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMeta {
    #[serde(default)]
    pub caps: Caps,
    /// Target unit costs keyed by outcome.
    #[serde(default)]
    pub targets: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatekeeperResult {
    pub passed: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// A reviewable bundle of actions produced by one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub owner: String,
    pub ad_account_id: String,
    pub job_id: String,
    pub mode: DecisionMode,
    pub status: DecisionStatus,
    pub review_mode: ReviewMode,
    #[serde(default)]
    pub plan_meta: PlanMeta,
    #[serde(default)]
    pub gatekeeper: GatekeeperResult,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

/// A broken decision invariant found by [`Decision::check_invariants`].
#[derive(Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    DuplicateActionKey(String),
    ForeignAction(String),
    UnexpectedReview,
    ExecutedWithoutApproval,
    MissingExecutedAt,
}

impl Decision {
    /// Only decisions waiting on a human can be reviewed; everything else is read-only.
    pub fn is_actionable(&self) -> bool {
        self.status == DecisionStatus::NeedsReview
    }

    pub fn cap(&self) -> f64 {
        self.plan_meta.caps.max_account_budget_change_pct
    }

    /// Status a freshly planned decision should start in.
    pub fn initial_status(mode: DecisionMode, gatekeeper: &GatekeeperResult, actions: &[Action]) -> DecisionStatus {
        let flagged = actions.iter().any(|a| a.requires_human);
        match mode {
            DecisionMode::Review => DecisionStatus::NeedsReview,
            _ if flagged => DecisionStatus::NeedsReview,
            DecisionMode::Shadow => DecisionStatus::Planned,
            DecisionMode::Auto | DecisionMode::Canary if gatekeeper.passed => DecisionStatus::Approved,
            // Gatekeeper blocked the plan without flagging anything a human could approve.
            DecisionMode::Auto | DecisionMode::Canary => DecisionStatus::Failed,
        }
    }

    /// Whether this decision could have reached `approved`, by review or by auto resolution.
    fn approvable(&self, flagged: bool) -> bool {
        match self.mode {
            DecisionMode::Review => true,
            _ if flagged => true,
            DecisionMode::Auto | DecisionMode::Canary => self.gatekeeper.passed,
            DecisionMode::Shadow => false,
        }
    }

    /// Move to an engine-reported status, enforcing the lifecycle table.
    pub fn apply_status(&mut self, next: DecisionStatus) -> Result<(), DecisionTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(DecisionTransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == DecisionStatus::Executed {
            self.executed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn check_invariants(&self, actions: &[Action]) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let mut keys = HashSet::new();
        for action in actions {
            if !keys.insert(action.action_key.as_str()) {
                violations.push(InvariantViolation::DuplicateActionKey(action.action_key.clone()));
            }
            if action.decision_id != self.id {
                violations.push(InvariantViolation::ForeignAction(action.action_key.clone()));
            }
        }

        let flagged = actions.iter().any(|a| a.requires_human);
        if self.status == DecisionStatus::NeedsReview && self.mode != DecisionMode::Review && !flagged {
            violations.push(InvariantViolation::UnexpectedReview);
        }

        if self.status == DecisionStatus::Executed {
            if !self.approvable(flagged) {
                violations.push(InvariantViolation::ExecutedWithoutApproval);
            }
            if self.executed_at.is_none() {
                violations.push(InvariantViolation::MissingExecutedAt);
            }
        }
        violations
    }
}

/// Decision plus its pre-joined action rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionView {
    pub decision: Decision,
    pub actions: Vec<Action>,
}

impl DecisionView {
    pub fn action(&self, key: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.action_key == key)
    }

    /// Rows sorted by key, for stable display regardless of fetch order.
    pub fn actions_by_key(&self) -> Vec<&Action> {
        let mut rows: Vec<&Action> = self.actions.iter().collect();
        rows.sort_by(|a, b| a.action_key.cmp(&b.action_key));
        rows
    }
}
