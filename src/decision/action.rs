use std::fmt;

use serde::{Deserialize, Serialize};

/// Ad platform entity level an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLevel {
    Adset,
    Campaign,
    Ad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    BudgetChange,
    PauseEntity,
    CreativeRotate,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::BudgetChange => write!(f, "budget_change"),
            ActionType::PauseEntity => write!(f, "pause_entity"),
            ActionType::CreativeRotate => write!(f, "creative_rotate"),
        }
    }
}

/// Pre-period metrics flattened onto the action view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub spend: Option<f64>,
    pub impressions: Option<u64>,
    pub clicks: Option<u64>,
    pub conversions: Option<f64>,
    /// Label of the optimized outcome, e.g. "Lead" or "Purchase".
    pub outcome: Option<String>,
    pub actual_unit_cost: Option<f64>,
    pub target_unit_cost: Option<f64>,
}

/// One proposed change, as read from the pre-joined action view.
///
/// `action_key` is the identity for selection and edits. Rows can come back
/// in any order, so never address an action by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_key: String,
    pub decision_id: String,
    pub level: ActionLevel,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub objective: Option<String>,
    pub entity_id: String,
    pub entity_name: Option<String>,
    /// Recommended budget delta in percent. Only set for budget changes.
    pub delta_pct: Option<f64>,
    pub rationale: Option<String>,
    #[serde(default)]
    pub requires_human: bool,
    #[serde(default)]
    pub human_reasons: Vec<String>,
    #[serde(default)]
    pub pre_period: PerformanceSnapshot,
    /// Actual vs target unit cost, in percent, as materialized by the view.
    pub cost_diff_pct: Option<f64>,
}

impl Action {
    pub fn is_budget_change(&self) -> bool {
        self.action_type == ActionType::BudgetChange
    }

    /// The recommendation an edit starts from and resets to.
    pub fn recommended_delta(&self) -> Option<f64> {
        if self.is_budget_change() {
            Some(self.delta_pct.unwrap_or(0.0))
        } else {
            None
        }
    }

    /// Stored diff, or one derived from the pre-period unit costs.
    pub fn unit_cost_diff_pct(&self) -> Option<f64> {
        if self.cost_diff_pct.is_some() {
            return self.cost_diff_pct;
        }
        let actual = self.pre_period.actual_unit_cost?;
        let target = self.pre_period.target_unit_cost?;
        if target == 0.0 {
            return None;
        }
        Some((actual - target) / target * 100.0)
    }

    pub fn display_name(&self) -> &str {
        self.entity_name.as_deref().unwrap_or(&self.entity_id)
    }
}
