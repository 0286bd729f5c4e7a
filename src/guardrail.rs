//! Cap engine bounding reviewer edits to budget changes.
//!
//! Every edit is capped on its own. The net selected delta is reported for
//! information only and never bounds anything.

use std::ops::RangeInclusive;

use crate::decision::Action;
use crate::error::ValidationError;
use crate::review::{Edits, Selection};

const GENERIC_RATIONALE: &str = "Change stays within the account's budget guardrails.";

pub struct CapEngine;

impl CapEngine {
    /// Inclusive range an edit may take for the given cap.
    pub fn allowed_range(cap: f64) -> RangeInclusive<f64> {
        let cap = cap.abs();
        -cap..=cap
    }

    /// Reject an edit iff `|proposed| > cap`. A value exactly at the cap passes.
    pub fn validate_edit(action: &Action, proposed: f64, cap: f64) -> Result<(), ValidationError> {
        if !action.is_budget_change() {
            return Err(ValidationError::EditNotAllowed {
                action_key: action.action_key.clone(),
            });
        }
        if !proposed.is_finite() || proposed.abs() > cap.abs() {
            return Err(ValidationError::EditExceedsCap {
                action_key: action.action_key.clone(),
                proposed,
                cap: cap.abs(),
            });
        }
        Ok(())
    }

    /// Sum of effective deltas over selected budget changes.
    ///
    /// The effective delta is the edit when present, else the recommendation.
    pub fn net_selected_delta(actions: &[Action], selection: &Selection, edits: &Edits) -> f64 {
        actions
            .iter()
            .filter(|a| a.is_budget_change() && selection.is_selected(&a.action_key))
            .map(|a| {
                edits
                    .get(&a.action_key)
                    .or_else(|| a.recommended_delta())
                    .unwrap_or(0.0)
            })
            .sum()
    }

    /// Human-readable reason for an action.
    pub fn explain(action: &Action) -> String {
        let snapshot = &action.pre_period;
        if let (Some(actual), Some(target), Some(diff)) = (
            snapshot.actual_unit_cost,
            snapshot.target_unit_cost,
            action.unit_cost_diff_pct(),
        ) {
            let outcome = snapshot
                .outcome
                .as_deref()
                .or(action.objective.as_deref())
                .unwrap_or("Result");
            let sign = if diff >= 0.0 { "+" } else { "-" };
            return format!(
                "{outcome} cost is ${actual:.2} vs target ${target:.2} ({sign}{:.1}%)",
                diff.abs()
            );
        }

        match action.rationale.as_deref() {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => GENERIC_RATIONALE.to_string(),
        }
    }
}
