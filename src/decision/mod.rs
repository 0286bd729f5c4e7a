mod action;
mod model;

pub use action::{Action, ActionLevel, ActionType, PerformanceSnapshot};
pub use model::{
    Caps, Decision, DecisionMode, DecisionStatus, DecisionView, GatekeeperResult, InvariantViolation, PlanMeta,
    ReviewMode,
};
