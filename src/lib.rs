//! Review and approval of AI-proposed ad account changes.
//!
//! Tracks optimization runs as progress event streams, models decisions and
//! their actions, bounds budget edits with a cap engine, and drives the
//! human review to a single idempotent callback. A campaign creation
//! pipeline reuses the same progress log.

pub mod api;
pub mod campaign;
pub mod cli;
pub mod commands;
pub mod config;
pub mod decision;
pub mod error;
pub mod guardrail;
pub mod jobs;
pub mod review;
pub mod ui;

pub use error::{DecisionTransitionError, ReviewError, TrackerError, ValidationError};
