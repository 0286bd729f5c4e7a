pub mod client;
pub mod error;
pub mod memory;
pub mod retry;
pub mod types;

pub use client::OptimizerClient;
pub use error::ApiError;
pub use memory::InMemoryOptimizer;
pub use retry::{RetryConfig, retry_transport};
pub use types::{
    AccountSettings, CallbackEdits, DecisionCallback, EditedAction, ReviewAction, TriggerRunRequest,
    TriggerRunResponse,
};

use crate::decision::DecisionView;
use crate::jobs::ProgressSnapshot;

/// Calls this core makes to the optimizer backend.
///
/// The backend owns planning, execution and persistence; this trait is the
/// whole surface the review workflow and CLI depend on.
#[allow(async_fn_in_trait)]
pub trait OptimizerApi {
    /// Start an optimization run. Retrying may start a second job.
    async fn trigger_run(&self, req: &TriggerRunRequest) -> Result<TriggerRunResponse, ApiError>;

    /// Deliver a review outcome. Idempotent per `idempotency_key`.
    async fn send_decision_callback(&self, callback: &DecisionCallback) -> Result<(), ApiError>;

    /// Decision with its pre-joined action view.
    async fn fetch_decision(&self, decision_id: &str) -> Result<DecisionView, ApiError>;

    async fn fetch_progress(&self, job_id: &str) -> Result<ProgressSnapshot, ApiError>;

    async fn save_settings(&self, ad_account_id: &str, settings: &AccountSettings) -> Result<(), ApiError>;
}
