//! Step-by-step creation of a campaign, its ad sets and their ads.

mod orchestrator;
mod spec;

pub use orchestrator::{
    AdPlatform, CampaignOrchestrator, CampaignReport, CreatedAdSet, FUNCTION_STEP, MISSING_CREATIVE, ProgressLog,
    STEP_PACING, SoftFailure,
};
pub use spec::{AdSetSpec, CampaignSpec, CreativeSpec};
