mod job;
mod progress;
mod tracker;

pub use job::{Job, JobStatus, JobUpdate};
pub use progress::{ProgressEvent, ProgressTimeline, StepStatus, StepView};
pub use tracker::{
    DEFAULT_SETTLE_DELAY, JobFeed, JobSubscription, JobTracker, ProgressSnapshot, SubscriptionUpdate,
    WaitOutcome,
};
