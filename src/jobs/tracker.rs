use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::job::{Job, JobUpdate};
use super::progress::{ProgressEvent, ProgressTimeline};
use crate::error::TrackerError;

const FEED_CAPACITY: usize = 256;

/// Default pause between a job turning terminal and dependents refreshing,
/// so trailing events can land first.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(600);

/// Everything pushed on a job's realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub enum JobFeed {
    Job(Job),
    Event(ProgressEvent),
}

/// Full read of one job: current row plus its ordered event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job: Job,
    pub events: Vec<ProgressEvent>,
}

/// Result of a bounded wait on a job.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Finished(Job),
    TimedOut(Job),
}

struct JobEntry {
    job: Job,
    events: Vec<ProgressEvent>,
    feed: broadcast::Sender<JobFeed>,
}

/// In-process job store with a push feed per job id.
///
/// Stands in for the engine's persistent store and realtime change feed.
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<String, JobEntry>>>,
    settle_delay: Duration,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY)
    }
}

impl JobTracker {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            settle_delay,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Register a new queued job.
    pub fn create(
        &self,
        owner: impl Into<String>,
        job_type: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Job {
        let job = Job::new(owner, job_type, metadata);
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let entry = JobEntry {
            job: job.clone(),
            events: Vec::new(),
            feed,
        };
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id.clone(), entry);
        info!(job_id = %job.id, job_type = %job.job_type, "job queued");
        job
    }

    /// Apply an engine-reported status/step/percent update to the job row.
    pub fn apply_update(&self, job_id: &str, update: JobUpdate) -> Result<Job, TrackerError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| TrackerError::JobNotFound(job_id.to_string()))?;
        entry.job.apply(update)?;
        let job = entry.job.clone();
        if job.is_terminal() {
            info!(job_id = %job.id, status = %job.status, "job finished");
        } else {
            debug!(job_id = %job.id, status = %job.status, step = ?job.current_step, "job updated");
        }
        // No receivers is fine: nobody is watching yet.
        let _ = entry.feed.send(JobFeed::Job(job.clone()));
        Ok(job)
    }

    /// Append a telemetry event to the job's log.
    ///
    /// Trailing events after a terminal status are accepted; the job row is
    /// not touched either way.
    pub fn append_progress_event(&self, event: ProgressEvent) -> Result<ProgressEvent, TrackerError> {
        if let Some(p) = event.percent
            && p > 100
        {
            return Err(TrackerError::InvalidPercent(p));
        }
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get_mut(&event.job_id)
            .ok_or_else(|| TrackerError::JobNotFound(event.job_id.clone()))?;
        if entry.job.is_terminal() {
            debug!(job_id = %event.job_id, step = %event.step, "trailing event after terminal status");
        }
        entry.events.push(event.clone());
        let _ = entry.feed.send(JobFeed::Event(event.clone()));
        Ok(event)
    }

    /// Current job row and its event log ordered by `created_at`.
    pub fn get_progress(&self, job_id: &str) -> Result<ProgressSnapshot, TrackerError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| TrackerError::JobNotFound(job_id.to_string()))?;
        let mut events = entry.events.clone();
        events.sort_by_key(|e| e.created_at);
        Ok(ProgressSnapshot {
            job: entry.job.clone(),
            events,
        })
    }

    /// Open a live subscription, already seeded from a full read.
    pub fn subscribe(&self, job_id: &str) -> Result<JobSubscription, TrackerError> {
        // Subscribe before reading so nothing falls between the seed and the tail.
        let rx = {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| TrackerError::JobNotFound(job_id.to_string()))?;
            entry.feed.subscribe()
        };
        let snapshot = self.get_progress(job_id)?;
        debug!(job_id = %job_id, events = snapshot.events.len(), "subscription opened");
        Ok(JobSubscription {
            tracker: self.clone(),
            job_id: job_id.to_string(),
            job: snapshot.job,
            timeline: ProgressTimeline::from_events(&snapshot.events),
            rx,
        })
    }

    /// Drop the ephemeral step log of a job. Returns how many events were removed.
    pub fn purge_step_logs(&self, job_id: &str) -> Result<usize, TrackerError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| TrackerError::JobNotFound(job_id.to_string()))?;
        let removed = entry.events.len();
        entry.events.clear();
        debug!(job_id = %job_id, removed, "step logs purged");
        Ok(removed)
    }

    /// Wait for a terminal status, giving up after `timeout`.
    ///
    /// A timeout is reported, never written back to the job.
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Result<WaitOutcome, TrackerError> {
        let mut sub = self.subscribe(job_id)?;
        let finished = tokio::time::timeout(timeout, async {
            while !sub.job().is_terminal() {
                if sub.next().await.is_none() {
                    break;
                }
            }
        })
        .await;

        match finished {
            Ok(()) if sub.job().is_terminal() => Ok(WaitOutcome::Finished(sub.job().clone())),
            _ => {
                warn!(job_id = %job_id, ?timeout, status = %sub.job().status, "gave up waiting for job");
                Ok(WaitOutcome::TimedOut(sub.job().clone()))
            }
        }
    }

    /// Resolve once the job is terminal and the settle delay has passed.
    ///
    /// Dependents refresh derived summaries after this, so trailing events
    /// have a chance to render first. There is no timeout here; use
    /// [`wait_for_terminal`](Self::wait_for_terminal) for a bounded wait.
    pub async fn settled(&self, job_id: &str) -> Result<Job, TrackerError> {
        let mut sub = self.subscribe(job_id)?;
        while !sub.job().is_terminal() {
            if sub.next().await.is_none() {
                break;
            }
        }
        tokio::time::sleep(self.settle_delay).await;
        let job = self.get_progress(job_id)?.job;
        debug!(job_id = %job_id, status = %job.status, "job settled");
        Ok(job)
    }
}

/// What a subscription surfaced on one `next()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionUpdate {
    Job(Job),
    Event(ProgressEvent),
    /// The live tail lagged; state was re-seeded from a full read.
    Resynced { applied: usize },
}

/// Scoped live view of one job.
///
/// Holds the latest job row and the folded timeline. Dropping it releases
/// the channel.
pub struct JobSubscription {
    tracker: JobTracker,
    job_id: String,
    job: Job,
    timeline: ProgressTimeline,
    rx: broadcast::Receiver<JobFeed>,
}

impl JobSubscription {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn timeline(&self) -> &ProgressTimeline {
        &self.timeline
    }

    /// Next visible change. Returns `None` once the feed is closed.
    ///
    /// Duplicate events are swallowed. A terminal job never goes back to a
    /// non-terminal row, even if a stale update arrives late.
    pub async fn next(&mut self) -> Option<SubscriptionUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(JobFeed::Job(job)) => {
                    if self.job.is_terminal() && !job.is_terminal() {
                        continue;
                    }
                    if job.updated_at < self.job.updated_at {
                        continue;
                    }
                    self.job = job.clone();
                    return Some(SubscriptionUpdate::Job(job));
                }
                Ok(JobFeed::Event(event)) => {
                    if self.timeline.apply(&event) {
                        return Some(SubscriptionUpdate::Event(event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(job_id = %self.job_id, missed, "progress feed lagged, re-fetching log");
                    let snapshot = self.tracker.get_progress(&self.job_id).ok()?;
                    if !self.job.is_terminal() || snapshot.job.is_terminal() {
                        self.job = snapshot.job;
                    }
                    let applied = self.timeline.replay(&snapshot.events);
                    return Some(SubscriptionUpdate::Resynced { applied });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Explicit release; equivalent to dropping.
    pub fn unsubscribe(self) {
        debug!(job_id = %self.job_id, "subscription released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, StepStatus};

    fn tracker() -> JobTracker {
        JobTracker::new(Duration::from_millis(5))
    }

    fn scenario_a_events(tracker: &JobTracker, job_id: &str) {
        tracker
            .append_progress_event(ProgressEvent::new(job_id, "fetch", StepStatus::Loading))
            .unwrap();
        tracker
            .append_progress_event(ProgressEvent::new(job_id, "fetch", StepStatus::Success).with_percent(40))
            .unwrap();
        tracker
            .append_progress_event(ProgressEvent::new(job_id, "plan", StepStatus::Loading))
            .unwrap();
        tracker
            .append_progress_event(ProgressEvent::new(job_id, "plan", StepStatus::Success).with_percent(100))
            .unwrap();
    }

    #[test]
    fn create_starts_queued() {
        let tracker = tracker();
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        let snapshot = tracker.get_progress(&job.id).unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Queued);
        assert!(snapshot.events.is_empty());
    }

    #[test]
    fn events_do_not_drive_job_state() {
        let tracker = tracker();
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        scenario_a_events(&tracker, &job.id);

        let snapshot = tracker.get_progress(&job.id).unwrap();
        assert_eq!(snapshot.events.len(), 4);
        assert_eq!(snapshot.job.status, JobStatus::Queued);
        assert!(snapshot.job.percent.is_none());
    }

    #[test]
    fn unknown_job_is_reported() {
        let tracker = tracker();
        let err = tracker.get_progress("missing").unwrap_err();
        assert_eq!(err, TrackerError::JobNotFound("missing".into()));
        assert!(tracker.subscribe("missing").is_err());
    }

    #[test]
    fn invalid_event_percent_is_rejected() {
        let tracker = tracker();
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        let err = tracker
            .append_progress_event(ProgressEvent::new(&job.id, "fetch", StepStatus::Success).with_percent(150))
            .unwrap_err();
        assert_eq!(err, TrackerError::InvalidPercent(150));
    }

    #[test]
    fn trailing_events_after_terminal_are_kept() {
        let tracker = tracker();
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        tracker.apply_update(&job.id, JobUpdate::status(JobStatus::Done)).unwrap();
        tracker
            .append_progress_event(ProgressEvent::new(&job.id, "summary", StepStatus::Success))
            .unwrap();
        assert_eq!(tracker.get_progress(&job.id).unwrap().events.len(), 1);
        assert!(tracker.apply_update(&job.id, JobUpdate::status(JobStatus::Running)).is_err());
    }

    #[tokio::test]
    async fn subscription_seeds_then_tails() {
        let tracker = tracker();
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        tracker
            .append_progress_event(ProgressEvent::new(&job.id, "fetch", StepStatus::Loading))
            .unwrap();

        let mut sub = tracker.subscribe(&job.id).unwrap();
        assert_eq!(sub.timeline().steps().len(), 1);

        tracker
            .apply_update(&job.id, JobUpdate::status(JobStatus::Running).step("fetch"))
            .unwrap();
        tracker
            .append_progress_event(ProgressEvent::new(&job.id, "fetch", StepStatus::Success).with_percent(40))
            .unwrap();

        assert!(matches!(sub.next().await, Some(SubscriptionUpdate::Job(_))));
        assert_eq!(sub.job().status, JobStatus::Running);
        assert!(matches!(sub.next().await, Some(SubscriptionUpdate::Event(_))));
        assert_eq!(sub.timeline().step("fetch").unwrap().status, StepStatus::Success);
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn lagged_subscription_resyncs_from_full_log() {
        let tracker = tracker();
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        let mut sub = tracker.subscribe(&job.id).unwrap();

        for i in 0..(FEED_CAPACITY + 10) {
            tracker
                .append_progress_event(ProgressEvent::new(&job.id, format!("step_{i}"), StepStatus::Success))
                .unwrap();
        }

        let update = sub.next().await.unwrap();
        assert!(matches!(update, SubscriptionUpdate::Resynced { .. }));
        assert_eq!(sub.timeline().steps().len(), FEED_CAPACITY + 10);

        let uninterrupted = ProgressTimeline::from_events(&tracker.get_progress(&job.id).unwrap().events);
        assert_eq!(sub.timeline().steps(), uninterrupted.steps());
    }

    #[tokio::test]
    async fn wait_for_terminal_times_out_without_writing() {
        let tracker = tracker();
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        tracker.apply_update(&job.id, JobUpdate::status(JobStatus::Running)).unwrap();

        let outcome = tracker
            .wait_for_terminal(&job.id, Duration::from_millis(20))
            .await
            .unwrap();
        match outcome {
            WaitOutcome::TimedOut(job) => assert_eq!(job.status, JobStatus::Running),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(tracker.get_progress(&job.id).unwrap().job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn wait_for_terminal_returns_finished_job() {
        let tracker = tracker();
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        let engine = tracker.clone();
        let id = job.id.clone();
        tokio::spawn(async move {
            engine.apply_update(&id, JobUpdate::status(JobStatus::Running)).unwrap();
            engine
                .apply_update(&id, JobUpdate::status(JobStatus::Error).error("account disconnected"))
                .unwrap();
        });

        let outcome = tracker.wait_for_terminal(&job.id, Duration::from_secs(5)).await.unwrap();
        match outcome {
            WaitOutcome::Finished(job) => {
                assert_eq!(job.status, JobStatus::Error);
                assert_eq!(job.error_message.as_deref(), Some("account disconnected"));
            }
            other => panic!("expected finished job, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn settled_waits_out_trailing_events() {
        let settle = Duration::from_millis(150);
        let tracker = JobTracker::new(settle);
        let job = tracker.create("user-1", "optimize", serde_json::Value::Null);
        scenario_a_events(&tracker, &job.id);
        tracker
            .apply_update(&job.id, JobUpdate::status(JobStatus::Done).percent(100))
            .unwrap();

        let started = tokio::time::Instant::now();
        let writer = tracker.clone();
        let job_id = job.id.clone();
        let trailing = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .append_progress_event(ProgressEvent::new(&job_id, "summary", StepStatus::Success))
                .unwrap();
        });

        let settled = tracker.settled(&job.id).await.unwrap();
        assert!(started.elapsed() >= settle);
        assert_eq!(settled.status, JobStatus::Done);
        assert_eq!(settled.percent, Some(100));

        let snapshot = tracker.get_progress(&job.id).unwrap();
        assert_eq!(snapshot.events.len(), 5);
        assert_eq!(snapshot.events.last().unwrap().step, "summary");
        trailing.await.unwrap();
    }

    #[test]
    fn purge_clears_log_but_keeps_job() {
        let tracker = tracker();
        let job = tracker.create("user-1", "create_campaign", serde_json::Value::Null);
        scenario_a_events(&tracker, &job.id);
        assert_eq!(tracker.purge_step_logs(&job.id).unwrap(), 4);
        let snapshot = tracker.get_progress(&job.id).unwrap();
        assert!(snapshot.events.is_empty());
        assert_eq!(snapshot.job.id, job.id);
    }
}
