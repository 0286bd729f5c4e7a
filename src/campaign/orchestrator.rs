use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use super::spec::{AdSetSpec, CampaignSpec};
use crate::jobs::{JobTracker, ProgressEvent, StepStatus};

/// Pause before each external creation call.
pub const STEP_PACING: Duration = Duration::from_secs(2);

/// Step name of the closing marker written after the step logs are purged.
pub const FUNCTION_STEP: &str = "function";

pub const MISSING_CREATIVE: &str = "No creative ID available";

/// Sink for per-step progress entries.
#[allow(async_fn_in_trait)]
pub trait ProgressLog {
    async fn log(
        &self,
        job_id: &str,
        step: &str,
        status: StepStatus,
        message: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<()>;

    /// Remove the ephemeral step entries of a job.
    async fn purge(&self, job_id: &str) -> Result<usize>;
}

impl ProgressLog for JobTracker {
    async fn log(
        &self,
        job_id: &str,
        step: &str,
        status: StepStatus,
        message: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let mut event = ProgressEvent::new(job_id, step, status).with_metadata(metadata);
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.append_progress_event(event)?;
        Ok(())
    }

    async fn purge(&self, job_id: &str) -> Result<usize> {
        Ok(self.purge_step_logs(job_id)?)
    }
}

/// Ad platform creation calls. Each returns the created external id.
#[allow(async_fn_in_trait)]
pub trait AdPlatform {
    async fn create_campaign(&self, spec: &CampaignSpec) -> Result<String>;
    async fn create_ad_set(&self, campaign_id: &str, spec: &AdSetSpec) -> Result<String>;
    async fn create_ad(&self, ad_set_id: &str, creative_id: &str, name: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedAdSet {
    pub name: String,
    pub ad_set_id: String,
    pub ad_ids: Vec<String>,
}

/// A logged failure that did not abort the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftFailure {
    pub step: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignReport {
    pub campaign_id: String,
    pub ad_sets: Vec<CreatedAdSet>,
    pub soft_failures: Vec<SoftFailure>,
}

impl CampaignReport {
    pub fn ad_count(&self) -> usize {
        self.ad_sets.iter().map(|s| s.ad_ids.len()).sum()
    }
}

/// Creates a campaign hierarchy one step at a time, logging each step.
pub struct CampaignOrchestrator<L, P> {
    log: L,
    platform: P,
    pacing: Duration,
}

impl<L: ProgressLog, P: AdPlatform> CampaignOrchestrator<L, P> {
    pub fn new(log: L, platform: P) -> Self {
        Self::with_pacing(log, platform, STEP_PACING)
    }

    pub fn with_pacing(log: L, platform: P, pacing: Duration) -> Self {
        Self { log, platform, pacing }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Write a log entry. Failures are reported and dropped; they never
    /// reach the creation call.
    async fn log_best_effort(
        &self,
        job_id: &str,
        step: &str,
        status: StepStatus,
        message: Option<String>,
        metadata: serde_json::Value,
    ) {
        if let Err(e) = self.log.log(job_id, step, status, message, metadata).await {
            warn!(job_id = %job_id, step = %step, error = %e, "progress log write failed");
        }
    }

    /// Log `loading`, wait the pacing delay, run `action`, then log the outcome.
    ///
    /// Errors from `action` are logged as an `error` step and returned.
    pub async fn run_step<F, Fut>(&self, job_id: &str, step_id: &str, meta: serde_json::Value, action: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        self.log_best_effort(job_id, step_id, StepStatus::Loading, None, meta.clone())
            .await;
        sleep(self.pacing).await;

        match action().await {
            Ok(external_id) => {
                let mut done = meta;
                if let serde_json::Value::Object(map) = &mut done {
                    map.insert("external_id".into(), json!(external_id));
                } else {
                    done = json!({ "external_id": external_id });
                }
                self.log_best_effort(job_id, step_id, StepStatus::Success, None, done)
                    .await;
                Ok(external_id)
            }
            Err(e) => {
                self.log_best_effort(job_id, step_id, StepStatus::Error, Some(e.to_string()), meta)
                    .await;
                Err(e)
            }
        }
    }

    /// Create the campaign, then each ad set, then one ad per creative.
    ///
    /// Campaign and ad set failures abort the run. Ad-level failures,
    /// including a missing creative, are logged and collected as soft failures.
    pub async fn run(&self, job_id: &str, spec: &CampaignSpec) -> Result<CampaignReport> {
        spec.validate()?;
        info!(job_id = %job_id, campaign = %spec.name, ad_sets = spec.ad_sets.len(), "creating campaign");

        let campaign_id = self
            .run_step(job_id, "campaign", json!({ "name": spec.name }), || {
                self.platform.create_campaign(spec)
            })
            .await
            .context("campaign creation failed")?;

        let mut ad_sets = Vec::with_capacity(spec.ad_sets.len());
        let mut soft_failures = Vec::new();

        for (i, ad_set) in spec.ad_sets.iter().enumerate() {
            let n = i + 1;
            let ad_set_id = self
                .run_step(job_id, &format!("adset_{n}"), json!({ "name": ad_set.name }), || {
                    self.platform.create_ad_set(&campaign_id, ad_set)
                })
                .await
                .with_context(|| format!("ad set '{}' creation failed", ad_set.name))?;

            let mut ad_ids = Vec::new();
            if ad_set.creatives.is_empty() {
                let step = format!("ad_{n}_1");
                self.soft_fail(job_id, &step, &ad_set.name, &mut soft_failures).await;
            }
            for (j, creative) in ad_set.creatives.iter().enumerate() {
                let step = format!("ad_{n}_{}", j + 1);
                let Some(creative_id) = creative.creative_id.as_deref() else {
                    self.soft_fail(job_id, &step, &ad_set.name, &mut soft_failures).await;
                    continue;
                };
                let name = creative
                    .ad_name
                    .clone()
                    .unwrap_or_else(|| format!("{} - Ad {}", ad_set.name, j + 1));
                let meta = json!({ "ad_set": ad_set.name, "creative_id": creative_id });
                match self
                    .run_step(job_id, &step, meta, || {
                        self.platform.create_ad(&ad_set_id, creative_id, &name)
                    })
                    .await
                {
                    Ok(ad_id) => ad_ids.push(ad_id),
                    Err(e) => soft_failures.push(SoftFailure {
                        step,
                        message: e.to_string(),
                    }),
                }
            }

            ad_sets.push(CreatedAdSet {
                name: ad_set.name.clone(),
                ad_set_id,
                ad_ids,
            });
        }

        let report = CampaignReport {
            campaign_id,
            ad_sets,
            soft_failures,
        };

        if let Err(e) = self.log.purge(job_id).await {
            warn!(job_id = %job_id, error = %e, "step log purge failed");
        }
        self.log_best_effort(
            job_id,
            FUNCTION_STEP,
            StepStatus::Success,
            None,
            json!({
                "campaign_id": report.campaign_id,
                "ads": report.ad_count(),
                "soft_failures": report.soft_failures.len(),
            }),
        )
        .await;
        info!(
            job_id = %job_id,
            campaign_id = %report.campaign_id,
            ads = report.ad_count(),
            soft_failures = report.soft_failures.len(),
            "campaign created"
        );
        Ok(report)
    }

    async fn soft_fail(&self, job_id: &str, step: &str, ad_set: &str, failures: &mut Vec<SoftFailure>) {
        warn!(job_id = %job_id, step = %step, ad_set = %ad_set, "skipping ad without creative");
        self.log_best_effort(
            job_id,
            step,
            StepStatus::Error,
            Some(MISSING_CREATIVE.to_string()),
            json!({ "ad_set": ad_set }),
        )
        .await;
        failures.push(SoftFailure {
            step: step.to_string(),
            message: MISSING_CREATIVE.to_string(),
        });
    }
}
