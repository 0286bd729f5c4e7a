use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::api::{AccountSettings, InMemoryOptimizer, OptimizerApi, OptimizerClient, TriggerRunRequest, TriggerRunResponse};
use crate::campaign::{AdPlatform, AdSetSpec, CampaignOrchestrator, CampaignSpec, CreativeSpec};
use crate::cli::{Cli, Command};
use crate::config::AdpilotConfig;
use crate::decision::{
    Action, ActionLevel, ActionType, Caps, Decision, DecisionMode, DecisionView, GatekeeperResult,
    PerformanceSnapshot, PlanMeta, ReviewMode,
};
use crate::jobs::{
    JobStatus, JobTracker, JobUpdate, ProgressEvent, ProgressTimeline, StepStatus, SubscriptionUpdate,
};
use crate::error::ValidationError;
use crate::review::{ReviewAudit, ReviewSession};
use crate::ui::{self, JobProgress};

/// Reviewer choices collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct ReviewOptions {
    pub deselect: Vec<String>,
    pub edits: Vec<(String, f64)>,
    pub deny: bool,
    pub comment: String,
    pub dry_run: bool,
}

fn client(config: &AdpilotConfig) -> Result<OptimizerClient> {
    Ok(OptimizerClient::new(config.api_base_url.clone(), config.api_key.clone())?)
}

pub async fn execute(cli: Cli, config: AdpilotConfig) -> Result<()> {
    match cli.command {
        Command::Demo => run_demo(&config).await,
        Command::Trigger { account, mode, cap } => {
            let caps = cap.map_or_else(|| config.default_caps(), |c| Caps {
                max_account_budget_change_pct: c,
            });
            let mode = mode.map_or(config.default_mode, DecisionMode::from);
            let job_id = trigger(&client(&config)?, &config.owner, &account, mode, caps).await?;
            println!("{job_id}");
            Ok(())
        }
        Command::Watch { job_id } => {
            let snapshot = client(&config)?.fetch_progress(&job_id).await?;
            let timeline = ProgressTimeline::from_events(&snapshot.events);
            ui::print_timeline(&timeline);
            println!("Job {} is {}", snapshot.job.id, snapshot.job.status);
            if let Some(err) = snapshot.job.error_message {
                println!("  {err}");
            }
            Ok(())
        }
        Command::Review {
            decision_id,
            deselect,
            edits,
            deny,
            comment,
            dry_run,
        } => {
            let options = ReviewOptions {
                deselect,
                edits,
                deny,
                comment,
                dry_run,
            };
            if let Some(audit) = review_decision(&client(&config)?, &config, &decision_id, &options).await? {
                ui::print_audit(&audit);
            }
            Ok(())
        }
        Command::Settings { account, mode, cap } => {
            if cap <= 0.0 || !cap.is_finite() {
                bail!("cap must be a positive percentage, got {cap}");
            }
            let settings = AccountSettings {
                optimizer_mode: mode.into(),
                caps: Caps {
                    max_account_budget_change_pct: cap,
                },
            };
            client(&config)?.save_settings(&account, &settings).await?;
            println!("Saved settings for {account}");
            Ok(())
        }
    }
}

/// Start a run. A rejected trigger is an error; retrying may start a second job.
pub async fn trigger(
    api: &impl OptimizerApi,
    owner: &str,
    ad_account_id: &str,
    mode: DecisionMode,
    caps: Caps,
) -> Result<String> {
    let request = TriggerRunRequest {
        owner: owner.to_string(),
        ad_account_id: ad_account_id.to_string(),
        mode,
        caps,
    };
    match api.trigger_run(&request).await? {
        TriggerRunResponse::Started { job_id } => {
            info!(job_id = %job_id, ad_account_id = %ad_account_id, "run started");
            Ok(job_id)
        }
        TriggerRunResponse::Rejected { error } => bail!("run rejected: {error}"),
    }
}

/// Fetch a decision, apply the reviewer's choices and submit.
///
/// Returns `None` when nothing was sent (read-only decision or dry run).
pub async fn review_decision(
    api: &impl OptimizerApi,
    config: &AdpilotConfig,
    decision_id: &str,
    options: &ReviewOptions,
) -> Result<Option<ReviewAudit>> {
    let view = api.fetch_decision(decision_id).await?;
    let mut session = ReviewSession::new(view, config.retry());

    if !session.is_actionable() {
        ui::print_review(&session);
        return Ok(None);
    }

    for key in &options.deselect {
        session.set_selected(key, false)?;
    }
    for (key, pct) in &options.edits {
        match session.set_edit(key, *pct) {
            // Kept in the session; `prepare` refuses to submit while it is out of range.
            Err(e @ ValidationError::EditExceedsCap { .. }) => {
                warn!(action_key = %key, error = %e, "edit outside cap");
            }
            other => other?,
        }
    }
    session.set_comment(options.comment.clone());
    ui::print_review(&session);

    if options.dry_run {
        return Ok(None);
    }
    let audit = if options.deny {
        session.deny(api).await?
    } else {
        session.approve(api).await?
    };
    Ok(Some(audit))
}

/// Ad platform stand-in for the demo: hands out sequential ids.
#[derive(Default)]
struct SimulatedPlatform {
    next_id: AtomicUsize,
}

impl SimulatedPlatform {
    fn id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl AdPlatform for SimulatedPlatform {
    async fn create_campaign(&self, _spec: &CampaignSpec) -> Result<String> {
        Ok(self.id("cmp"))
    }

    async fn create_ad_set(&self, _campaign_id: &str, _spec: &AdSetSpec) -> Result<String> {
        Ok(self.id("as"))
    }

    async fn create_ad(&self, _ad_set_id: &str, _creative_id: &str, _name: &str) -> Result<String> {
        Ok(self.id("ad"))
    }
}

fn demo_decision(job_id: &str, ad_account_id: &str, owner: &str, caps: Caps) -> DecisionView {
    let decision_id = format!("dec-{job_id}");
    let budget = Action {
        action_key: format!("{decision_id}:adset:X"),
        decision_id: decision_id.clone(),
        level: ActionLevel::Adset,
        action_type: ActionType::BudgetChange,
        objective: Some("leads".into()),
        entity_id: "X".into(),
        entity_name: Some("Prospecting - Broad".into()),
        delta_pct: Some(10.0),
        rationale: None,
        requires_human: false,
        human_reasons: Vec::new(),
        pre_period: PerformanceSnapshot {
            spend: Some(420.0),
            conversions: Some(56.0),
            outcome: Some("Lead".into()),
            actual_unit_cost: Some(7.5),
            target_unit_cost: Some(10.0),
            ..Default::default()
        },
        cost_diff_pct: None,
    };
    let pause = Action {
        action_key: format!("{decision_id}:adset:Y"),
        action_type: ActionType::PauseEntity,
        entity_id: "Y".into(),
        entity_name: Some("Retargeting - 7d".into()),
        delta_pct: None,
        rationale: Some("No conversions in the last 14 days".into()),
        pre_period: PerformanceSnapshot::default(),
        ..budget.clone()
    };
    let actions = vec![budget, pause];
    let gatekeeper = GatekeeperResult {
        passed: true,
        reasons: Vec::new(),
    };
    let status = Decision::initial_status(DecisionMode::Review, &gatekeeper, &actions);
    DecisionView {
        decision: Decision {
            id: decision_id,
            owner: owner.to_string(),
            ad_account_id: ad_account_id.to_string(),
            job_id: job_id.to_string(),
            mode: DecisionMode::Review,
            status,
            review_mode: ReviewMode::HumanRequired,
            plan_meta: PlanMeta {
                caps,
                targets: [("Lead".to_string(), 10.0)].into_iter().collect(),
            },
            gatekeeper,
            created_at: Utc::now(),
            executed_at: None,
        },
        actions,
    }
}

/// Plays the engine side of a run: step events, then a terminal job row.
async fn simulate_engine(tracker: JobTracker, job_id: String) -> Result<()> {
    let steps: [(&str, StepStatus, Option<u8>); 4] = [
        ("fetch", StepStatus::Loading, None),
        ("fetch", StepStatus::Success, Some(40)),
        ("plan", StepStatus::Loading, None),
        ("plan", StepStatus::Success, Some(100)),
    ];
    tracker.apply_update(&job_id, JobUpdate::status(JobStatus::Running))?;
    for (step, status, percent) in steps {
        sleep(Duration::from_millis(150)).await;
        let mut event = ProgressEvent::new(&job_id, step, status);
        let mut update = JobUpdate::default().step(step);
        if let Some(p) = percent {
            event = event.with_percent(p);
            update = update.percent(p);
        }
        tracker.append_progress_event(event)?;
        tracker.apply_update(&job_id, update)?;
    }
    tracker.apply_update(&job_id, JobUpdate::status(JobStatus::Done).percent(100))?;
    Ok(())
}

async fn run_demo(config: &AdpilotConfig) -> Result<()> {
    let tracker = JobTracker::new(config.settle_delay());
    let backend = InMemoryOptimizer::new(tracker.clone());
    let account = "act_demo";

    let job_id = trigger(&backend, &config.owner, account, DecisionMode::Review, config.default_caps()).await?;
    let mut sub = tracker.subscribe(&job_id)?;
    let engine = tokio::spawn(simulate_engine(tracker.clone(), job_id.clone()));

    let progress = JobProgress::start(sub.job());
    while !sub.job().is_terminal() {
        match sub.next().await {
            Some(SubscriptionUpdate::Job(job)) => progress.job_updated(&job),
            Some(SubscriptionUpdate::Event(event)) => progress.event(&event),
            Some(SubscriptionUpdate::Resynced { .. }) => {}
            None => break,
        }
    }
    sub.unsubscribe();
    engine.await??;
    let job = tracker.settled(&job_id).await?;
    progress.finish(&job);

    backend.insert_decision(demo_decision(&job_id, account, &config.owner, config.default_caps()));
    let decision_id = format!("dec-{job_id}");
    let options = ReviewOptions {
        deselect: vec![format!("{decision_id}:adset:Y")],
        comment: "Scale the winner, keep retargeting for now".into(),
        ..Default::default()
    };
    if let Some(audit) = review_decision(&backend, config, &decision_id, &options).await? {
        ui::print_audit(&audit);
    }

    let campaign_job = tracker.create(&config.owner, "create_campaign", serde_json::Value::Null);
    let spec = CampaignSpec {
        ad_account_id: account.to_string(),
        name: "Spring leads".into(),
        objective: "OUTCOME_LEADS".into(),
        daily_budget: Some(100.0),
        ad_sets: vec![
            AdSetSpec {
                name: "Broad".into(),
                daily_budget: None,
                targeting: serde_json::json!({"geo": ["US"]}),
                creatives: vec![CreativeSpec {
                    creative_id: Some("cr_1".into()),
                    ad_name: None,
                }],
            },
            AdSetSpec {
                name: "Lookalike".into(),
                daily_budget: None,
                targeting: serde_json::json!({"lookalike": "1%"}),
                creatives: Vec::new(),
            },
        ],
    };
    let orchestrator = CampaignOrchestrator::with_pacing(tracker.clone(), SimulatedPlatform::default(), config.step_pacing());
    let report = orchestrator.run(&campaign_job.id, &spec).await?;
    println!();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
