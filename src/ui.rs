//! Interface de terminal do adpilot: barras de progresso de jobs e resumos de revisão.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! cores. A formatação das linhas fica em funções puras, testáveis sem tty.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::guardrail::CapEngine;
use crate::jobs::{Job, JobStatus, ProgressEvent, ProgressTimeline, StepStatus, StepView};
use crate::review::{ReviewAudit, ReviewSession};

pub fn step_marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Loading => "…",
        StepStatus::Success => "✓",
        StepStatus::Error => "✗",
    }
}

pub fn step_line(view: &StepView) -> String {
    let mut line = format!("{} {}", step_marker(view.status), view.step);
    if let Some(p) = view.percent {
        line.push_str(&format!(" ({p}%)"));
    }
    if let Some(message) = &view.message {
        line.push_str(&format!(": {message}"));
    }
    line
}

/// Uma linha por ação, mais a faixa permitida e o delta líquido.
pub fn review_lines(session: &ReviewSession) -> Vec<String> {
    let cap = session.cap();
    let range = CapEngine::allowed_range(cap);
    let mut lines = vec![format!(
        "Decision {} [{}] cap ±{cap}% (allowed {:+}..{:+})",
        session.view().decision.id,
        session.status(),
        range.start(),
        range.end()
    )];
    for action in session.view().actions_by_key() {
        let mark = if session.is_selected(&action.action_key) { "[x]" } else { "[ ]" };
        let delta = match session.edit_value(&action.action_key) {
            Some(d) => format!(" {d:+}%"),
            None => String::new(),
        };
        lines.push(format!(
            "{mark} {} {} {}{delta} - {}",
            action.action_key,
            action.action_type,
            action.display_name(),
            CapEngine::explain(action)
        ));
    }
    lines.push(format!("Net selected budget change: {:+}%", session.net_selected_delta()));
    lines
}

/// Indicador visual de progresso de um job no terminal.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    pub fn start(job: &Job) -> Self {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(format!("{} {}", job.job_type, job.status));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn job_updated(&self, job: &Job) {
        if let Some(p) = job.percent {
            self.pb.set_position(u64::from(p));
        }
        let step = job.current_step.as_deref().unwrap_or("-");
        self.pb.set_message(format!("{} · {step}", job.status));
    }

    pub fn event(&self, event: &ProgressEvent) {
        let marker = step_marker(event.status);
        let styled = match event.status {
            StepStatus::Loading => self.yellow.apply_to(marker),
            StepStatus::Success => self.green.apply_to(marker),
            StepStatus::Error => self.red.apply_to(marker),
        };
        let detail = event.message.as_deref().map(|m| format!(": {m}")).unwrap_or_default();
        self.pb.println(format!("  {styled} {}{detail}", event.step));
        if let Some(p) = event.percent {
            self.pb.set_position(u64::from(p));
        }
    }

    /// Encerra a barra e imprime o status final do job.
    pub fn finish(&self, job: &Job) {
        self.pb.finish_and_clear();
        match job.status {
            JobStatus::Done => println!("  {} Job {} done", self.green.apply_to("✓"), job.id),
            JobStatus::Error => println!(
                "  {} Job {} failed: {}",
                self.red.apply_to("✗"),
                job.id,
                job.error_message.as_deref().unwrap_or("unknown error")
            ),
            status => println!("  {} Job {} is {status}", self.yellow.apply_to("•"), job.id),
        }
    }
}

pub fn print_timeline(timeline: &ProgressTimeline) {
    let green = Style::new().green();
    let red = Style::new().red();
    for view in timeline.steps() {
        let line = step_line(view);
        match view.status {
            StepStatus::Success => println!("  {}", green.apply_to(line)),
            StepStatus::Error => println!("  {}", red.apply_to(line)),
            StepStatus::Loading => println!("  {line}"),
        }
    }
}

pub fn print_review(session: &ReviewSession) {
    let dim = Style::new().dim();
    let red = Style::new().red();
    for line in review_lines(session) {
        println!("{line}");
    }
    for err in session.validation_errors() {
        println!("{}", red.apply_to(format!("  ✗ {err}")));
    }
    if !session.is_actionable() {
        println!("{}", dim.apply_to("  (read-only)"));
    }
}

pub fn print_audit(audit: &ReviewAudit) {
    let green = Style::new().green().bold();
    println!();
    println!("{}", green.apply_to("─── Review submitted ───"));
    println!("{}", serde_json::to_string_pretty(audit).unwrap_or_default());
}
