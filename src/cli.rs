//! Interface de linha de comando do adpilot baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (trigger, watch, review,
//! settings, demo) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::decision::DecisionMode;

/// adpilot: revisão com guardrails de mudanças propostas por IA em contas de anúncio.
#[derive(Debug, Parser)]
#[command(name = "adpilot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita logs de depuração.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Nível de autonomia aceito pela CLI, mapeado para [`DecisionMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Shadow,
    Review,
    Auto,
    Canary,
}

impl From<ModeArg> for DecisionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Shadow => DecisionMode::Shadow,
            ModeArg::Review => DecisionMode::Review,
            ModeArg::Auto => DecisionMode::Auto,
            ModeArg::Canary => DecisionMode::Canary,
        }
    }
}

/// Interpreta `KEY=PCT` para `--edit`.
fn parse_edit(raw: &str) -> Result<(String, f64), String> {
    let (key, value) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected KEY=PCT, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("missing action key in '{raw}'"));
    }
    let pct = value
        .trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .map_err(|e| format!("invalid percent in '{raw}': {e}"))?;
    Ok((key.to_string(), pct))
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia uma execução de otimização para uma conta de anúncios.
    Trigger {
        #[arg(long)]
        account: String,

        #[arg(long)]
        mode: Option<ModeArg>,

        /// Mudança máxima de orçamento por ação, em porcentagem.
        #[arg(long)]
        cap: Option<f64>,
    },

    /// Mostra a linha do tempo de progresso de um job.
    Watch { job_id: String },

    /// Revisa uma decisão e envia approve, edit ou deny.
    Review {
        decision_id: String,

        /// Exclui uma ação da aprovação.
        #[arg(long = "deselect", value_name = "KEY")]
        deselect: Vec<String>,

        /// Sobrescreve uma mudança de orçamento, ex.: `--edit adset:123=15`.
        #[arg(long = "edit", value_name = "KEY=PCT", value_parser = parse_edit)]
        edits: Vec<(String, f64)>,

        /// Nega a decisão inteira.
        #[arg(long, conflicts_with_all = ["deselect", "edits"])]
        deny: bool,

        #[arg(long, default_value = "")]
        comment: String,

        /// Mostra o resumo sem enviar.
        #[arg(long)]
        dry_run: bool,
    },

    /// Salva o modo do otimizador e os limites de uma conta de anúncios.
    Settings {
        #[arg(long)]
        account: String,

        #[arg(long)]
        mode: ModeArg,

        #[arg(long)]
        cap: f64,
    },

    /// Executa em memória uma otimização e uma criação de campanha simuladas.
    Demo,
}
