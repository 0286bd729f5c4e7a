//! Configuração do adpilot carregada a partir de `adpilot.toml`.
//!
//! A struct [`AdpilotConfig`] contém todos os parâmetros configuráveis.
//! Campos ausentes no arquivo usam defaults.
//! A variável de ambiente `ADPILOT_API_KEY` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::api::RetryConfig;
use crate::decision::{Caps, DecisionMode};

pub const CONFIG_FILE: &str = "adpilot.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AdpilotConfig {
    /// URL base do backend do otimizador.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Id do dono enviado nos triggers e callbacks.
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Atraso entre o fim de um job e a atualização dos dependentes.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Pausa antes de cada chamada de criação de campanha.
    #[serde(default = "default_step_pacing_ms")]
    pub step_pacing_ms: u64,

    /// Retentativas do callback antes de devolver o erro ao revisor.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_mode")]
    pub default_mode: DecisionMode,

    #[serde(default = "default_cap_pct")]
    pub default_cap_pct: f64,
}

fn default_api_base_url() -> String {
    "http://localhost:8787".to_string()
}

fn default_owner() -> String {
    "local".to_string()
}

fn default_settle_delay_ms() -> u64 {
    600
}

fn default_step_pacing_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_mode() -> DecisionMode {
    DecisionMode::Review
}

fn default_cap_pct() -> f64 {
    25.0
}

impl Default for AdpilotConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: String::new(),
            owner: default_owner(),
            settle_delay_ms: default_settle_delay_ms(),
            step_pacing_ms: default_step_pacing_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            default_mode: default_mode(),
            default_cap_pct: default_cap_pct(),
        }
    }
}

impl AdpilotConfig {
    /// Carrega `adpilot.toml` do diretório atual.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega de `path`, usando defaults quando o arquivo não existe.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<AdpilotConfig>(&contents).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("ADPILOT_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        if config.default_cap_pct <= 0.0 || !config.default_cap_pct.is_finite() {
            anyhow::bail!("default_cap_pct must be positive, got {}", config.default_cap_pct);
        }

        Ok(config)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn step_pacing(&self) -> Duration {
        Duration::from_millis(self.step_pacing_ms)
    }

    pub fn default_caps(&self) -> Caps {
        Caps {
            max_account_budget_change_pct: self.default_cap_pct,
        }
    }
}
