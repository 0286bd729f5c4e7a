//! Tipos de dados para requisições e respostas do backend do otimizador.
//!
//! Os corpos de requisição usam chaves camelCase, como o backend espera.
//! O documento de configurações mantém o formato snake_case em que é salvo.

use serde::{Deserialize, Serialize};

use crate::decision::{Caps, DecisionMode};

/// Corpo de `POST /runs`. Não é idempotente: uma retentativa pode iniciar um segundo job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRunRequest {
    pub owner: String,
    pub ad_account_id: String,
    pub mode: DecisionMode,
    pub caps: Caps,
}

/// `{"jobId": ...}` ou `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerRunResponse {
    Started {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Rejected {
        error: String,
    },
}

/// Código de auditoria de um envio de revisão.
///
/// `Approve` e `Edit` têm payloads com a mesma estrutura. `Edit` indica
/// que ao menos um delta enviado difere da recomendação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Edit,
    Deny,
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewAction::Approve => write!(f, "approve"),
            ReviewAction::Edit => write!(f, "edit"),
            ReviewAction::Deny => write!(f, "deny"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedAction {
    pub key: String,
    pub delta_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackEdits {
    pub actions: Vec<EditedAction>,
}

/// O payload único enviado por uma revisão.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCallback {
    pub decision_id: String,
    pub owner: String,
    pub ad_account_id: String,
    pub action: ReviewAction,
    pub selection: Vec<String>,
    pub edits: CallbackEdits,
    pub comment: String,
    pub idempotency_key: String,
}

impl DecisionCallback {
    /// Mesmo conteúdo de envio, ignorando a chave de idempotência.
    pub fn same_content(&self, other: &DecisionCallback) -> bool {
        self.decision_id == other.decision_id
            && self.action == other.action
            && self.selection == other.selection
            && self.edits == other.edits
            && self.comment == other.comment
    }
}

/// Configurações do otimizador por conta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSettings {
    pub optimizer_mode: DecisionMode,
    pub caps: Caps,
}
