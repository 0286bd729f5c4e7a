//! Tipos de erro para chamadas ao backend do otimizador.
//!
//! [`ApiError`] cobre rate limiting, respostas HTTP sem sucesso e falhas
//! de rede. Erros de validação nunca chegam aqui: são barrados localmente
//! antes de a requisição ser montada.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 429. `retry_after_ms` vem do header `retry-after` quando presente.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status sem sucesso, com o corpo da resposta como mensagem.
    #[error("API error (status {status}): {message}")]
    Status { status: u16, message: String },

    /// Falha de DNS, conexão, timeout ou decodificação do corpo.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApiError {
    /// Se reenviar a mesma requisição pode ter sucesso.
    ///
    /// Erros de cliente (4xx exceto 429) são definitivos.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } | ApiError::Network(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
        }
    }

    /// Espera pedida pelo servidor antes da próxima tentativa, se houver.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}
