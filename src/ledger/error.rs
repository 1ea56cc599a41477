//! Tipos de erro para as chamadas de rede ao ledger e ao mirror node.
//!
//! Define [`LedgerError`] com variantes para rejeição pelo ledger, rate limiting,
//! erros HTTP e falhas de rede. A decisão de retentar é tomada sobre a variante
//! tipada via [`LedgerError::is_retryable`], nunca inspecionando mensagens.

use thiserror::Error;

use crate::error::FailureKind;

/// Status de recibo que indicam um problema nos dados do pagamento.
/// Retentar não muda o resultado.
const NON_RETRYABLE_STATUSES: &[&str] = &[
    "INVALID_ACCOUNT_ID",
    "ACCOUNT_DELETED",
    "TOKEN_NOT_ASSOCIATED_TO_ACCOUNT",
    "INVALID_TOKEN_ID",
    "ACCOUNT_FROZEN_FOR_TOKEN",
];

/// Erros que podem ocorrer ao interagir com o ledger ou com o mirror node.
///
/// - [`Rejected`](LedgerError::Rejected): o ledger respondeu, mas o recibo não é `SUCCESS`
/// - [`RateLimited`](LedgerError::RateLimited): o gateway retornou HTTP 429
/// - [`Api`](LedgerError::Api): qualquer outro erro HTTP (4xx/5xx)
/// - [`Network`](LedgerError::Network): falha na camada de rede
#[derive(Debug, Error)]
pub enum LedgerError {
    /// O ledger aceitou a requisição mas reportou um status de recibo diferente de sucesso
    /// (ex.: `INSUFFICIENT_PAYER_BALANCE`, `TOKEN_NOT_ASSOCIATED_TO_ACCOUNT`).
    #[error("transfer rejected with status {status}: {message}")]
    Rejected { status: String, message: String },

    /// O servidor retornou HTTP 429 (rate limit).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro HTTP retornado pelo gateway ou pelo mirror node.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Endereço de conta malformado. Detectado antes de qualquer chamada de rede.
    #[error("invalid ledger address: {0:?}")]
    InvalidAddress(String),

    /// Resposta que não pôde ser interpretada.
    #[error("failed to parse ledger response: {0}")]
    Parse(String),
}

impl LedgerError {
    /// Indica se a mesma transferência pode ser submetida novamente com chance de sucesso.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Rejected { status, .. } => {
                !NON_RETRYABLE_STATUSES.contains(&status.as_str())
            }
            LedgerError::RateLimited { .. } => true,
            LedgerError::Api { status, .. } => *status >= 500,
            LedgerError::Network(_) => true,
            LedgerError::InvalidAddress(_) => false,
            LedgerError::Parse(_) => true,
        }
    }

    /// Classifica o erro para a política de retentativa do runner.
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_retryable() {
            FailureKind::Transient(self.to_string())
        } else {
            FailureKind::Data(self.to_string())
        }
    }

    /// Espera mínima pedida pelo servidor antes da próxima tentativa, se houver.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LedgerError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Status curto gravado no resultado da transferência.
    pub fn status(&self) -> String {
        match self {
            LedgerError::Rejected { status, .. } => status.clone(),
            LedgerError::RateLimited { .. } => "RATE_LIMITED".to_string(),
            LedgerError::Api { status, .. } => format!("HTTP_{status}"),
            LedgerError::Network(e) if e.is_timeout() => "TIMEOUT".to_string(),
            LedgerError::Network(_) => "NETWORK_ERROR".to_string(),
            LedgerError::InvalidAddress(_) => "INVALID_ADDRESS".to_string(),
            LedgerError::Parse(_) => "UNPARSEABLE_RESPONSE".to_string(),
        }
    }
}
