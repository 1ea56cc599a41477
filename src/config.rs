//! Configuração do motor de pagamentos carregada a partir de `payout.toml`.
//!
//! A struct [`EngineConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente `PAYOUT_*` têm precedência sobre o arquivo.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;
use crate::ledger::{AccountId, validate_address};
use crate::payout::RetryPolicy;

/// Arquivo de configuração padrão no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "payout.toml";

/// Configuração de nível superior carregada de `payout.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// URL base do gateway de submissão do ledger.
    #[serde(default = "default_ledger_url")]
    pub ledger_url: String,

    /// URL base do mirror node usado para confirmar finalidade.
    #[serde(default = "default_mirror_url")]
    pub mirror_url: String,

    /// Conta do tesouro debitada pelas transferências.
    #[serde(default)]
    pub operator_account: String,

    /// Credencial enviada ao gateway.
    #[serde(default)]
    pub operator_key: String,

    /// Pagamentos executados em paralelo por lote.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pausa entre lotes, em milissegundos.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Máximo de tentativas de submissão por pagamento.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Unidade de atraso em milissegundos para backoff linear.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Intervalo entre consultas de finalidade, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Número de consultas de finalidade antes de desistir.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Timeout de cada requisição HTTP, em milissegundos.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Prefixo do memo anexado a cada transferência.
    #[serde(default = "default_memo_prefix")]
    pub memo_prefix: String,

    /// Diretório do armazenamento JSON e dos relatórios.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Política opcional de transferências agendadas (multi-assinatura).
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

/// Pagamentos com valor igual ou acima de `threshold` viram transferências agendadas.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    /// Limite na menor unidade do ativo.
    pub threshold: u64,
    pub required_signers: Vec<String>,
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,
}

impl ScheduleConfig {
    pub fn applies_to(&self, amount: u64) -> bool {
        amount >= self.threshold
    }
}

fn default_ledger_url() -> String {
    "http://localhost:5551".to_string()
}

fn default_mirror_url() -> String {
    "https://testnet.mirrornode.hedera.com".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_max_polls() -> u32 {
    12
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_memo_prefix() -> String {
    "payout".to_string()
}

fn default_data_dir() -> String {
    ".payouts".to_string()
}

// Um dia, o mesmo prazo máximo que a rede aceita para agendamentos.
fn default_expiration_secs() -> u64 {
    86_400
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_url: default_ledger_url(),
            mirror_url: default_mirror_url(),
            operator_account: String::new(),
            operator_key: String::new(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            request_timeout_ms: default_request_timeout_ms(),
            memo_prefix: default_memo_prefix(),
            data_dir: default_data_dir(),
            schedule: None,
        }
    }
}

impl EngineConfig {
    /// Carrega a configuração de `path` (ou `payout.toml` no diretório atual).
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<EngineConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Variáveis de ambiente não vazias sobrescrevem o arquivo.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 4] = [
            ("PAYOUT_OPERATOR_ACCOUNT", &mut self.operator_account),
            ("PAYOUT_OPERATOR_KEY", &mut self.operator_key),
            ("PAYOUT_LEDGER_URL", &mut self.ledger_url),
            ("PAYOUT_MIRROR_URL", &mut self.mirror_url),
        ];
        for (key, field) in overrides {
            if let Some(value) = lookup(key)
                && !value.is_empty()
            {
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(EngineError::Config("max_retries must be at least 1".into()));
        }
        if self.max_polls == 0 {
            return Err(EngineError::Config("max_polls must be at least 1".into()));
        }
        self.operator_account_id()?;
        if let Some(schedule) = &self.schedule {
            if schedule.required_signers.is_empty() {
                return Err(EngineError::Config(
                    "schedule.required_signers must not be empty".into(),
                ));
            }
            for signer in &schedule.required_signers {
                validate_address(signer).map_err(|e| {
                    EngineError::Config(format!("schedule.required_signers: {e}"))
                })?;
            }
        }
        Ok(())
    }

    pub fn operator_account_id(&self) -> Result<AccountId, EngineError> {
        validate_address(&self.operator_account)
            .map_err(|e| EngineError::Config(format!("operator_account: {e}")))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
        }
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
