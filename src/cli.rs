//! Interface de linha de comando do payout-engine baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (execute, retry, status, verify)
//! e flags globais (--config, --max-retries, --batch-size, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Executa lotes de pagamentos no ledger com retentativas e acompanhamento de finalidade.
#[derive(Debug, Parser)]
#[command(name = "payout-engine", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `payout.toml`).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de tentativas por pagamento.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Quantidade de pagamentos processados em paralelo por lote.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa todos os pagamentos elegíveis de um arquivo de instruções.
    Execute {
        /// Arquivo JSON com `run_id`, `decimals` e a lista de `payouts`.
        #[arg(long)]
        file: PathBuf,
    },

    /// Reexecuta apenas os pagamentos com falha de uma execução anterior.
    Retry {
        /// Identificador da execução.
        #[arg(long)]
        run_id: String,
    },

    /// Mostra o resumo de uma execução gravada.
    Status {
        /// Identificador da execução.
        #[arg(long)]
        run_id: String,
    },

    /// Consulta o mirror node sobre a finalidade de uma transação.
    Verify {
        /// Id da transação no formato `0.0.2@1700000000.000000000`.
        #[arg(long)]
        transaction_id: String,
    },
}
