//! Interface de terminal do payout-engine: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de progresso e `console` para estilização com
//! cores. O [`RunProgress`] acompanha visualmente uma execução de pagamentos.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use payout_engine::mirror::Finality;
use payout_engine::orchestrator::RunObserver;
use payout_engine::payout::{
    PayoutExecution, PayoutStatus, RunExecution, RunStatus, RunSummary, format_amount,
};

/// Barra de progresso de uma execução, alimentada pelo orquestrador.
///
/// Cada pagamento concluído avança a barra; falhas são impressas em vermelho
/// acima dela.
pub struct RunProgress {
    pb: ProgressBar,
    red: Style,
}

impl RunProgress {
    /// Cria a barra; o total chega pelo orquestrador via [`RunObserver::run_started`].
    pub fn start(run_id: &str) -> Self {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message(format!("run {run_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            red: Style::new().red().bold(),
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl RunObserver for RunProgress {
    fn run_started(&self, payouts: usize) {
        self.pb.set_length(payouts as u64);
    }

    fn batch_started(&self, index: usize, batches: usize, size: usize) {
        self.pb
            .set_message(format!("batch {}/{batches} ({size} payouts)", index + 1));
    }

    fn payout_settled(&self, payout: &PayoutExecution) {
        self.pb.inc(1);
        if payout.status == PayoutStatus::Failed {
            self.pb.println(format!(
                "  {} {}: {}",
                self.red.apply_to("✗"),
                payout.contributor_id,
                payout.last_error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
}

fn status_style(status: PayoutStatus) -> Style {
    match status {
        PayoutStatus::Confirmed => Style::new().green(),
        PayoutStatus::Failed => Style::new().red(),
        PayoutStatus::Submitted => Style::new().yellow(),
        PayoutStatus::Pending => Style::new().dim(),
    }
}

/// Linha da tabela de pagamentos, sem cores.
fn payout_line(payout: &PayoutExecution, decimals: u8) -> String {
    let tx = payout
        .transaction_id
        .map(|t| t.to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "{:<20} {:>18} {:<8} {:<10} {tx}",
        payout.contributor_id,
        format_amount(payout.amount, decimals),
        payout.asset.to_string(),
        payout.status.to_string(),
    )
}

/// Imprime o resumo de uma execução e a tabela de pagamentos.
pub fn print_run(run: &RunExecution, verbose: bool) {
    let summary = RunSummary::from_run(run);
    let header = match (summary.status, run.has_failures()) {
        (RunStatus::Completed, false) => Style::new().green().bold(),
        (RunStatus::Failed, _) => Style::new().red().bold(),
        _ => Style::new().yellow().bold(),
    };

    println!();
    println!(
        "{}",
        header.apply_to(format!("─── Run {} ({}) ───", summary.run_id, summary.status))
    );
    println!(
        "  total {}  confirmed {}  failed {}  unconfirmed {}  skipped {}",
        summary.total_payouts,
        summary.successful_payouts,
        summary.failed_payouts,
        summary.submitted_payouts,
        summary.skipped_payouts
    );
    if let Some(ms) = summary.duration_ms {
        println!("  duration {:.1}s", ms as f64 / 1000.0);
    }
    if let Some(error) = &summary.error {
        println!("  {} {error}", Style::new().red().apply_to("error:"));
    }

    println!();
    for payout in &run.payouts {
        let line = payout_line(payout, run.decimals);
        println!("  {}", status_style(payout.status).apply_to(line));
        if verbose && let Some(error) = &payout.last_error {
            println!("      {}", Style::new().dim().apply_to(error));
        }
    }
    for skipped in &run.skipped {
        println!(
            "  {}",
            Style::new()
                .dim()
                .apply_to(format!("{:<20} skipped: {}", skipped.contributor_id, skipped.reason))
        );
    }

    if let Some(cid) = &run.artifacts.report_cid {
        println!();
        println!("  report  {cid}");
    }
    if let Some(cid) = &run.artifacts.summary_cid {
        println!("  summary {cid}");
    }

    if verbose {
        println!();
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    }
}

/// Imprime o resultado de uma consulta de finalidade.
pub fn print_finality(transaction_id: &str, finality: &Finality) {
    match finality {
        Finality::Confirmed { consensus_at } => println!(
            "  {} {transaction_id} reached consensus at {consensus_at}",
            Style::new().green().bold().apply_to("✓")
        ),
        Finality::Failed { result } => println!(
            "  {} {transaction_id} failed at consensus: {result}",
            Style::new().red().bold().apply_to("✗")
        ),
        Finality::Pending => println!(
            "  {} {transaction_id} is not final yet",
            Style::new().yellow().apply_to("…")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payout_engine::ledger::Asset;
    use payout_engine::payout::PayoutInstruction;

    #[test]
    fn payout_line_formats_amount_with_decimals() {
        let instruction = PayoutInstruction {
            contributor_id: "alice".into(),
            recipient: "0.0.1001".into(),
            amount: 150_000_000,
            asset: Asset::Native,
            eligible: true,
        };
        let payout = PayoutExecution::new("run-1", &instruction);
        let line = payout_line(&payout, 8);
        assert!(line.starts_with("alice"));
        assert!(line.contains("1.50000000"));
        assert!(line.contains("PENDING"));
        assert!(line.ends_with('-'));
    }
}
