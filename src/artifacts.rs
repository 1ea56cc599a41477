//! Run reports handed to the artifact collaborator once a run settles.

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::StoreError;
use crate::payout::{ArtifactRefs, RunExecution, RunSummary, format_amount};

#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// Produce the machine-readable and human-readable reports, returning their content ids.
    async fn generate(&self, run: &RunExecution) -> Result<ArtifactRefs, StoreError>;
}

#[derive(Debug, Serialize)]
pub struct PayoutReportLine<'a> {
    pub contributor_id: &'a str,
    pub recipient: Option<&'a str>,
    pub amount: u64,
    pub amount_display: String,
    pub asset: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub error: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub summary: RunSummary,
    pub payouts: Vec<PayoutReportLine<'a>>,
    pub skipped: &'a [crate::payout::SkippedPayout],
}

impl<'a> RunReport<'a> {
    pub fn from_run(run: &'a RunExecution) -> Self {
        let payouts = run
            .payouts
            .iter()
            .map(|p| PayoutReportLine {
                contributor_id: &p.contributor_id,
                recipient: p.recipient.as_deref(),
                amount: p.amount,
                amount_display: format_amount(p.amount, run.decimals),
                asset: p.asset.to_string(),
                status: p.status.to_string(),
                transaction_id: p.transaction_id.map(|t| t.to_string()),
                confirmed_at: p.confirmed_at,
                attempts: p.attempt_count,
                error: p.last_error.as_deref(),
            })
            .collect();
        Self {
            summary: RunSummary::from_run(run),
            payouts,
            skipped: &run.skipped,
        }
    }
}

/// Markdown rendering of a run for people reading the payout record.
pub fn render_markdown(run: &RunExecution) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Payout run {}", run.run_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Status: {}", run.status);
    let _ = writeln!(out, "- Started: {}", run.started_at.to_rfc3339());
    if let Some(done) = run.finished_at {
        let _ = writeln!(out, "- Finished: {}", done.to_rfc3339());
    }
    let _ = writeln!(
        out,
        "- Payouts: {} total, {} confirmed, {} failed, {} awaiting confirmation",
        run.total_payouts, run.successful_payouts, run.failed_payouts, run.submitted_payouts
    );
    if let Some(err) = &run.error {
        let _ = writeln!(out, "- Run error: {err}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "| Contributor | Amount | Asset | Status | Transaction | Error |");
    let _ = writeln!(out, "|---|---:|---|---|---|---|");
    for p in &run.payouts {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            p.contributor_id,
            format_amount(p.amount, run.decimals),
            p.asset,
            p.status,
            p.transaction_id.map(|t| t.to_string()).unwrap_or_default(),
            p.last_error.as_deref().unwrap_or("").replace('|', "\\|"),
        );
    }
    if !run.skipped.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Skipped");
        let _ = writeln!(out);
        for s in &run.skipped {
            let _ = writeln!(out, "- {}: {}", s.contributor_id, s.reason);
        }
    }
    out
}

pub fn content_id(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Writes reports under `{root}/artifacts/`, named by content hash.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn put(&self, bytes: &[u8], extension: &str) -> Result<String, StoreError> {
        let cid = content_id(bytes);
        let dir = self.root.join("artifacts");
        fs::create_dir_all(&dir).await?;
        let name = cid.trim_start_matches("sha256:");
        fs::write(dir.join(format!("{name}.{extension}")), bytes).await?;
        Ok(cid)
    }
}

#[async_trait]
impl ArtifactGenerator for LocalArtifactStore {
    async fn generate(&self, run: &RunExecution) -> Result<ArtifactRefs, StoreError> {
        let report = serde_json::to_vec_pretty(&RunReport::from_run(run))?;
        let summary = render_markdown(run);
        Ok(ArtifactRefs {
            report_cid: Some(self.put(&report, "json").await?),
            summary_cid: Some(self.put(summary.as_bytes(), "md").await?),
        })
    }
}
