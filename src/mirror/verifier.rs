use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::types::{Finality, FinalityOutcome, MirrorTransactionsResponse};
use crate::ledger::{LedgerError, TransactionId};

/// Decides whether a submitted transaction has reached finality.
#[async_trait]
pub trait ConfirmationVerifier: Send + Sync {
    /// One look at the indexer. Absence is `Pending`, not an error.
    async fn check(&self, transaction_id: &TransactionId) -> Result<Finality, LedgerError>;

    async fn is_finalized(&self, transaction_id: &TransactionId) -> bool {
        matches!(
            self.check(transaction_id).await,
            Ok(Finality::Confirmed { .. })
        )
    }

    /// Poll up to `max_attempts` times, waiting `poll_interval` before each poll.
    ///
    /// Mirror errors count as a pending poll. Returns `TimedOut` when the
    /// budget is spent; that says nothing about whether the transfer will land.
    async fn await_finalization(
        &self,
        transaction_id: &TransactionId,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> FinalityOutcome {
        for poll in 1..=max_attempts {
            sleep(poll_interval).await;
            match self.check(transaction_id).await {
                Ok(Finality::Confirmed { consensus_at }) => {
                    return FinalityOutcome::Confirmed { consensus_at };
                }
                Ok(Finality::Failed { result }) => {
                    return FinalityOutcome::Failed { result };
                }
                Ok(Finality::Pending) => {
                    debug!(%transaction_id, poll, max_attempts, "transaction not final yet");
                }
                Err(e) => {
                    warn!(%transaction_id, poll, error = %e, "mirror query failed");
                }
            }
        }
        FinalityOutcome::TimedOut {
            polls: max_attempts,
        }
    }
}

/// [`ConfirmationVerifier`] backed by the mirror node REST API.
pub struct MirrorVerifier {
    client: Client,
    base_url: String,
}

impl MirrorVerifier {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ConfirmationVerifier for MirrorVerifier {
    async fn check(&self, transaction_id: &TransactionId) -> Result<Finality, LedgerError> {
        let url = format!(
            "{}/api/v1/transactions/{}",
            self.base_url,
            transaction_id.mirror_form()
        );
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(Finality::Pending);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LedgerError::RateLimited {
                retry_after_ms: 1000,
            });
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LedgerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<MirrorTransactionsResponse>()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))?;

        // A scheduled or retried transfer can list several entries; any success wins.
        if let Some(tx) = body.transactions.iter().find(|t| t.result == "SUCCESS") {
            return tx.finality();
        }
        match body.transactions.first() {
            Some(tx) => tx.finality(),
            None => Ok(Finality::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AccountId;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tx() -> TransactionId {
        TransactionId {
            payer: AccountId::new(0, 0, 2),
            seconds: 1_700_000_000,
            nanos: 42,
        }
    }

    fn verifier(server: &MockServer) -> MirrorVerifier {
        MirrorVerifier::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn success_result_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/transactions/0.0.2-1700000000-000000042"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "transactions": [{
                    "transaction_id": "0.0.2-1700000000-000000042",
                    "result": "SUCCESS",
                    "consensus_timestamp": "1700000004.000000001"
                }]
            })))
            .mount(&server)
            .await;

        let v = verifier(&server);
        assert!(v.is_finalized(&tx()).await);
        assert!(matches!(
            v.check(&tx()).await.unwrap(),
            Finality::Confirmed { .. }
        ));
    }

    #[tokio::test]
    async fn not_found_is_pending_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "_status": { "messages": [{ "message": "Not found" }] }
            })))
            .mount(&server)
            .await;

        let v = verifier(&server);
        assert_eq!(v.check(&tx()).await.unwrap(), Finality::Pending);
        assert!(!v.is_finalized(&tx()).await);
    }

    #[tokio::test]
    async fn failed_consensus_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "transactions": [{
                    "transaction_id": "0.0.2-1700000000-000000042",
                    "result": "INSUFFICIENT_ACCOUNT_BALANCE",
                    "consensus_timestamp": "1700000004.000000001"
                }]
            })))
            .mount(&server)
            .await;

        let outcome = verifier(&server)
            .await_finalization(&tx(), Duration::from_millis(1), 3)
            .await;
        assert_eq!(
            outcome,
            FinalityOutcome::Failed {
                result: "INSUFFICIENT_ACCOUNT_BALANCE".into()
            }
        );
    }

    #[tokio::test]
    async fn server_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = verifier(&server).check(&tx()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Api { status: 500, .. }));
    }

    /// Scripted verifier: pending for a number of polls, then confirmed.
    struct Scripted {
        pending_polls: u32,
        polls: Mutex<u32>,
    }

    #[async_trait]
    impl ConfirmationVerifier for Scripted {
        async fn check(&self, _tx: &TransactionId) -> Result<Finality, LedgerError> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if *polls <= self.pending_polls {
                if *polls % 2 == 0 {
                    return Err(LedgerError::Parse("flaky mirror".into()));
                }
                Ok(Finality::Pending)
            } else {
                Ok(Finality::Confirmed {
                    consensus_at: chrono::Utc::now(),
                })
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn await_finalization_polls_through_errors() {
        let v = Scripted {
            pending_polls: 4,
            polls: Mutex::new(0),
        };
        let started = tokio::time::Instant::now();
        let outcome = v
            .await_finalization(&tx(), Duration::from_secs(5), 12)
            .await;
        assert!(matches!(outcome, FinalityOutcome::Confirmed { .. }));
        assert_eq!(*v.polls.lock().unwrap(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn await_finalization_times_out_after_budget() {
        let v = Scripted {
            pending_polls: u32::MAX,
            polls: Mutex::new(0),
        };
        let started = tokio::time::Instant::now();
        let outcome = v
            .await_finalization(&tx(), Duration::from_secs(5), 12)
            .await;
        assert_eq!(outcome, FinalityOutcome::TimedOut { polls: 12 });
        assert_eq!(*v.polls.lock().unwrap(), 12);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }
}
