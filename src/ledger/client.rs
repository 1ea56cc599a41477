use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use tracing::debug;

use super::address::{AccountId, validate_address};
use super::error::LedgerError;
use super::types::{
    GatewayResponse, ScheduleBody, TransactionId, TransferBody, TransferReceipt, TransferRequest,
};

/// Receipt statuses that mean the network holds the transfer.
const ACCEPTED_STATUSES: &[&str] = &["SUCCESS", "DUPLICATE_TRANSACTION"];

/// Submits transfers from the operator account to the ledger.
///
/// Implementations make exactly one network call per invocation and keep no
/// per-call state, so a single instance is shared by every concurrent attempt.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn submit_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, LedgerError>;

    /// Wrap the transfer in a schedule that executes once `required_signers` have signed.
    async fn submit_scheduled_transfer(
        &self,
        request: &TransferRequest,
        required_signers: &[String],
        expiration: DateTime<Utc>,
    ) -> Result<TransferReceipt, LedgerError>;
}

/// [`TransferClient`] backed by the ledger gateway's REST API.
pub struct HttpLedgerClient {
    operator: AccountId,
    operator_key: String,
    client: Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(
        base_url: String,
        operator: AccountId,
        operator_key: String,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            operator,
            operator_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn operator(&self) -> AccountId {
        self.operator
    }

    fn transfer_body(&self, request: &TransferRequest) -> Result<(TransactionId, TransferBody), LedgerError> {
        let recipient = validate_address(&request.recipient)?;
        let transaction_id =
            TransactionId::derive(self.operator, request.valid_start, &request.idempotency_key);
        let body = TransferBody {
            transaction_id: transaction_id.to_string(),
            from: self.operator.to_string(),
            to: recipient.to_string(),
            amount: request.amount,
            asset: request.asset.to_string(),
            memo: request.memo.clone(),
            idempotency_key: request.idempotency_key.clone(),
        };
        Ok((transaction_id, body))
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        idempotency_key: &str,
        body: &T,
    ) -> Result<GatewayResponse, LedgerError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.operator_key)
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await?;

        let response = check_status(response).await?;
        response
            .json::<GatewayResponse>()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))
    }
}

/// Map HTTP-level failures to typed errors, passing 2xx responses through.
async fn check_status(response: Response) -> Result<Response, LedgerError> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000))
            .unwrap_or(1000);
        return Err(LedgerError::RateLimited {
            retry_after_ms: retry_after,
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

    Ok(response)
}

/// Turn a gateway response into a receipt, or a rejection if the network refused it.
fn into_receipt(
    expected: TransactionId,
    response: GatewayResponse,
) -> Result<TransferReceipt, LedgerError> {
    if !ACCEPTED_STATUSES.contains(&response.status.as_str()) {
        return Err(LedgerError::Rejected {
            message: response
                .message
                .unwrap_or_else(|| format!("ledger returned {}", response.status)),
            status: response.status,
        });
    }

    let transaction_id = match response.transaction_id.parse::<TransactionId>() {
        Ok(id) => id,
        Err(_) if response.transaction_id.is_empty() => expected,
        Err(e) => return Err(e),
    };

    Ok(TransferReceipt {
        transaction_id,
        status: response.status,
        schedule_id: response.schedule_id,
    })
}

#[async_trait]
impl TransferClient for HttpLedgerClient {
    async fn submit_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, LedgerError> {
        let (transaction_id, body) = self.transfer_body(request)?;
        debug!(
            transaction_id = %transaction_id,
            recipient = %body.to,
            amount = body.amount,
            asset = %body.asset,
            "submitting transfer"
        );
        let response = self
            .post("/api/v1/transfers", &request.idempotency_key, &body)
            .await?;
        into_receipt(transaction_id, response)
    }

    async fn submit_scheduled_transfer(
        &self,
        request: &TransferRequest,
        required_signers: &[String],
        expiration: DateTime<Utc>,
    ) -> Result<TransferReceipt, LedgerError> {
        for signer in required_signers {
            validate_address(signer)?;
        }
        let (transaction_id, transfer) = self.transfer_body(request)?;
        debug!(
            transaction_id = %transaction_id,
            signers = required_signers.len(),
            "submitting scheduled transfer"
        );
        let body = ScheduleBody {
            transfer,
            required_signers: required_signers.to_vec(),
            expiration_time: expiration,
        };
        let response = self
            .post("/api/v1/schedules", &request.idempotency_key, &body)
            .await?;
        into_receipt(transaction_id, response)
    }
}
