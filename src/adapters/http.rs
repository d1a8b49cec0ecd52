use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use super::ledger_client::{EscrowTransaction, Finality, LedgerClient};
use crate::error::{classify_reqwest_error, LedgerError};

/// Ledger gateway client.
///
/// Speaks JSON to the ledger network's HTTP gateway. Every call carries the
/// configured timeout; a timed-out submit is reported as retryable and left
/// for the poll cycle to resolve.
pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    submission_ref: String,
}

#[derive(Debug, Deserialize)]
struct FinalityResponse {
    status: String,
    ledger_time: Option<DateTime<Utc>>,
    reason: Option<String>,
    #[serde(default)]
    transient: bool,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: i64,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Retryable(format!("client construction failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LedgerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(LedgerError::Rejected(format!("{}: {}", status, body)))
        } else {
            Err(LedgerError::Retryable(format!("{}: {}", status, body)))
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit(&self, tx: &EscrowTransaction) -> Result<String, LedgerError> {
        let response = self
            .http
            .post(format!("{}/v1/transactions", self.base_url))
            .json(tx)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let response = Self::check_status(response).await?;
        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Retryable(format!("malformed submit response: {}", e)))?;

        Ok(parsed.submission_ref)
    }

    async fn query_finality(&self, submission_ref: &str) -> Result<Finality, LedgerError> {
        let response = self
            .http
            .get(format!(
                "{}/v1/transactions/{}",
                self.base_url, submission_ref
            ))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let response = Self::check_status(response).await?;
        let parsed: FinalityResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Retryable(format!("malformed finality response: {}", e)))?;

        match parsed.status.as_str() {
            "pending" => Ok(Finality::Pending),
            "confirmed" => Ok(Finality::Confirmed {
                ledger_time: parsed.ledger_time.unwrap_or_else(Utc::now),
            }),
            "failed" => Ok(Finality::Failed {
                reason: parsed
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string()),
                transient: parsed.transient,
            }),
            other => Err(LedgerError::Retryable(format!(
                "unknown finality status: {}",
                other
            ))),
        }
    }

    async fn query_balance(&self, contract_ref: &str) -> Result<i64, LedgerError> {
        let response = self
            .http
            .get(format!(
                "{}/v1/contracts/{}/balance",
                self.base_url, contract_ref
            ))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let response = Self::check_status(response).await?;
        let parsed: BalanceResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Retryable(format!("malformed balance response: {}", e)))?;

        Ok(parsed.balance)
    }
}
