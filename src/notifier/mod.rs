use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

/// Payload delivered for every terminal state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub agreement_id: Uuid,
    pub record_id: Uuid,
    pub status: String,
    pub amount: i64,
    pub timestamp: i64,
}

/// External collaborator informed of terminal transitions (confirmed,
/// failed, needs_review). At-least-once: the collaborator deduplicates if
/// it needs to. Delivery failure never blocks reconciliation - the audit
/// log keeps the authoritative trail.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn notify(&self, notification: PaymentNotification);
}

/// Delivers notifications to a configured webhook endpoint.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventNotifier for WebhookNotifier {
    async fn notify(&self, notification: PaymentNotification) {
        match self
            .http
            .post(&self.url)
            .json(&notification)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                error!(
                    "Webhook delivery for record {} returned {}",
                    notification.record_id,
                    response.status()
                );
            }
            Err(e) => {
                error!(
                    "Webhook delivery for record {} failed: {:?}",
                    notification.record_id, e
                );
            }
        }
    }
}

/// Fallback notifier when no webhook endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl EventNotifier for LogNotifier {
    async fn notify(&self, notification: PaymentNotification) {
        info!(
            "Payment {} on agreement {} reached {} (amount {})",
            notification.record_id,
            notification.agreement_id,
            notification.status,
            notification.amount
        );
    }
}

impl PaymentNotification {
    pub fn new(agreement_id: Uuid, record_id: Uuid, status: &str, amount: i64) -> Self {
        Self {
            agreement_id,
            record_id,
            status: status.to_string(),
            amount,
            timestamp: Utc::now().timestamp(),
        }
    }
}
