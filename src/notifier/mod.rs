//! Transactional email dispatch.
//!
//! Emails are a courtesy, never a correctness dependency: dispatch runs in a
//! background task with a bounded retry, and exhausting the retries is logged
//! and dropped. No notifier failure ever reaches the operation that asked
//! for the email.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::AppConfig;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    OrderConfirmation,
    PaymentSuccess,
    PaymentFailure,
    OrderShipped,
}

impl EmailTemplate {
    pub fn id(self) -> &'static str {
        match self {
            EmailTemplate::OrderConfirmation => "order_confirmation",
            EmailTemplate::PaymentSuccess => "payment_success",
            EmailTemplate::PaymentFailure => "payment_failure",
            EmailTemplate::OrderShipped => "order_shipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub template: EmailTemplate,
    pub recipient: String,
    pub context: Value,
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("email service rejected message: HTTP {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), NotifierError>;
}

/// Posts messages to a transactional email service endpoint.
#[derive(Clone)]
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
    from: String,
}

impl HttpNotifier {
    pub fn new(endpoint: String, from: String) -> Result<Self, NotifierError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            endpoint,
            from,
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Option<Self>, NotifierError> {
        match &cfg.notifier_url {
            Some(url) => Ok(Some(Self::new(url.clone(), cfg.notifier_from.clone())?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, message: EmailMessage) -> Result<(), NotifierError> {
        let body = serde_json::json!({
            "template_id": message.template.id(),
            "from": self.from,
            "to": message.recipient,
            "context": message.context,
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotifierError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Drops messages on the floor. Used when no email endpoint is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _message: EmailMessage) -> Result<(), NotifierError> {
        Ok(())
    }
}

/// Fire-and-forget dispatch with bounded retry.
///
/// Spawns a task so the caller never waits on email delivery; transient
/// failures retry at a fixed delay up to [`MAX_ATTEMPTS`] total attempts.
pub fn dispatch(notifier: Arc<dyn Notifier>, message: EmailMessage) {
    tokio::spawn(async move {
        for attempt in 1..=MAX_ATTEMPTS {
            match notifier.send(message.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        template = message.template.id(),
                        recipient = %message.recipient,
                        attempt,
                        "email dispatch failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    error!(
                        template = message.template.id(),
                        recipient = %message.recipient,
                        "email dispatch failed after {} attempts: {}",
                        MAX_ATTEMPTS,
                        e
                    );
                }
            }
        }
    });
}
