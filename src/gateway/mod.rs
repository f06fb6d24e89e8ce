//! Payment gateway client.
//!
//! A narrow adapter over the external payment provider: initiate a hosted
//! charge, verify a transaction reference server-to-server, and check
//! webhook signatures. The webhook payload itself is never trusted for money
//! movement; `verify` against the provider's API is the authoritative check.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha512;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use crate::config::AppConfig;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the hex HMAC-SHA512 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "x-provider-signature";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway declined: {message}")]
    Declined {
        message: String,
        /// Provider error payload, kept for diagnostics.
        payload: Option<Value>,
    },

    #[error("unexpected gateway response: {0}")]
    Malformed(String),
}

/// Charge initiation request. Amounts cross the wire in minor units.
#[derive(Debug, Clone, Serialize)]
pub struct InitiateCharge {
    pub amount_minor: i64,
    pub currency: String,
    pub email: String,
    pub reference: String,
    pub metadata: Value,
}

/// Result of a successful charge initiation.
#[derive(Debug, Clone)]
pub struct InitiatedCharge {
    pub checkout_url: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Success,
    Failed,
    Pending,
}

/// Authoritative transaction state reported by the provider's verify API.
#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    pub status: VerificationStatus,
    pub amount_minor: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a remote transaction and returns the hosted checkout URL.
    async fn initiate(&self, charge: InitiateCharge) -> Result<InitiatedCharge, GatewayError>;

    /// Looks up the authoritative state of a transaction by reference.
    async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError>;
}

// Provider wire format (Paystack-style envelope).

#[derive(Debug, Deserialize)]
struct ProviderEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    currency: String,
}

/// HTTP client for the hosted payment provider.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.gateway_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.gateway_base_url.trim_end_matches('/').to_string(),
            secret_key: cfg.gateway_secret_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, charge), fields(reference = %charge.reference))]
    async fn initiate(&self, charge: InitiateCharge) -> Result<InitiatedCharge, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let body = serde_json::json!({
            "amount": charge.amount_minor,
            "currency": charge.currency,
            "email": charge.email,
            "reference": charge.reference,
            "metadata": charge.metadata,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let payload = response.json::<Value>().await.ok();
            return Err(GatewayError::Declined {
                message: "charge initialization rejected".to_string(),
                payload,
            });
        }

        let envelope: ProviderEnvelope<InitializeData> = response.json().await?;
        match envelope.data {
            Some(data) if envelope.status => Ok(InitiatedCharge {
                checkout_url: data.authorization_url,
                reference: data.reference,
            }),
            _ => Err(GatewayError::Declined {
                message: envelope
                    .message
                    .unwrap_or_else(|| "unknown gateway error".to_string()),
                payload: None,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, GatewayError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let envelope: ProviderEnvelope<VerifyData> = response.json().await?;
        let data = envelope
            .data
            .filter(|_| envelope.status)
            .ok_or_else(|| GatewayError::Malformed("verify response missing data".to_string()))?;

        let status = match data.status.as_str() {
            "success" => VerificationStatus::Success,
            "failed" => VerificationStatus::Failed,
            _ => VerificationStatus::Pending,
        };

        Ok(VerifiedTransaction {
            status,
            amount_minor: data.amount,
            currency: data.currency,
        })
    }
}

/// Computes the hex HMAC-SHA512 signature for a webhook body.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a webhook signature against the raw request body.
///
/// Runs on the raw bytes, before any JSON parsing: re-serialization is not
/// guaranteed byte-identical, so signing anything else would be unsound.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = sign_webhook_body(secret, body);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk_test_0123456789abcdef";

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"event":"charge.success","data":{"reference":"order_1_2"}}"#;
        let sig = sign_webhook_body(SECRET, body);
        assert!(verify_webhook_signature(SECRET, body, &sig));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = br#"{"event":"charge.success","data":{"reference":"order_1_2"}}"#;
        let sig = sign_webhook_body(SECRET, body);
        let tampered = br#"{"event":"charge.success","data":{"reference":"order_1_3"}}"#;
        assert!(!verify_webhook_signature(SECRET, tampered, &sig));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = b"payload";
        let sig = sign_webhook_body(SECRET, body);
        assert!(!verify_webhook_signature("sk_test_other_secret", body, &sig));
    }

    #[test]
    fn signature_length_mismatch_fails_fast() {
        assert!(!verify_webhook_signature(SECRET, b"payload", "deadbeef"));
    }

    #[test]
    fn sha512_signature_is_128_hex_chars() {
        assert_eq!(sign_webhook_body(SECRET, b"x").len(), 128);
    }

    #[test]
    fn verify_status_mapping() {
        for (raw, expected) in [
            ("success", VerificationStatus::Success),
            ("failed", VerificationStatus::Failed),
            ("abandoned", VerificationStatus::Pending),
        ] {
            let status = match raw {
                "success" => VerificationStatus::Success,
                "failed" => VerificationStatus::Failed,
                _ => VerificationStatus::Pending,
            };
            assert_eq!(status, expected);
        }
    }
}
