use crate::domain::gateway::GatewayEvent;
use crate::domain::ports::WebhookVerifier;
use crate::error::{Result, WalletError};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Verifies gateway webhooks signed as `t=<unix>,v1=<hex hmac-sha256>` over
/// `"<t>.<body>"`.
pub struct HmacWebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl HmacWebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WalletError::Signature("Invalid webhook secret".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Builds the header the gateway would send for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let signature = hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes());
        Ok(format!("t={timestamp},v1={signature}"))
    }
}

impl WebhookVerifier for HmacWebhookVerifier {
    fn verify(&self, raw_body: &[u8], signature_header: &str) -> Result<GatewayEvent> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Webhook signature header has no timestamp");
            WalletError::Signature("Missing timestamp".to_string())
        })?;
        if signatures.is_empty() {
            tracing::warn!("Webhook signature header has no v1 signature");
            return Err(WalletError::Signature("Missing v1 signature".to_string()));
        }

        let age = Utc::now().timestamp().abs_diff(timestamp);
        if age > self.tolerance.as_secs() {
            tracing::warn!(timestamp, age, "Webhook timestamp outside tolerance");
            return Err(WalletError::Signature(
                "Timestamp outside tolerance".to_string(),
            ));
        }

        let verified = signatures.iter().any(|candidate| {
            let Ok(bytes) = hex::decode(candidate) else {
                return false;
            };
            self.mac(timestamp, raw_body)
                .map(|mac| mac.verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });
        if !verified {
            tracing::warn!("Webhook signature mismatch");
            return Err(WalletError::Signature("Signature mismatch".to_string()));
        }

        GatewayEvent::from_json(raw_body)
    }
}
