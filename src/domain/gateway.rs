use super::plan::{PlanId, PlanType};
use super::transaction::UserId;
use crate::error::WalletError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// Key/value metadata attached to a checkout session when it was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionMetadata(pub HashMap<String, String>);

impl SessionMetadata {
    fn required(&self, field: &str) -> Result<&str, WalletError> {
        self.0
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| WalletError::Validation(format!("Session metadata is missing '{field}'")))
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn user_id(&self) -> Result<UserId, WalletError> {
        self.required("userId").map(UserId::from)
    }

    pub fn plan_id(&self) -> Result<PlanId, WalletError> {
        self.required("planId").map(PlanId::from)
    }

    pub fn plan_type(&self) -> Result<PlanType, WalletError> {
        self.required("type")?.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Charged amount in minor units.
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl CheckoutSession {
    /// Charged amount converted to major units.
    pub fn amount(&self) -> Option<Decimal> {
        self.amount_total.map(|minor| Decimal::new(minor, 2))
    }

    pub fn currency_code(&self) -> Option<String> {
        self.currency.as_ref().map(|c| c.to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEventKind {
    CheckoutSessionCompleted(CheckoutSession),
    Other(String),
}

/// A verified notification from the payment gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub id: String,
    pub kind: GatewayEventKind,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<RawEventData>,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

impl GatewayEvent {
    pub fn event_type(&self) -> &str {
        match &self.kind {
            GatewayEventKind::CheckoutSessionCompleted(_) => CHECKOUT_SESSION_COMPLETED,
            GatewayEventKind::Other(event_type) => event_type,
        }
    }

    /// Parses the gateway's JSON envelope (`id`, `type`, `data.object`).
    pub fn from_json(payload: &[u8]) -> Result<Self, WalletError> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| WalletError::Validation(format!("Malformed webhook payload: {e}")))?;

        let kind = if raw.event_type == CHECKOUT_SESSION_COMPLETED {
            let object = raw
                .data
                .ok_or_else(|| WalletError::Validation("Webhook event has no data".to_string()))?
                .object;
            let session = serde_json::from_value(object).map_err(|e| {
                WalletError::Validation(format!("Malformed checkout session: {e}"))
            })?;
            GatewayEventKind::CheckoutSessionCompleted(session)
        } else {
            GatewayEventKind::Other(raw.event_type)
        };

        Ok(Self { id: raw.id, kind })
    }
}
