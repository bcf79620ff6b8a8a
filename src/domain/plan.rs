use crate::error::WalletError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub String);

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlanId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What a purchase of the plan grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanType {
    OneTime,
    Subscription,
    WalletRecharge,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::OneTime => "one-time",
            PlanType::Subscription => "subscription",
            PlanType::WalletRecharge => "wallet-recharge",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "one-time" => Ok(PlanType::OneTime),
            "subscription" => Ok(PlanType::Subscription),
            "wallet-recharge" => Ok(PlanType::WalletRecharge),
            other => Err(WalletError::Validation(format!(
                "Unknown plan type '{other}'"
            ))),
        }
    }
}

/// Catalog entry, read-only to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    #[serde(rename = "type")]
    pub plan_type: PlanType,
    /// Tokens granted on purchase.
    pub tokens: Decimal,
    pub price: Decimal,
    pub currency: String,
    /// Validity in days for subscription plans.
    #[serde(default)]
    pub validity_period: Option<u32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Plan {
    /// Inactive plans are never purchasable.
    pub fn is_purchasable(&self) -> bool {
        self.is_active
    }

    pub fn charges(&self, amount: Decimal, currency: &str) -> bool {
        self.price == amount && self.currency.eq_ignore_ascii_case(currency)
    }
}
