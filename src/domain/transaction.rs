use super::money::{Amount, normalize_currency};
use super::plan::{PlanId, PlanType};
use crate::error::WalletError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| WalletError::Validation(format!("Invalid transaction id '{s}': {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    OneTime,
    Subscription,
    WalletRecharge,
    Debit,
}

impl From<PlanType> for TransactionType {
    fn from(plan_type: PlanType) -> Self {
        match plan_type {
            PlanType::OneTime => TransactionType::OneTime,
            PlanType::Subscription => TransactionType::Subscription,
            PlanType::WalletRecharge => TransactionType::WalletRecharge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    Credit,
    Debit,
}

impl TransactionType {
    /// Debits pair only with the debit flow; every purchase type is a credit.
    pub fn allows(&self, flow: Flow) -> bool {
        matches!(
            (self, flow),
            (TransactionType::OneTime, Flow::Credit)
                | (TransactionType::Subscription, Flow::Credit)
                | (TransactionType::WalletRecharge, Flow::Credit)
                | (TransactionType::Debit, Flow::Debit)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentGateway {
    Stripe,
    Razorpay,
    System,
}

impl PaymentGateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentGateway::Stripe => "stripe",
            PaymentGateway::Razorpay => "razorpay",
            PaymentGateway::System => "system",
        }
    }
}

impl fmt::Display for PaymentGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentGateway {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(PaymentGateway::Stripe),
            "razorpay" => Ok(PaymentGateway::Razorpay),
            "system" => Ok(PaymentGateway::System),
            other => Err(WalletError::Validation(format!(
                "Unknown payment gateway '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Opaque gateway bookkeeping carried alongside a transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Key deduplicating this transaction per gateway (event id, client reference).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Input to the ledger before validation.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub plan_id: Option<PlanId>,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub flow: Flow,
    pub gateway: PaymentGateway,
    pub metadata: TransactionMetadata,
}

impl NewTransaction {
    /// Validates the request and builds a `Pending` transaction.
    pub fn into_pending(self, now: DateTime<Utc>) -> Result<Transaction, WalletError> {
        let amount = Amount::new(self.amount)?;
        let currency = normalize_currency(&self.currency)?;
        if !self.transaction_type.allows(self.flow) {
            return Err(WalletError::Validation(format!(
                "Transaction type {:?} cannot use the {:?} flow",
                self.transaction_type, self.flow
            )));
        }
        if self.user_id.0.trim().is_empty() {
            return Err(WalletError::Validation("User id is required".to_string()));
        }

        Ok(Transaction {
            id: TransactionId::new(),
            user_id: self.user_id,
            plan_id: self.plan_id,
            amount,
            currency,
            transaction_type: self.transaction_type,
            flow: self.flow,
            gateway: self.gateway,
            status: TransactionStatus::Pending,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A single credit or debit attempt and its outcome.
///
/// The amount is always positive; `flow` carries the direction. Once the
/// status is terminal the record never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<PlanId>,
    pub amount: Amount,
    pub currency: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub flow: Flow,
    pub gateway: PaymentGateway,
    pub status: TransactionStatus,
    #[serde(default)]
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Moves a pending transaction to a terminal status.
    pub fn transition(
        &mut self,
        to: TransactionStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), WalletError> {
        if !to.is_terminal() {
            return Err(WalletError::Validation(
                "Transactions can only move to a terminal status".to_string(),
            ));
        }
        if self.status.is_terminal() {
            return Err(WalletError::InvalidState(format!(
                "Transaction {} is already {}",
                self.id, self.status
            )));
        }
        self.status = to;
        if reason.is_some() {
            self.metadata.failure_reason = reason;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    /// Balance effect of this transaction once applied to a wallet.
    pub fn signed_amount(&self) -> Decimal {
        match self.flow {
            Flow::Credit => self.amount.value(),
            Flow::Debit => -self.amount.value(),
        }
    }

    pub fn external_key(&self) -> Option<&str> {
        self.metadata.external_key.as_deref()
    }
}
