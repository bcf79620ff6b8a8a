use super::claim::{ClaimAttempt, ClaimRecord, ClaimState};
use super::gateway::{CheckoutSession, GatewayEvent};
use super::money::Amount;
use super::plan::{Plan, PlanId};
use super::transaction::{Transaction, TransactionId, TransactionStatus, UserId};
use super::wallet::Wallet;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of inserting into the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted {
    Created(Transaction),
    /// A transaction with the same `(gateway, external_key)` already exists.
    Existing(Transaction),
}

/// Result of a status compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Transaction),
    /// The transaction was already terminal; carries its current state.
    AlreadyTerminal(Transaction),
}

impl Transition {
    pub fn into_transaction(self) -> Transaction {
        match self {
            Transition::Applied(tx) | Transition::AlreadyTerminal(tx) => tx,
        }
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: Transaction) -> Result<Inserted>;
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;
    /// Atomically moves a `Pending` transaction to `to`.
    async fn transition(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition>;
    /// Newest first, strictly older than `before` when given.
    async fn page_for_user(
        &self,
        user_id: &UserId,
        before: Option<TransactionId>,
        limit: usize,
    ) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> Result<Option<Wallet>>;
    async fn get_or_create(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Wallet>;
    /// Creates the wallet holding its first credit, or returns `None` if it already exists.
    async fn create_with_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>>;
    /// Upserts the wallet, adds `amount` and links the transaction in one step.
    async fn apply_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Wallet>;
    /// Subtracts `amount` only if the balance covers it.
    async fn apply_debit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Wallet>;
    async fn all(&self) -> Result<Vec<Wallet>>;
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Inserts an in-flight claim unless one exists. A stale in-flight claim
    /// (claimed before `stale_before`) is replaced.
    async fn try_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimAttempt>;
    async fn settle(&self, key: &str, state: ClaimState, now: DateTime<Utc>) -> Result<()>;
    /// Drops an in-flight claim so a later delivery can retry.
    async fn release(&self, key: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<ClaimRecord>>;
}

#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn find_plan_by_id(&self, id: &PlanId) -> Result<Option<Plan>>;
}

pub trait WebhookVerifier: Send + Sync {
    fn verify(&self, raw_body: &[u8], signature_header: &str) -> Result<GatewayEvent>;
}

#[async_trait]
pub trait CheckoutSessions: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<CheckoutSession>>;
}

#[async_trait]
pub trait SubscriptionActivator: Send + Sync {
    async fn activate(
        &self,
        user_id: &UserId,
        plan: &Plan,
        evidence: TransactionId,
    ) -> Result<()>;
}

pub type TransactionStoreBox = Box<dyn TransactionStore>;
pub type WalletStoreBox = Box<dyn WalletStore>;
pub type ClaimStoreBox = Box<dyn ClaimStore>;
pub type PlanCatalogBox = Box<dyn PlanCatalog>;
pub type WebhookVerifierBox = Box<dyn WebhookVerifier>;
pub type CheckoutSessionsBox = Box<dyn CheckoutSessions>;
pub type SubscriptionActivatorBox = Box<dyn SubscriptionActivator>;
