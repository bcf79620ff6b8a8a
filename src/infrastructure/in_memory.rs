use crate::domain::claim::{ClaimAttempt, ClaimRecord, ClaimState};
use crate::domain::gateway::CheckoutSession;
use crate::domain::money::Amount;
use crate::domain::plan::{Plan, PlanId};
use crate::domain::ports::{
    CheckoutSessions, ClaimStore, Inserted, PlanCatalog, SubscriptionActivator, TransactionStore,
    Transition, WalletStore,
};
use crate::domain::transaction::{
    PaymentGateway, Transaction, TransactionId, TransactionStatus, UserId,
};
use crate::domain::wallet::Wallet;
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Ledger {
    by_id: HashMap<TransactionId, Transaction>,
    by_external_key: HashMap<(PaymentGateway, String), TransactionId>,
    /// Per-user ids ordered by `created_at`, oldest first; equal stamps keep arrival order.
    by_user: HashMap<UserId, Vec<TransactionId>>,
}

/// A thread-safe in-memory ledger.
///
/// Every operation takes the write lock for its whole check-and-mutate step,
/// which is what makes `insert` and `transition` atomic.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryTransactionStore {
    /// Creates a new, empty in-memory transaction store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<Inserted> {
        let mut ledger = self.ledger.write().await;

        if ledger.by_id.contains_key(&tx.id) {
            return Err(WalletError::InvalidState(format!(
                "Transaction {} already exists",
                tx.id
            )));
        }

        if let Some(key) = tx.external_key() {
            let unique = (tx.gateway, key.to_string());
            if let Some(existing) = ledger.by_external_key.get(&unique) {
                let existing = ledger.by_id[existing].clone();
                return Ok(Inserted::Existing(existing));
            }
            ledger.by_external_key.insert(unique, tx.id);
        }

        let Ledger { by_id, by_user, .. } = &mut *ledger;
        let ids = by_user.entry(tx.user_id.clone()).or_default();
        // created_at is stamped before the lock is taken, so arrival order can differ.
        let position = ids.partition_point(|id| {
            by_id
                .get(id)
                .is_some_and(|other| other.created_at <= tx.created_at)
        });
        ids.insert(position, tx.id);
        by_id.insert(tx.id, tx.clone());
        Ok(Inserted::Created(tx))
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.by_id.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let mut ledger = self.ledger.write().await;
        let tx = ledger
            .by_id
            .get_mut(&id)
            .ok_or_else(|| WalletError::NotFound(format!("Transaction {id}")))?;

        match tx.transition(to, reason, now) {
            Ok(()) => Ok(Transition::Applied(tx.clone())),
            Err(WalletError::InvalidState(_)) => Ok(Transition::AlreadyTerminal(tx.clone())),
            Err(e) => Err(e),
        }
    }

    async fn page_for_user(
        &self,
        user_id: &UserId,
        before: Option<TransactionId>,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let ledger = self.ledger.read().await;
        let Some(ids) = ledger.by_user.get(user_id) else {
            return Ok(Vec::new());
        };

        let end = match before {
            Some(cursor) => match ids.iter().position(|id| *id == cursor) {
                Some(pos) => pos,
                None => return Ok(Vec::new()),
            },
            None => ids.len(),
        };

        Ok(ids[..end]
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| ledger.by_id.get(id).cloned())
            .collect())
    }
}

/// A thread-safe in-memory wallet store keyed uniquely by user.
#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    wallets: Arc<RwLock<HashMap<UserId, Wallet>>>,
}

impl InMemoryWalletStore {
    /// Creates a new, empty in-memory wallet store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(user_id).cloned())
    }

    async fn get_or_create(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .entry(user_id.clone())
            .or_insert_with(|| Wallet::new(user_id.clone(), now));
        Ok(wallet.clone())
    }

    async fn create_with_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>> {
        let mut wallets = self.wallets.write().await;
        if wallets.contains_key(user_id) {
            return Ok(None);
        }
        let mut wallet = Wallet::new(user_id.clone(), now);
        wallet.credit(transaction_id, amount, now);
        wallets.insert(user_id.clone(), wallet.clone());
        Ok(Some(wallet))
    }

    async fn apply_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .entry(user_id.clone())
            .or_insert_with(|| Wallet::new(user_id.clone(), now));
        wallet.credit(transaction_id, amount, now);
        Ok(wallet.clone())
    }

    async fn apply_debit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .get_mut(user_id)
            .ok_or_else(|| WalletError::NotFound(format!("Wallet for user {user_id}")))?;
        wallet.debit(transaction_id, amount, now)?;
        Ok(wallet.clone())
    }

    async fn all(&self) -> Result<Vec<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.values().cloned().collect())
    }
}

/// In-memory idempotency claims; the map key is the uniqueness constraint.
#[derive(Default, Clone)]
pub struct InMemoryClaimStore {
    claims: Arc<RwLock<HashMap<String, ClaimRecord>>>,
}

impl InMemoryClaimStore {
    /// Creates a new in-memory claim store with no claims.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn try_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimAttempt> {
        let mut claims = self.claims.write().await;
        let taken_over = match claims.get(key) {
            Some(existing) if !existing.is_stale(stale_before) => {
                return Ok(ClaimAttempt::Held(existing.clone()));
            }
            Some(_) => true,
            None => false,
        };
        claims.insert(key.to_string(), ClaimRecord::in_flight(key, now));
        Ok(ClaimAttempt::Acquired { taken_over })
    }

    async fn settle(&self, key: &str, state: ClaimState, now: DateTime<Utc>) -> Result<()> {
        let mut claims = self.claims.write().await;
        let record = claims
            .entry(key.to_string())
            .or_insert_with(|| ClaimRecord::in_flight(key, now));
        record.state = state;
        record.updated_at = now;
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut claims = self.claims.write().await;
        if claims
            .get(key)
            .is_some_and(|record| record.state == ClaimState::InFlight)
        {
            claims.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ClaimRecord>> {
        let claims = self.claims.read().await;
        Ok(claims.get(key).cloned())
    }
}

/// Plan catalog backed by a map, loaded up front.
#[derive(Default, Clone)]
pub struct InMemoryPlanCatalog {
    plans: Arc<RwLock<HashMap<PlanId, Plan>>>,
}

impl InMemoryPlanCatalog {
    /// Creates an empty plan catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding `plans`, keyed by plan id.
    pub fn with_plans(plans: impl IntoIterator<Item = Plan>) -> Self {
        let map = plans.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            plans: Arc::new(RwLock::new(map)),
        }
    }

    /// Adds or replaces a plan.
    pub async fn insert(&self, plan: Plan) {
        self.plans.write().await.insert(plan.id.clone(), plan);
    }

    /// Every plan in the catalog, in no particular order.
    pub async fn all(&self) -> Vec<Plan> {
        self.plans.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl PlanCatalog for InMemoryPlanCatalog {
    async fn find_plan_by_id(&self, id: &PlanId) -> Result<Option<Plan>> {
        Ok(self.plans.read().await.get(id).cloned())
    }
}

/// Checkout sessions the gateway would return, keyed by session id.
#[derive(Default, Clone)]
pub struct InMemoryCheckoutSessions {
    sessions: Arc<RwLock<HashMap<String, CheckoutSession>>>,
}

impl InMemoryCheckoutSessions {
    /// Creates an empty session lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session so it can be looked up by id.
    pub async fn insert(&self, session: CheckoutSession) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }
}

#[async_trait]
impl CheckoutSessions for InMemoryCheckoutSessions {
    async fn get_session(&self, session_id: &str) -> Result<Option<CheckoutSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }
}

/// One call made to the subscription activator.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub evidence: TransactionId,
}

/// Subscription collaborator that only records what it was asked to activate.
#[derive(Default, Clone)]
pub struct RecordingSubscriptionActivator {
    activations: Arc<RwLock<Vec<Activation>>>,
}

impl RecordingSubscriptionActivator {
    /// Creates an activator with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activations requested so far, oldest first.
    pub async fn activations(&self) -> Vec<Activation> {
        self.activations.read().await.clone()
    }
}

#[async_trait]
impl SubscriptionActivator for RecordingSubscriptionActivator {
    async fn activate(&self, user_id: &UserId, plan: &Plan, evidence: TransactionId) -> Result<()> {
        self.activations.write().await.push(Activation {
            user_id: user_id.clone(),
            plan_id: plan.id.clone(),
            evidence,
        });
        Ok(())
    }
}
