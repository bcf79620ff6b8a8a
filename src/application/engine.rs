use super::claims::{ClaimOutcome, IdempotentApplier};
use super::ledger::{TransactionHistory, TransactionLedger};
use super::wallet::WalletBalances;
use crate::config::SettlementConfig;
use crate::domain::claim::{ClaimRecord, ClaimState};
use crate::domain::gateway::{CheckoutSession, GatewayEvent, GatewayEventKind};
use crate::domain::money::{Amount, normalize_currency};
use crate::domain::plan::{Plan, PlanId, PlanType};
use crate::domain::ports::{
    CheckoutSessionsBox, ClaimStoreBox, Inserted, PlanCatalogBox, SubscriptionActivatorBox,
    TransactionStoreBox, WalletStoreBox, WebhookVerifierBox,
};
use crate::domain::transaction::{
    Flow, NewTransaction, Transaction, TransactionId, TransactionMetadata, TransactionStatus,
    TransactionType, UserId,
};
use crate::domain::wallet::Wallet;
use crate::error::{Result, WalletError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Storage backends and external collaborators the engine drives.
pub struct EngineParts {
    pub transactions: TransactionStoreBox,
    pub wallets: WalletStoreBox,
    pub claims: ClaimStoreBox,
    pub plans: PlanCatalogBox,
    /// Without a verifier every signed webhook is refused.
    pub verifier: Option<WebhookVerifierBox>,
    pub sessions: CheckoutSessionsBox,
    pub subscriptions: SubscriptionActivatorBox,
}

/// How a webhook delivery was handled. Every variant is acknowledged to the
/// gateway so it stops redelivering.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Settled(Transaction),
    /// The event was handled before; carries the earlier transaction when one exists.
    Duplicate(Option<Transaction>),
    Ignored { event_type: String },
    /// Received but not applied; needs manual reconciliation.
    NeedsReconciliation {
        reason: String,
        transaction: Option<Transaction>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookAck {
    pub event_id: String,
    pub outcome: WebhookOutcome,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    pub amount: Decimal,
    pub currency: String,
    /// Completed transaction backing the credit. Mandatory once a wallet exists.
    #[serde(default)]
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitRequest {
    pub amount: Decimal,
    pub currency: String,
    /// Client reference making retries of the same debit safe.
    #[serde(default)]
    pub reference: Option<String>,
}

/// Wallet and transaction snapshot returned by direct credits and debits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub wallet: Wallet,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummary {
    #[serde(rename = "type")]
    pub plan_type: Option<String>,
    pub name: Option<String>,
    pub tokens: Option<String>,
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStatus {
    pub session_id: String,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub metadata: CheckoutSummary,
}

/// Fields pulled out of a completed checkout session.
struct CheckoutClaim<'a> {
    key: String,
    event_id: &'a str,
    user_id: UserId,
    plan_id: PlanId,
    plan_type: PlanType,
    session: &'a CheckoutSession,
}

/// Entry points that settle payments into the ledger and wallets.
///
/// Every path claims its idempotency key first, records a pending
/// transaction, applies the wallet effect, and only then marks the
/// transaction completed. A failure before completion releases the claim and
/// leaves the transaction pending, so a retry resumes from where it stopped.
pub struct SettlementEngine {
    ledger: TransactionLedger,
    wallets: WalletBalances,
    claims: IdempotentApplier,
    plans: PlanCatalogBox,
    verifier: Option<WebhookVerifierBox>,
    sessions: CheckoutSessionsBox,
    subscriptions: SubscriptionActivatorBox,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(parts: EngineParts, config: SettlementConfig) -> Self {
        Self {
            ledger: TransactionLedger::new(parts.transactions),
            wallets: WalletBalances::new(parts.wallets),
            claims: IdempotentApplier::new(parts.claims, &config),
            plans: parts.plans,
            verifier: parts.verifier,
            sessions: parts.sessions,
            subscriptions: parts.subscriptions,
            config,
        }
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn wallets(&self) -> &WalletBalances {
        &self.wallets
    }

    pub fn claims(&self) -> &IdempotentApplier {
        &self.claims
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Verifies the signature and settles the event. Signature failures are
    /// returned before any ledger access.
    pub async fn handle_webhook(&self, raw_body: &[u8], signature_header: &str) -> Result<WebhookAck> {
        let verifier = self.verifier.as_ref().ok_or_else(|| {
            WalletError::Signature("No webhook secret is configured".to_string())
        })?;
        let event = verifier.verify(raw_body, signature_header)?;
        self.settle_event(event).await
    }

    /// Settles an already-verified gateway event.
    pub async fn settle_event(&self, event: GatewayEvent) -> Result<WebhookAck> {
        let session = match &event.kind {
            GatewayEventKind::CheckoutSessionCompleted(session) => session,
            GatewayEventKind::Other(event_type) => {
                tracing::debug!(event_id = %event.id, event_type = %event_type, "Ignoring unhandled webhook event");
                return Ok(WebhookAck {
                    outcome: WebhookOutcome::Ignored {
                        event_type: event_type.clone(),
                    },
                    event_id: event.id,
                });
            }
        };

        let checkout = CheckoutClaim {
            key: format!("{}:{}", self.config.webhook_gateway, event.id),
            event_id: &event.id,
            user_id: session.metadata.user_id()?,
            plan_id: session.metadata.plan_id()?,
            plan_type: session.metadata.plan_type()?,
            session,
        };

        let outcome = match self.claims.claim_or_wait(&checkout.key).await? {
            ClaimOutcome::Finished(record) => self.prior_webhook_outcome(record).await?,
            ClaimOutcome::Owned { .. } => match self.settle_checkout(&checkout).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(event_id = %event.id, error = %e, "Webhook settlement failed");
                    self.claims.release(&checkout.key).await;
                    return Err(e);
                }
            },
        };

        Ok(WebhookAck {
            event_id: event.id.clone(),
            outcome,
        })
    }

    async fn prior_webhook_outcome(&self, record: ClaimRecord) -> Result<WebhookOutcome> {
        match record.state {
            ClaimState::Settled { transaction_id } => {
                let tx = self.ledger.find_by_id(transaction_id).await?;
                tracing::info!(claim = %record.key, transaction_id = %tx.id, "Duplicate webhook delivery");
                Ok(WebhookOutcome::Duplicate(Some(tx)))
            }
            ClaimState::Rejected { reason } => {
                tracing::info!(claim = %record.key, %reason, "Duplicate delivery of a rejected webhook");
                Ok(WebhookOutcome::Duplicate(None))
            }
            ClaimState::InFlight => Err(WalletError::Dependency(format!(
                "Settlement of {} is still in progress",
                record.key
            ))),
        }
    }

    async fn settle_checkout(&self, checkout: &CheckoutClaim<'_>) -> Result<WebhookOutcome> {
        let plan = match self.plans.find_plan_by_id(&checkout.plan_id).await? {
            Some(plan) if plan.is_purchasable() => plan,
            Some(_) => {
                let reason = format!("Plan {} is inactive", checkout.plan_id);
                return self.reconcile(checkout, reason, None).await;
            }
            None => {
                let reason = format!("Plan {} not found", checkout.plan_id);
                return self.reconcile(checkout, reason, None).await;
            }
        };

        let new = NewTransaction {
            user_id: checkout.user_id.clone(),
            plan_id: Some(plan.id.clone()),
            amount: match plan.plan_type {
                PlanType::WalletRecharge => plan.tokens,
                PlanType::OneTime | PlanType::Subscription => plan.price,
            },
            currency: plan.currency.clone(),
            transaction_type: plan.plan_type.into(),
            flow: Flow::Credit,
            gateway: self.config.webhook_gateway,
            metadata: TransactionMetadata {
                session_id: Some(checkout.session.id.clone()),
                event_id: Some(checkout.event_id.to_string()),
                external_key: Some(checkout.event_id.to_string()),
                gateway_amount: checkout.session.amount(),
                gateway_currency: checkout.session.currency_code(),
                failure_reason: None,
            },
        };

        let tx = match self.ledger.record_pending(new).await {
            Ok(Inserted::Created(tx)) => tx,
            Ok(Inserted::Existing(tx)) => match tx.status {
                TransactionStatus::Pending => {
                    tracing::info!(transaction_id = %tx.id, "Resuming interrupted settlement");
                    tx
                }
                TransactionStatus::Completed => {
                    self.claims.settle(&checkout.key, tx.id).await?;
                    return Ok(WebhookOutcome::Duplicate(Some(tx)));
                }
                TransactionStatus::Failed => {
                    let reason = tx.metadata.failure_reason.clone().unwrap_or_default();
                    return self.reconcile(checkout, reason, Some(tx)).await;
                }
            },
            Err(WalletError::Validation(reason)) => {
                return self.reconcile(checkout, reason, None).await;
            }
            Err(e) => return Err(e),
        };

        if let Some(reason) = mismatch(&plan, checkout) {
            let tx = self.ledger.mark_failed(tx.id, reason.clone()).await?;
            return self.reconcile(checkout, reason, Some(tx)).await;
        }

        match plan.plan_type {
            PlanType::WalletRecharge => {
                self.wallets
                    .apply_credit(&tx.user_id, tx.id, tx.amount)
                    .await?;
            }
            PlanType::OneTime | PlanType::Subscription => {}
        }
        let tx = self.ledger.mark_completed(tx.id).await?;

        if plan.plan_type == PlanType::Subscription
            && let Err(e) = self.subscriptions.activate(&tx.user_id, &plan, tx.id).await
        {
            tracing::error!(
                user_id = %tx.user_id,
                plan_id = %plan.id,
                transaction_id = %tx.id,
                error = %e,
                "Subscription activation failed"
            );
        }
        self.claims.settle(&checkout.key, tx.id).await?;

        tracing::info!(
            event_id = checkout.event_id,
            user_id = %tx.user_id,
            transaction_id = %tx.id,
            plan_type = %plan.plan_type,
            "Checkout settled"
        );
        Ok(WebhookOutcome::Settled(tx))
    }

    /// Acknowledges the delivery without applying it and flags it for
    /// manual follow-up.
    async fn reconcile(
        &self,
        checkout: &CheckoutClaim<'_>,
        reason: String,
        transaction: Option<Transaction>,
    ) -> Result<WebhookOutcome> {
        tracing::warn!(
            event_id = checkout.event_id,
            user_id = %checkout.user_id,
            plan_id = %checkout.plan_id,
            %reason,
            "Webhook needs manual reconciliation"
        );
        self.claims.reject(&checkout.key, reason.clone()).await?;
        Ok(WebhookOutcome::NeedsReconciliation {
            reason,
            transaction,
        })
    }

    /// Credits a wallet from a trusted caller.
    ///
    /// Without a transaction id this only creates a new wallet. An existing
    /// wallet is credited only from a completed credit transaction owned by
    /// the same user.
    pub async fn credit(&self, user_id: &UserId, request: CreditRequest) -> Result<Receipt> {
        let amount = Amount::new(request.amount)?;
        let currency = normalize_currency(&request.currency)?;
        match request.transaction_id {
            Some(transaction_id) => {
                self.credit_from_transaction(user_id, transaction_id, amount, currency)
                    .await
            }
            None => self.credit_new_wallet(user_id, amount, currency).await,
        }
    }

    async fn credit_new_wallet(&self, user_id: &UserId, amount: Amount, currency: String) -> Result<Receipt> {
        let key = format!("open:{user_id}");
        match self.claims.claim_or_wait(&key).await? {
            ClaimOutcome::Finished(_) => return Err(wallet_exists()),
            ClaimOutcome::Owned { .. } => {}
        }

        match self.open_wallet(user_id, amount, currency, &key).await {
            Ok(Some(receipt)) => {
                self.claims.settle(&key, receipt.transaction.id).await?;
                Ok(receipt)
            }
            Ok(None) => {
                self.claims.reject(&key, "Wallet already exists").await?;
                Err(wallet_exists())
            }
            Err(e) => {
                self.claims.release(&key).await;
                Err(e)
            }
        }
    }

    /// Records the opening credit under a fixed external key and creates the
    /// wallet with it. A retry after a partial failure finds the same pending
    /// transaction and finishes it. Returns `None` when the wallet already
    /// exists.
    async fn open_wallet(
        &self,
        user_id: &UserId,
        amount: Amount,
        currency: String,
        key: &str,
    ) -> Result<Option<Receipt>> {
        let inserted = self
            .ledger
            .record_pending(NewTransaction {
                user_id: user_id.clone(),
                plan_id: None,
                amount: amount.value(),
                currency: currency.clone(),
                transaction_type: TransactionType::WalletRecharge,
                flow: Flow::Credit,
                gateway: self.config.internal_gateway,
                metadata: TransactionMetadata {
                    external_key: Some(key.to_string()),
                    ..TransactionMetadata::default()
                },
            })
            .await?;
        let tx = match inserted {
            Inserted::Created(tx) => tx,
            Inserted::Existing(tx) if tx.status == TransactionStatus::Pending => {
                if tx.amount != amount || tx.currency != currency {
                    return Err(WalletError::Validation(format!(
                        "Opening credit {} is pending for {} {}",
                        tx.id, tx.amount, tx.currency
                    )));
                }
                tracing::info!(transaction_id = %tx.id, user_id = %user_id, "Resuming interrupted wallet opening");
                tx
            }
            Inserted::Existing(_) => return Ok(None),
        };

        let wallet = match self.wallets.get(user_id).await? {
            Some(wallet) if wallet.contains(tx.id) => wallet,
            Some(_) => {
                self.ledger.mark_failed(tx.id, "Wallet already exists").await?;
                return Ok(None);
            }
            None => match self.wallets.create_with_credit(user_id, tx.id, tx.amount).await? {
                Some(wallet) => wallet,
                None => {
                    self.ledger
                        .mark_failed(tx.id, "Wallet was created concurrently")
                        .await?;
                    return Ok(None);
                }
            },
        };
        let transaction = self.ledger.mark_completed(tx.id).await?;
        Ok(Some(Receipt { wallet, transaction }))
    }

    async fn credit_from_transaction(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        currency: String,
    ) -> Result<Receipt> {
        let key = format!("credit:{transaction_id}");
        match self.claims.claim_or_wait(&key).await? {
            ClaimOutcome::Finished(_) => {
                let transaction = self.ledger.find_by_id(transaction_id).await?;
                if transaction.user_id != *user_id {
                    return Err(WalletError::Forbidden(format!(
                        "Transaction {transaction_id} belongs to another user"
                    )));
                }
                let wallet = self.wallet(user_id).await?;
                tracing::debug!(transaction_id = %transaction_id, "Credit already applied");
                return Ok(Receipt { wallet, transaction });
            }
            ClaimOutcome::Owned { .. } => {}
        }

        match self
            .apply_referenced_credit(user_id, transaction_id, amount, &currency)
            .await
        {
            Ok(receipt) => {
                self.claims.settle(&key, transaction_id).await?;
                Ok(receipt)
            }
            Err(e) => {
                self.claims.release(&key).await;
                Err(e)
            }
        }
    }

    async fn apply_referenced_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        currency: &str,
    ) -> Result<Receipt> {
        let tx = self.ledger.find_by_id(transaction_id).await?;
        if tx.user_id != *user_id {
            return Err(WalletError::Forbidden(format!(
                "Transaction {transaction_id} belongs to another user"
            )));
        }
        if !tx.is_completed() || tx.flow != Flow::Credit {
            return Err(WalletError::Validation(format!(
                "Transaction {transaction_id} is not a completed credit"
            )));
        }
        // Purchases carry a price, not tokens.
        if tx.transaction_type != TransactionType::WalletRecharge {
            return Err(WalletError::Validation(format!(
                "Transaction {transaction_id} is a {:?} purchase, not a wallet recharge",
                tx.transaction_type
            )));
        }
        if tx.amount != amount || tx.currency != currency {
            return Err(WalletError::Validation(format!(
                "Credit of {amount} {currency} does not match transaction {transaction_id}"
            )));
        }

        let wallet = self.wallets.apply_credit(user_id, tx.id, tx.amount).await?;
        Ok(Receipt {
            wallet,
            transaction: tx,
        })
    }

    /// Spends from a wallet. With a reference, retries of the same debit
    /// return the first outcome instead of spending twice.
    pub async fn debit(&self, user_id: &UserId, request: DebitRequest) -> Result<Receipt> {
        let amount = Amount::new(request.amount)?;
        let currency = normalize_currency(&request.currency)?;
        let reference = request
            .reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let Some(reference) = reference else {
            return self.spend(user_id, amount, currency, None).await;
        };

        let key = format!("debit:{user_id}:{reference}");
        match self.claims.claim_or_wait(&key).await? {
            ClaimOutcome::Finished(record) => return self.prior_debit(user_id, record).await,
            ClaimOutcome::Owned { .. } => {}
        }

        match self.spend(user_id, amount, currency, Some(&reference)).await {
            Ok(receipt) => {
                self.claims.settle(&key, receipt.transaction.id).await?;
                Ok(receipt)
            }
            Err(e @ WalletError::InsufficientBalance { .. }) => {
                self.claims.reject(&key, e.to_string()).await?;
                Err(e)
            }
            Err(e) => {
                self.claims.release(&key).await;
                Err(e)
            }
        }
    }

    async fn spend(
        &self,
        user_id: &UserId,
        amount: Amount,
        currency: String,
        reference: Option<&str>,
    ) -> Result<Receipt> {
        if self.wallets.get(user_id).await?.is_none() {
            return Err(WalletError::NotFound(format!("Wallet for user {user_id}")));
        }

        let inserted = self
            .ledger
            .record_pending(NewTransaction {
                user_id: user_id.clone(),
                plan_id: None,
                amount: amount.value(),
                currency,
                transaction_type: TransactionType::Debit,
                flow: Flow::Debit,
                gateway: self.config.internal_gateway,
                metadata: TransactionMetadata {
                    external_key: reference.map(|r| format!("debit:{user_id}:{r}")),
                    ..TransactionMetadata::default()
                },
            })
            .await?;
        let tx = match inserted {
            Inserted::Created(tx) => tx,
            Inserted::Existing(tx) if tx.status == TransactionStatus::Failed => {
                return Err(WalletError::Validation(format!(
                    "Debit {} was already rejected",
                    tx.id
                )));
            }
            Inserted::Existing(tx) => tx,
        };

        let wallet = match self.wallets.apply_debit(user_id, tx.id, tx.amount).await {
            Ok(wallet) => wallet,
            Err(e @ WalletError::InsufficientBalance { .. }) => {
                self.ledger.mark_failed(tx.id, e.to_string()).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let transaction = self.ledger.mark_completed(tx.id).await?;
        Ok(Receipt { wallet, transaction })
    }

    async fn prior_debit(&self, user_id: &UserId, record: ClaimRecord) -> Result<Receipt> {
        match record.state {
            ClaimState::Settled { transaction_id } => {
                let transaction = self.ledger.find_by_id(transaction_id).await?;
                let wallet = self.wallet(user_id).await?;
                tracing::debug!(claim = %record.key, "Debit already applied");
                Ok(Receipt { wallet, transaction })
            }
            ClaimState::Rejected { reason } => Err(WalletError::Validation(format!(
                "Debit was already rejected: {reason}"
            ))),
            ClaimState::InFlight => Err(WalletError::Dependency(format!(
                "Debit {} is still in progress",
                record.key
            ))),
        }
    }

    /// Read-only view of a checkout session for the user who started it.
    pub async fn verify_checkout(&self, requester: &UserId, session_id: &str) -> Result<CheckoutStatus> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("Checkout session {session_id}")))?;

        if session.metadata.get("userId") != Some(requester.0.as_str()) {
            tracing::warn!(user_id = %requester, session_id, "Checkout session owned by another user");
            return Err(WalletError::Forbidden(format!(
                "Checkout session {session_id} belongs to another user"
            )));
        }

        let field = |name: &str| session.metadata.get(name).map(str::to_string);
        Ok(CheckoutStatus {
            session_id: session.id.clone(),
            status: session.status.clone(),
            payment_status: session.payment_status.clone(),
            metadata: CheckoutSummary {
                plan_type: field("type"),
                name: field("name"),
                tokens: field("tokens"),
                plan_id: field("planId"),
            },
        })
    }

    pub async fn wallet(&self, user_id: &UserId) -> Result<Wallet> {
        self.wallets
            .get(user_id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("Wallet for user {user_id}")))
    }

    /// The user's transactions, newest first.
    pub fn transactions(&self, user_id: &UserId) -> TransactionHistory<'_> {
        self.ledger
            .list_for_user(user_id, self.config.history_page_size)
    }

    /// A single transaction, visible only to its owner.
    pub async fn transaction(&self, user_id: &UserId, id: TransactionId) -> Result<Transaction> {
        let tx = self.ledger.find_by_id(id).await?;
        if tx.user_id != *user_id {
            return Err(WalletError::NotFound(format!("Transaction {id}")));
        }
        Ok(tx)
    }

    /// Final state of every wallet.
    pub async fn into_results(self) -> Result<Vec<Wallet>> {
        self.wallets.all().await
    }
}

fn wallet_exists() -> WalletError {
    WalletError::Validation(
        "A completed transaction id is required to credit an existing wallet".to_string(),
    )
}

/// Compares what the gateway charged against the plan.
fn mismatch(plan: &Plan, checkout: &CheckoutClaim<'_>) -> Option<String> {
    if plan.plan_type != checkout.plan_type {
        return Some(format!(
            "Session type {} does not match plan type {}",
            checkout.plan_type, plan.plan_type
        ));
    }
    match (checkout.session.amount(), checkout.session.currency_code()) {
        (Some(amount), Some(currency)) if plan.charges(amount, &currency) => None,
        (Some(amount), Some(currency)) => Some(format!(
            "Gateway charged {amount} {currency}, plan {} costs {} {}",
            plan.id, plan.price, plan.currency
        )),
        _ => Some("Gateway session has no amount or currency".to_string()),
    }
}
