use crate::domain::ports::{Inserted, TransactionStore, TransactionStoreBox, Transition};
use crate::domain::transaction::{
    NewTransaction, Transaction, TransactionId, TransactionStatus, UserId,
};
use crate::error::{Result, WalletError};
use chrono::Utc;
use std::collections::VecDeque;

/// Append-oriented record of every credit and debit attempt.
pub struct TransactionLedger {
    store: TransactionStoreBox,
}

impl TransactionLedger {
    pub fn new(store: TransactionStoreBox) -> Self {
        Self { store }
    }

    /// Validates and inserts a `Pending` transaction.
    ///
    /// When the transaction carries an external key that is already recorded
    /// for the same gateway, the existing record is returned instead.
    pub async fn record_pending(&self, new: NewTransaction) -> Result<Inserted> {
        let tx = new.into_pending(Utc::now())?;
        let inserted = self.store.insert(tx).await?;
        match &inserted {
            Inserted::Created(tx) => tracing::debug!(
                transaction_id = %tx.id,
                user_id = %tx.user_id,
                amount = %tx.amount,
                flow = ?tx.flow,
                "Recorded pending transaction"
            ),
            Inserted::Existing(tx) => tracing::debug!(
                transaction_id = %tx.id,
                status = %tx.status,
                "External key already recorded"
            ),
        }
        Ok(inserted)
    }

    pub async fn mark_completed(&self, id: TransactionId) -> Result<Transaction> {
        self.finish(id, TransactionStatus::Completed, None).await
    }

    pub async fn mark_failed(&self, id: TransactionId, reason: impl Into<String>) -> Result<Transaction> {
        self.finish(id, TransactionStatus::Failed, Some(reason.into()))
            .await
    }

    /// Terminal transactions are returned unchanged rather than rejected;
    /// a second completion is almost always a retry.
    async fn finish(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        reason: Option<String>,
    ) -> Result<Transaction> {
        match self.store.transition(id, to, reason, Utc::now()).await? {
            Transition::Applied(tx) => Ok(tx),
            Transition::AlreadyTerminal(tx) => {
                tracing::debug!(
                    transaction_id = %id,
                    status = %tx.status,
                    requested = %to,
                    "Transaction already terminal"
                );
                Ok(tx)
            }
        }
    }

    pub async fn find_by_id(&self, id: TransactionId) -> Result<Transaction> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| WalletError::NotFound(format!("Transaction {id}")))
    }

    /// Lazily walks the user's transactions, newest first.
    pub fn list_for_user(&self, user_id: &UserId, page_size: usize) -> TransactionHistory<'_> {
        TransactionHistory::new(self.store.as_ref(), user_id.clone(), page_size)
    }
}

/// Restartable cursor over one user's transactions, fetched page by page.
pub struct TransactionHistory<'a> {
    store: &'a dyn TransactionStore,
    user_id: UserId,
    page_size: usize,
    buffer: VecDeque<Transaction>,
    cursor: Option<TransactionId>,
    exhausted: bool,
}

impl<'a> TransactionHistory<'a> {
    fn new(store: &'a dyn TransactionStore, user_id: UserId, page_size: usize) -> Self {
        Self {
            store,
            user_id,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Transaction>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .store
                .page_for_user(&self.user_id, self.cursor, self.page_size)
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.cursor = Some(last.id);
            }
            self.buffer.extend(page);
        }
        Ok(self.buffer.pop_front())
    }

    /// Starts again from the newest transaction.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.cursor = None;
        self.exhausted = false;
    }

    pub async fn try_collect(mut self) -> Result<Vec<Transaction>> {
        let mut all = Vec::new();
        while let Some(tx) = self.next().await? {
            all.push(tx);
        }
        Ok(all)
    }
}
