use super::money::{Amount, Balance};
use super::transaction::{TransactionId, UserId};
use crate::error::WalletError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's token balance and the transactions that produced it.
///
/// Stores mutate a wallet only through [`Wallet::credit`] and [`Wallet::debit`],
/// each of which links the transaction reference in the same step as the
/// balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Balance,
    /// Applied transactions, oldest first, without duplicates.
    pub transactions: Vec<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Balance::ZERO,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        self.transactions.contains(&transaction_id)
    }

    /// Adds `amount`. Returns `false` and leaves the wallet untouched if the
    /// transaction was already applied.
    pub fn credit(&mut self, transaction_id: TransactionId, amount: Amount, now: DateTime<Utc>) -> bool {
        if self.contains(transaction_id) {
            return false;
        }
        self.balance = self.balance.credit(amount);
        self.transactions.push(transaction_id);
        self.updated_at = now;
        true
    }

    /// Subtracts `amount` if the balance covers it.
    pub fn debit(
        &mut self,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<bool, WalletError> {
        if self.contains(transaction_id) {
            return Ok(false);
        }
        let remaining = self
            .balance
            .debit(amount)
            .ok_or(WalletError::InsufficientBalance {
                required: amount.value(),
                available: self.balance.value(),
            })?;
        self.balance = remaining;
        self.transactions.push(transaction_id);
        self.updated_at = now;
        Ok(true)
    }
}
