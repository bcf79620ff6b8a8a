use crate::domain::money::Amount;
use crate::domain::ports::WalletStoreBox;
use crate::domain::transaction::{TransactionId, UserId};
use crate::domain::wallet::Wallet;
use crate::error::{Result, WalletError};
use chrono::Utc;

/// Per-user balances, changed only through the store's atomic credit and
/// debit primitives.
pub struct WalletBalances {
    store: WalletStoreBox,
}

impl WalletBalances {
    pub fn new(store: WalletStoreBox) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        self.store.get(user_id).await
    }

    pub async fn get_or_create(&self, user_id: &UserId) -> Result<Wallet> {
        self.store.get_or_create(user_id, Utc::now()).await
    }

    /// Creates the wallet together with its first credit. `None` means a
    /// wallet already existed and nothing changed.
    pub async fn create_with_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
    ) -> Result<Option<Wallet>> {
        let created = self
            .store
            .create_with_credit(user_id, transaction_id, amount, Utc::now())
            .await?;
        if created.is_some() {
            tracing::info!(user_id = %user_id, transaction_id = %transaction_id, %amount, "Wallet created");
        }
        Ok(created)
    }

    pub async fn apply_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
    ) -> Result<Wallet> {
        let wallet = self
            .store
            .apply_credit(user_id, transaction_id, amount, Utc::now())
            .await?;
        tracing::info!(
            user_id = %user_id,
            transaction_id = %transaction_id,
            %amount,
            balance = %wallet.balance,
            "Wallet credited"
        );
        Ok(wallet)
    }

    pub async fn apply_debit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
    ) -> Result<Wallet> {
        match self
            .store
            .apply_debit(user_id, transaction_id, amount, Utc::now())
            .await
        {
            Ok(wallet) => {
                tracing::info!(
                    user_id = %user_id,
                    transaction_id = %transaction_id,
                    %amount,
                    balance = %wallet.balance,
                    "Wallet debited"
                );
                Ok(wallet)
            }
            Err(e @ WalletError::InsufficientBalance { .. }) => {
                tracing::info!(user_id = %user_id, %amount, "Debit rejected: {e}");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn all(&self) -> Result<Vec<Wallet>> {
        self.store.all().await
    }
}
