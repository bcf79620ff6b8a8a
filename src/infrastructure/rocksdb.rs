use crate::domain::claim::{ClaimAttempt, ClaimRecord, ClaimState};
use crate::domain::money::Amount;
use crate::domain::ports::{ClaimStore, Inserted, TransactionStore, Transition, WalletStore};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus, UserId};
use crate::domain::wallet::Wallet;
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, TransactionDB,
    TransactionDBOptions,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column Family for transaction records keyed by id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping `gateway:external_key` to a transaction id.
pub const CF_EXTERNAL_KEYS: &str = "external_keys";
/// Column Family indexing transactions per user in creation order.
pub const CF_USER_TRANSACTIONS: &str = "user_transactions";
/// Column Family for wallets keyed by user id.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for idempotency claims.
pub const CF_CLAIMS: &str = "claims";

const COLUMN_FAMILIES: [&str; 5] = [
    CF_TRANSACTIONS,
    CF_EXTERNAL_KEYS,
    CF_USER_TRANSACTIONS,
    CF_WALLETS,
    CF_CLAIMS,
];

/// A persistent store implementation using a RocksDB `TransactionDB`.
///
/// Every conditional write (unique insert, status compare-and-set, balance
/// check, claim) runs inside a pessimistic RocksDB transaction that locks the
/// keys it reads with `get_for_update`, so concurrent writers from any number
/// of tasks serialize per key inside the database.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<TransactionDB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<TransactionDB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// the column families the ledger needs.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db = TransactionDB::open_cf_descriptors(
            &opts,
            &TransactionDBOptions::default(),
            path,
            descriptors,
        )?;

        Ok(Self { db: Arc::new(db) })
    }

    fn load_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, id.0.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| WalletError::Dependency(format!("Column family '{name}' not found")))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn user_prefix(user_id: &UserId) -> Vec<u8> {
    let mut prefix = user_id.0.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

/// `user \0 created_at(nanos, big-endian, offset) id` so a forward scan is
/// creation order.
fn user_index_key(tx: &Transaction) -> Vec<u8> {
    let nanos = tx.created_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
    let ordered = (nanos as u64) ^ (1 << 63);
    let mut key = user_prefix(&tx.user_id);
    key.extend_from_slice(&ordered.to_be_bytes());
    key.extend_from_slice(tx.id.0.as_bytes());
    key
}

fn external_index_key(tx: &Transaction) -> Option<Vec<u8>> {
    tx.external_key()
        .map(|key| format!("{}:{}", tx.gateway, key).into_bytes())
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: Transaction) -> Result<Inserted> {
        let transactions = self.cf(CF_TRANSACTIONS)?;
        let external = self.cf(CF_EXTERNAL_KEYS)?;
        let by_user = self.cf(CF_USER_TRANSACTIONS)?;

        let txn = self.db.transaction();
        let id_key = tx.id.0.as_bytes().to_vec();

        if txn.get_for_update_cf(transactions, &id_key, true)?.is_some() {
            return Err(WalletError::InvalidState(format!(
                "Transaction {} already exists",
                tx.id
            )));
        }

        if let Some(unique) = external_index_key(&tx) {
            if let Some(existing_id) = txn.get_for_update_cf(external, &unique, true)? {
                let existing = txn.get_cf(transactions, &existing_id)?.ok_or_else(|| {
                    WalletError::Dependency("External key points at a missing transaction".into())
                })?;
                return Ok(Inserted::Existing(decode(&existing)?));
            }
            txn.put_cf(external, &unique, &id_key)?;
        }

        txn.put_cf(transactions, &id_key, encode(&tx)?)?;
        txn.put_cf(by_user, user_index_key(&tx), &id_key)?;
        txn.commit()?;

        Ok(Inserted::Created(tx))
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.load_transaction(id)
    }

    async fn transition(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        let txn = self.db.transaction();

        let bytes = txn
            .get_for_update_cf(cf, id.0.as_bytes(), true)?
            .ok_or_else(|| WalletError::NotFound(format!("Transaction {id}")))?;
        let mut tx: Transaction = decode(&bytes)?;

        match tx.transition(to, reason, now) {
            Ok(()) => {
                txn.put_cf(cf, id.0.as_bytes(), encode(&tx)?)?;
                txn.commit()?;
                Ok(Transition::Applied(tx))
            }
            Err(WalletError::InvalidState(_)) => Ok(Transition::AlreadyTerminal(tx)),
            Err(e) => Err(e),
        }
    }

    async fn page_for_user(
        &self,
        user_id: &UserId,
        before: Option<TransactionId>,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let by_user = self.cf(CF_USER_TRANSACTIONS)?;
        let prefix = user_prefix(user_id);

        let start = match before {
            Some(cursor) => match self.load_transaction(cursor)? {
                Some(tx) if tx.user_id == *user_id => user_index_key(&tx),
                _ => return Ok(Vec::new()),
            },
            None => {
                let mut upper = user_id.0.as_bytes().to_vec();
                upper.push(1);
                upper
            }
        };

        let mut ids = Vec::new();
        let iter = self.db.iterator_cf(
            by_user,
            IteratorMode::From(start.as_slice(), Direction::Reverse),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || ids.len() >= limit {
                break;
            }
            if before.is_some() && *key == *start {
                continue;
            }
            let id = Uuid::from_slice(&value)
                .map_err(|e| WalletError::Dependency(format!("Corrupt user index entry: {e}")))?;
            ids.push(TransactionId(id));
        }

        let mut page = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tx) = self.load_transaction(id)? {
                page.push(tx);
            }
        }
        Ok(page)
    }
}

impl RocksDBStore {
    /// Loads the wallet under a write lock, lets `mutate` change it and
    /// commits only when it returns `Some`.
    fn update_wallet<F>(&self, user_id: &UserId, mutate: F) -> Result<Option<Wallet>>
    where
        F: FnOnce(Option<Wallet>) -> Result<Option<Wallet>>,
    {
        let cf = self.cf(CF_WALLETS)?;
        let txn = self.db.transaction();
        let key = user_id.0.as_bytes();

        let current = match txn.get_for_update_cf(cf, key, true)? {
            Some(bytes) => Some(decode::<Wallet>(&bytes)?),
            None => None,
        };

        let updated = mutate(current)?;
        if let Some(wallet) = &updated {
            txn.put_cf(cf, key, encode(wallet)?)?;
            txn.commit()?;
        }
        Ok(updated)
    }
}

#[async_trait]
impl WalletStore for RocksDBStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let cf = self.cf(CF_WALLETS)?;
        match self.db.get_cf(cf, user_id.0.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_or_create(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Wallet> {
        let wallet = self.update_wallet(user_id, |current| {
            Ok(Some(
                current.unwrap_or_else(|| Wallet::new(user_id.clone(), now)),
            ))
        })?;
        wallet.ok_or_else(|| WalletError::Dependency("Wallet upsert returned nothing".into()))
    }

    async fn create_with_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>> {
        self.update_wallet(user_id, |current| {
            if current.is_some() {
                return Ok(None);
            }
            let mut wallet = Wallet::new(user_id.clone(), now);
            wallet.credit(transaction_id, amount, now);
            Ok(Some(wallet))
        })
    }

    async fn apply_credit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        let wallet = self.update_wallet(user_id, |current| {
            let mut wallet = current.unwrap_or_else(|| Wallet::new(user_id.clone(), now));
            wallet.credit(transaction_id, amount, now);
            Ok(Some(wallet))
        })?;
        wallet.ok_or_else(|| WalletError::Dependency("Wallet credit returned nothing".into()))
    }

    async fn apply_debit(
        &self,
        user_id: &UserId,
        transaction_id: TransactionId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        let wallet = self.update_wallet(user_id, |current| {
            let mut wallet = current
                .ok_or_else(|| WalletError::NotFound(format!("Wallet for user {user_id}")))?;
            wallet.debit(transaction_id, amount, now)?;
            Ok(Some(wallet))
        })?;
        wallet.ok_or_else(|| WalletError::Dependency("Wallet debit returned nothing".into()))
    }

    async fn all(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf(CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            wallets.push(decode(&value)?);
        }
        Ok(wallets)
    }
}

#[async_trait]
impl ClaimStore for RocksDBStore {
    async fn try_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimAttempt> {
        let cf = self.cf(CF_CLAIMS)?;
        let txn = self.db.transaction();

        let taken_over = match txn.get_for_update_cf(cf, key, true)? {
            Some(bytes) => {
                let existing: ClaimRecord = decode(&bytes)?;
                if !existing.is_stale(stale_before) {
                    return Ok(ClaimAttempt::Held(existing));
                }
                true
            }
            None => false,
        };

        txn.put_cf(cf, key, encode(&ClaimRecord::in_flight(key, now))?)?;
        txn.commit()?;
        Ok(ClaimAttempt::Acquired { taken_over })
    }

    async fn settle(&self, key: &str, state: ClaimState, now: DateTime<Utc>) -> Result<()> {
        let cf = self.cf(CF_CLAIMS)?;
        let txn = self.db.transaction();

        let mut record = match txn.get_for_update_cf(cf, key, true)? {
            Some(bytes) => decode(&bytes)?,
            None => ClaimRecord::in_flight(key, now),
        };
        record.state = state;
        record.updated_at = now;

        txn.put_cf(cf, key, encode(&record)?)?;
        txn.commit()?;
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let cf = self.cf(CF_CLAIMS)?;
        let txn = self.db.transaction();

        if let Some(bytes) = txn.get_for_update_cf(cf, key, true)? {
            let record: ClaimRecord = decode(&bytes)?;
            if record.state == ClaimState::InFlight {
                txn.delete_cf(cf, key)?;
                txn.commit()?;
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ClaimRecord>> {
        let cf = self.cf(CF_CLAIMS)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
