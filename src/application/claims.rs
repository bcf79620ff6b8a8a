use crate::config::SettlementConfig;
use crate::domain::claim::{ClaimAttempt, ClaimRecord, ClaimState};
use crate::domain::ports::ClaimStoreBox;
use crate::domain::transaction::TransactionId;
use crate::error::{Result, WalletError};
use chrono::Utc;
use std::time::Duration;

/// What the caller should do after asking for a key.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the key and must settle or release it.
    Owned { taken_over: bool },
    /// Another worker already finished this key.
    Finished(ClaimRecord),
}

/// Guarantees that each external event or client reference changes state at
/// most once.
pub struct IdempotentApplier {
    store: ClaimStoreBox,
    lease: Duration,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl IdempotentApplier {
    pub fn new(store: ClaimStoreBox, config: &SettlementConfig) -> Self {
        Self {
            store,
            lease: config.claim_lease,
            poll_interval: config.claim_poll_interval,
            poll_attempts: config.claim_poll_attempts,
        }
    }

    /// Single atomic claim attempt.
    pub async fn try_claim(&self, key: &str) -> Result<ClaimAttempt> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.lease)
            .map_err(|e| WalletError::Validation(format!("Invalid claim lease: {e}")))?;
        let attempt = self.store.try_claim(key, now, now - lease).await?;
        if let ClaimAttempt::Acquired { taken_over: true } = attempt {
            tracing::warn!(claim = key, "Took over a stale in-flight claim");
        }
        Ok(attempt)
    }

    /// Claims `key`, or waits for the current holder to finish.
    ///
    /// A holder that releases its claim hands the key to the next waiter.
    /// Gives up with a retryable error when the holder is still in flight
    /// after the configured number of polls.
    pub async fn claim_or_wait(&self, key: &str) -> Result<ClaimOutcome> {
        for attempt in 0..=self.poll_attempts {
            match self.try_claim(key).await? {
                ClaimAttempt::Acquired { taken_over } => {
                    return Ok(ClaimOutcome::Owned { taken_over });
                }
                ClaimAttempt::Held(record) if record.state != ClaimState::InFlight => {
                    tracing::debug!(claim = key, "Claim already settled");
                    return Ok(ClaimOutcome::Finished(record));
                }
                ClaimAttempt::Held(_) if attempt < self.poll_attempts => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                ClaimAttempt::Held(_) => {}
            }
        }
        tracing::warn!(claim = key, "Claim still in flight, giving up");
        Err(WalletError::Dependency(format!(
            "Settlement of {key} is still in progress"
        )))
    }

    pub async fn settle(&self, key: &str, transaction_id: TransactionId) -> Result<()> {
        self.store
            .settle(key, ClaimState::Settled { transaction_id }, Utc::now())
            .await
    }

    pub async fn reject(&self, key: &str, reason: impl Into<String>) -> Result<()> {
        self.store
            .settle(
                key,
                ClaimState::Rejected {
                    reason: reason.into(),
                },
                Utc::now(),
            )
            .await
    }

    /// Drops an unfinished claim. Failures are logged; the lease expires anyway.
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.store.release(key).await {
            tracing::error!(claim = key, error = %e, "Failed to release claim");
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<ClaimRecord>> {
        self.store.get(key).await
    }
}
