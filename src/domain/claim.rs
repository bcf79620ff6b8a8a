use super::transaction::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClaimState {
    InFlight,
    Settled { transaction_id: TransactionId },
    Rejected { reason: String },
}

/// Idempotency marker for one external event or client reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub key: String,
    #[serde(flatten)]
    pub state: ClaimState,
    pub claimed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClaimRecord {
    pub fn in_flight(key: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            state: ClaimState::InFlight,
            claimed_at: now,
            updated_at: now,
        }
    }

    /// An in-flight claim older than `stale_before` belongs to a worker that
    /// died mid-settlement and may be taken over.
    pub fn is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        self.state == ClaimState::InFlight && self.claimed_at < stale_before
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimAttempt {
    /// The caller owns the key. `taken_over` is set when a stale claim was replaced.
    Acquired { taken_over: bool },
    /// Someone else claimed the key first.
    Held(ClaimRecord),
}
