use crate::domain::transaction::PaymentGateway;
use std::time::Duration;

/// Tunables for the settlement engine.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Gateway recorded on internally trusted credits and debits.
    pub internal_gateway: PaymentGateway,
    /// Gateway whose webhooks this engine receives.
    pub webhook_gateway: PaymentGateway,
    /// In-flight claims older than this are considered abandoned.
    pub claim_lease: Duration,
    pub claim_poll_interval: Duration,
    pub claim_poll_attempts: u32,
    pub webhook_tolerance: Duration,
    /// Page size used when walking a user's transaction history.
    pub history_page_size: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            internal_gateway: PaymentGateway::System,
            webhook_gateway: PaymentGateway::Stripe,
            claim_lease: Duration::from_secs(30),
            claim_poll_interval: Duration::from_millis(25),
            claim_poll_attempts: 40,
            webhook_tolerance: Duration::from_secs(300),
            history_page_size: 50,
        }
    }
}

impl SettlementConfig {
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_claim_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.claim_poll_interval = interval;
        self.claim_poll_attempts = attempts;
        self
    }
}
