use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Webhook signature error: {0}")]
    Signature(String),
    #[error("Dependency error: {0}")]
    Dependency(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),
}

impl WalletError {
    /// HTTP-equivalent status signal for the boundary layer.
    pub fn status(&self) -> u16 {
        match self {
            WalletError::Validation(_) => 400,
            WalletError::NotFound(_) => 404,
            WalletError::Forbidden(_) => 403,
            WalletError::InsufficientBalance { .. } => 400,
            // Terminal-state retries are reported as success.
            WalletError::InvalidState(_) => 200,
            WalletError::Signature(_) => 400,
            _ => 503,
        }
    }

    /// Only storage and gateway failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WalletError::Validation(_)
                | WalletError::NotFound(_)
                | WalletError::Forbidden(_)
                | WalletError::InsufficientBalance { .. }
                | WalletError::InvalidState(_)
                | WalletError::Signature(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_signals() {
        assert_eq!(WalletError::Validation("x".into()).status(), 400);
        assert_eq!(WalletError::NotFound("x".into()).status(), 404);
        assert_eq!(WalletError::Forbidden("x".into()).status(), 403);
        assert_eq!(
            WalletError::InsufficientBalance {
                required: dec!(5),
                available: dec!(1)
            }
            .status(),
            400
        );
        assert_eq!(WalletError::Dependency("db down".into()).status(), 503);
    }

    #[test]
    fn test_only_dependency_failures_are_retryable() {
        assert!(WalletError::Dependency("timeout".into()).is_retryable());
        assert!(WalletError::Io(std::io::Error::other("disk")).is_retryable());
        assert!(!WalletError::Signature("bad".into()).is_retryable());
        assert!(!WalletError::InvalidState("terminal".into()).is_retryable());
    }
}
