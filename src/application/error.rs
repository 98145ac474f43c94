use thiserror::Error;

use crate::domain::{Cents, UserId};

/// Error taxonomy for wallet operations.
///
/// Validation failures (`InvalidAmount`, `InsufficientFunds`,
/// `UserNotFound`, `WalletArchived`) are terminal: the service returns
/// them without retrying. `ConcurrencyConflict` is only surfaced after the
/// internal retry budget is exhausted; a caller that supplied an
/// idempotency reference can safely repeat the whole call.
/// `StoreUnavailable` wraps storage failures unchanged; retry policy
/// across store outages belongs to the caller.
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Wallet already exists for user: {0}")]
    WalletAlreadyExists(UserId),

    #[error("Wallet is archived: {0}")]
    WalletArchived(UserId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Cents, requested: Cents },

    #[error("Concurrent update conflict after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] anyhow::Error),
}
