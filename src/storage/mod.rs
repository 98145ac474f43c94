mod memory;
mod repository;

pub use memory::MemoryStore;
pub use repository::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Cents, HistoryEntry, PageToken, UserId, Wallet};

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Outcome of creating a wallet row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Outcome of the conditional wallet write.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// Balance row updated and history entry appended, in one transaction.
    Committed,
    /// The stored version no longer matches the one the caller read.
    VersionMismatch,
    /// No wallet row exists for the user.
    WalletMissing,
    /// An entry with the same (user, reference) was already committed;
    /// carries that entry so callers can return the recorded result.
    DuplicateReference(HistoryEntry),
}

/// The durable store the ledger core runs against.
///
/// This is the only shared mutable resource in the system and the only
/// seam where blocking I/O happens. Implementations must guarantee that
/// `write_wallet_if_version` applies the balance write and the history
/// append atomically: a crash or conflict can never leave one without the
/// other visible.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Latest committed wallet state, or `None` if the user has no wallet.
    async fn read_wallet(&self, user_id: UserId) -> Result<Option<Wallet>>;

    /// Insert the wallet row; reports `AlreadyExists` instead of failing
    /// so registration can be retried safely.
    async fn create_wallet(&self, wallet: &Wallet) -> Result<CreateOutcome>;

    /// Soft-archive the wallet. Returns false when the user has no wallet.
    /// Archiving an already-archived wallet keeps the original timestamp.
    async fn archive_wallet(&self, user_id: UserId, at: DateTime<Utc>) -> Result<bool>;

    /// Conditionally set the wallet's balance, guarded by `expected_version`,
    /// and append `entry` in the same transaction. The stored version becomes
    /// `expected_version + 1` on commit.
    async fn write_wallet_if_version(
        &self,
        user_id: UserId,
        expected_version: i64,
        new_balance: Cents,
        entry: &HistoryEntry,
    ) -> Result<WriteOutcome>;

    /// Look up the entry recorded for an idempotency reference, if any.
    async fn entry_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<Option<HistoryEntry>>;

    /// Page of history entries ordered by timestamp descending, ties broken
    /// by id ascending, starting strictly after `cursor` when present.
    /// `user_id = None` queries across all users.
    async fn query_history(
        &self,
        user_id: Option<UserId>,
        cursor: Option<&PageToken>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>>;
}
