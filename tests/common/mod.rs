// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bursa::application::{LedgerConfig, WalletService};
use bursa::domain::{Cents, HistoryEntry, PageToken, UserId, Wallet};
use bursa::storage::{CreateOutcome, LedgerStore, MemoryStore, WriteOutcome};
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use uuid::Uuid;

/// Helper to create a SQLite-backed service with a temporary database
pub async fn test_service() -> Result<(WalletService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = WalletService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to create a memory-backed service with the given config
pub fn memory_service(config: LedgerConfig) -> WalletService {
    WalletService::with_config(Arc::new(MemoryStore::new()), config)
}

/// Register a user and seed an initial balance
pub async fn funded_user(service: &WalletService, amount: Cents) -> Result<UserId> {
    let user = Uuid::new_v4();
    service.register_user(user).await?;
    if amount > 0 {
        service.update_balance(user, amount, None).await?;
    }
    Ok(user)
}

/// Store wrapper that reports a version mismatch for the first N
/// conditional writes, then delegates. Exercises the service's retry loop
/// without real contention.
pub struct ConflictingStore {
    inner: MemoryStore,
    remaining_conflicts: AtomicU32,
}

impl ConflictingStore {
    pub fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            remaining_conflicts: AtomicU32::new(conflicts),
        }
    }
}

#[async_trait]
impl LedgerStore for ConflictingStore {
    async fn read_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        self.inner.read_wallet(user_id).await
    }

    async fn create_wallet(&self, wallet: &Wallet) -> Result<CreateOutcome> {
        self.inner.create_wallet(wallet).await
    }

    async fn archive_wallet(&self, user_id: UserId, at: DateTime<Utc>) -> Result<bool> {
        self.inner.archive_wallet(user_id, at).await
    }

    async fn write_wallet_if_version(
        &self,
        user_id: UserId,
        expected_version: i64,
        new_balance: Cents,
        entry: &HistoryEntry,
    ) -> Result<WriteOutcome> {
        let remaining = self.remaining_conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_conflicts.store(remaining - 1, Ordering::SeqCst);
            return Ok(WriteOutcome::VersionMismatch);
        }
        self.inner
            .write_wallet_if_version(user_id, expected_version, new_balance, entry)
            .await
    }

    async fn entry_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<Option<HistoryEntry>> {
        self.inner.entry_by_reference(user_id, reference).await
    }

    async fn query_history(
        &self,
        user_id: Option<UserId>,
        cursor: Option<&PageToken>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.inner.query_history(user_id, cursor, limit).await
    }
}
