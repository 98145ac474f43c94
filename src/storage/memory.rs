use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Cents, HistoryEntry, PageToken, UserId, Wallet};

use super::{CreateOutcome, LedgerStore, WriteOutcome};

/// In-memory ledger store with the same semantics as [`super::SqliteStore`].
///
/// Useful for tests and for embedding the ledger without a database file.
/// All state lives behind a single mutex, which makes the conditional
/// write and its history append trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    wallets: HashMap<UserId, Wallet>,
    history: Vec<HistoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("ledger store mutex poisoned"))
    }
}

/// The listing order shared by all stores: timestamp descending, ties
/// broken by id ascending.
fn newest_first(a: &HistoryEntry, b: &HistoryEntry) -> std::cmp::Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.id.cmp(&b.id))
}

fn after_cursor(entry: &HistoryEntry, cursor: &PageToken) -> bool {
    entry.timestamp < cursor.timestamp
        || (entry.timestamp == cursor.timestamp && entry.id > cursor.id)
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn read_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let inner = self.lock()?;
        Ok(inner.wallets.get(&user_id).cloned())
    }

    async fn create_wallet(&self, wallet: &Wallet) -> Result<CreateOutcome> {
        let mut inner = self.lock()?;
        if inner.wallets.contains_key(&wallet.user_id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        inner.wallets.insert(wallet.user_id, wallet.clone());
        Ok(CreateOutcome::Created)
    }

    async fn archive_wallet(&self, user_id: UserId, at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.wallets.get_mut(&user_id) {
            Some(wallet) => {
                wallet.archived_at.get_or_insert(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn write_wallet_if_version(
        &self,
        user_id: UserId,
        expected_version: i64,
        new_balance: Cents,
        entry: &HistoryEntry,
    ) -> Result<WriteOutcome> {
        let mut inner = self.lock()?;

        if let Some(reference) = entry.reference.as_deref() {
            let existing = inner
                .history
                .iter()
                .find(|e| e.user_id == user_id && e.reference.as_deref() == Some(reference));
            if let Some(existing) = existing {
                return Ok(WriteOutcome::DuplicateReference(existing.clone()));
            }
        }

        let Some(wallet) = inner.wallets.get_mut(&user_id) else {
            return Ok(WriteOutcome::WalletMissing);
        };
        if wallet.version != expected_version {
            return Ok(WriteOutcome::VersionMismatch);
        }

        wallet.balance = new_balance;
        wallet.version = expected_version + 1;
        inner.history.push(entry.clone());
        Ok(WriteOutcome::Committed)
    }

    async fn entry_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<Option<HistoryEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .history
            .iter()
            .find(|e| e.user_id == user_id && e.reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn query_history(
        &self,
        user_id: Option<UserId>,
        cursor: Option<&PageToken>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let inner = self.lock()?;
        let mut entries: Vec<HistoryEntry> = inner
            .history
            .iter()
            .filter(|e| user_id.is_none_or(|uid| e.user_id == uid))
            .filter(|e| cursor.is_none_or(|c| after_cursor(e, c)))
            .cloned()
            .collect();

        entries.sort_by(newest_first);
        entries.truncate(limit);
        Ok(entries)
    }
}
