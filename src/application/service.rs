use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    replay_balance, Cents, EntryId, HistoryEntry, PageToken, UserId, Wallet,
};
use crate::storage::{CreateOutcome, LedgerStore, SqliteStore, WriteOutcome};

use super::WalletError;

/// Tunable limits for the ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Largest absolute delta a single update may apply, in cents.
    pub max_delta_cents: Cents,
    /// Read-compute-write attempts before giving up with a conflict.
    pub max_attempts: u32,
    /// Hard cap on requested history page sizes.
    pub max_page_size: usize,
    /// Page size used when the caller does not supply one.
    pub default_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_delta_cents: 10_000_000_00,
            max_attempts: 4,
            max_page_size: 100,
            default_page_size: 50,
        }
    }
}

/// Result of a successful balance update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Balance after the delta was applied (or the previously recorded
    /// balance when an idempotency reference matched).
    pub balance: Cents,
    /// The history entry recording this update.
    pub entry_id: EntryId,
}

/// Consistency report for one wallet.
pub struct IntegrityReport {
    pub user_id: UserId,
    pub entry_count: usize,
    pub stored_balance: Cents,
    pub replayed_balance: Cents,
    /// True if some prefix of the replay dipped below zero.
    pub went_negative: bool,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.replayed_balance && !self.went_negative
    }
}

/// Owns the balance-mutation protocol: validation, the optimistic
/// read-compute-write cycle, and idempotency.
///
/// The service never caches balances: every attempt re-reads current
/// state immediately before computing the new value. The only
/// serialization point is the store's version check at commit time.
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Initialize a new SQLite database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, WalletError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let store = SqliteStore::init(&db_url).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Connect to an existing SQLite database.
    pub async fn connect(database_path: &str) -> Result<Self, WalletError> {
        let db_url = format!("sqlite:{}", database_path);
        let store = SqliteStore::connect(&db_url).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// A history reader sharing this service's store and limits.
    pub fn history(&self) -> HistoryReader {
        HistoryReader::with_config(Arc::clone(&self.store), self.config.clone())
    }

    /// Create the wallet for a newly registered user, with balance 0.
    pub async fn register_user(&self, user_id: UserId) -> Result<Wallet, WalletError> {
        let wallet = Wallet::new(user_id);
        match self.store.create_wallet(&wallet).await? {
            CreateOutcome::Created => {
                tracing::debug!(%user_id, "wallet created");
                Ok(wallet)
            }
            CreateOutcome::AlreadyExists => Err(WalletError::WalletAlreadyExists(user_id)),
        }
    }

    /// Latest committed balance for the user.
    ///
    /// Archived wallets remain readable; only mutation is blocked.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Cents, WalletError> {
        let wallet = self
            .store
            .read_wallet(user_id)
            .await?
            .ok_or(WalletError::UserNotFound(user_id))?;
        Ok(wallet.balance)
    }

    /// Soft-archive the user's wallet. This is the cascade hook for user
    /// deletion: further updates are rejected, balance and history stay
    /// readable.
    pub async fn archive_user(&self, user_id: UserId) -> Result<(), WalletError> {
        if self.store.archive_wallet(user_id, Utc::now()).await? {
            tracing::debug!(%user_id, "wallet archived");
            Ok(())
        } else {
            Err(WalletError::UserNotFound(user_id))
        }
    }

    /// Apply a signed delta to the user's balance and record a history
    /// entry for it, atomically.
    ///
    /// When `reference` is supplied and an entry with that reference
    /// already exists for the user, the recorded result is returned and
    /// the delta is not applied again, so client retries are safe. This
    /// also covers cancellation: if the caller gives up after the commit
    /// but before observing the result, repeating the call with the same
    /// reference yields exactly what the first call committed.
    pub async fn update_balance(
        &self,
        user_id: UserId,
        delta: Cents,
        reference: Option<&str>,
    ) -> Result<UpdateOutcome, WalletError> {
        self.validate_delta(delta)?;

        if let Some(reference) = reference {
            if let Some(prior) = self.store.entry_by_reference(user_id, reference).await? {
                tracing::debug!(%user_id, reference, "reference already applied");
                return Ok(UpdateOutcome {
                    balance: prior.balance_after,
                    entry_id: prior.id,
                });
            }
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let wallet = self
                .store
                .read_wallet(user_id)
                .await?
                .ok_or(WalletError::UserNotFound(user_id))?;
            if wallet.is_archived() {
                return Err(WalletError::WalletArchived(user_id));
            }

            let new_balance = wallet.balance_after(delta).ok_or_else(|| {
                WalletError::InvalidAmount(format!(
                    "applying {delta} to balance {} overflows",
                    wallet.balance
                ))
            })?;
            if new_balance < 0 {
                return Err(WalletError::InsufficientFunds {
                    balance: wallet.balance,
                    requested: delta,
                });
            }

            let entry = HistoryEntry::new(user_id, delta, new_balance, reference.map(String::from));
            match self
                .store
                .write_wallet_if_version(user_id, wallet.version, new_balance, &entry)
                .await?
            {
                WriteOutcome::Committed => {
                    tracing::trace!(
                        %user_id,
                        delta,
                        new_balance,
                        version = wallet.version + 1,
                        "balance update committed"
                    );
                    return Ok(UpdateOutcome {
                        balance: new_balance,
                        entry_id: entry.id,
                    });
                }
                WriteOutcome::VersionMismatch if attempt < self.config.max_attempts => {
                    tracing::debug!(%user_id, attempt, "lost the version race, retrying");
                    continue;
                }
                WriteOutcome::VersionMismatch => {
                    tracing::warn!(%user_id, attempts = attempt, "giving up after repeated version conflicts");
                    return Err(WalletError::ConcurrencyConflict { attempts: attempt });
                }
                WriteOutcome::WalletMissing => {
                    return Err(WalletError::UserNotFound(user_id));
                }
                WriteOutcome::DuplicateReference(existing) => {
                    // A concurrent call with the same reference won the race
                    tracing::debug!(%user_id, "reference committed concurrently");
                    return Ok(UpdateOutcome {
                        balance: existing.balance_after,
                        entry_id: existing.id,
                    });
                }
            }
        }
    }

    /// Replay the user's full history and compare it with the stored
    /// balance.
    pub async fn verify_integrity(&self, user_id: UserId) -> Result<IntegrityReport, WalletError> {
        let wallet = self
            .store
            .read_wallet(user_id)
            .await?
            .ok_or(WalletError::UserNotFound(user_id))?;

        let mut entries = Vec::new();
        let mut cursor: Option<PageToken> = None;
        loop {
            let page = self
                .store
                .query_history(Some(user_id), cursor.as_ref(), self.config.max_page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(PageToken::for_entry);
            entries.extend(page);
        }

        // Pages arrive newest first; replay wants commit order
        entries.reverse();
        let replay = replay_balance(&entries);

        Ok(IntegrityReport {
            user_id,
            entry_count: replay.entry_count,
            stored_balance: wallet.balance,
            replayed_balance: replay.final_balance,
            went_negative: replay.went_negative,
        })
    }

    fn validate_delta(&self, delta: Cents) -> Result<(), WalletError> {
        if delta == 0 {
            return Err(WalletError::InvalidAmount(
                "delta must be non-zero".to_string(),
            ));
        }
        if delta == Cents::MIN || delta.abs() > self.config.max_delta_cents {
            return Err(WalletError::InvalidAmount(format!(
                "delta {} exceeds the configured bound of {}",
                delta, self.config.max_delta_cents
            )));
        }
        Ok(())
    }
}

/// One page of history entries, newest first.
#[derive(Debug)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    /// Present when more entries exist beyond this page.
    pub next_page_token: Option<String>,
}

/// Read-only aggregation over the purchase history.
///
/// History is decoupled from user lifecycle: listing an unknown user
/// yields an empty page, not an error, and archived users' entries stay
/// listable forever.
pub struct HistoryReader {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
}

impl HistoryReader {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Page through one user's history, newest first.
    pub async fn list_history(
        &self,
        user_id: UserId,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<HistoryPage, WalletError> {
        self.page(Some(user_id), page_token, page_size).await
    }

    /// Page through all users' history, for administrative aggregation.
    pub async fn list_all_history(
        &self,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<HistoryPage, WalletError> {
        self.page(None, page_token, page_size).await
    }

    async fn page(
        &self,
        user_id: Option<UserId>,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<HistoryPage, WalletError> {
        let limit = self.clamp_page_size(page_size);
        let cursor = match page_token {
            Some(token) => Some(
                PageToken::decode(token)
                    .ok_or_else(|| WalletError::InvalidPageToken(token.to_string()))?,
            ),
            None => None,
        };

        // Fetch one extra row to learn whether another page exists
        let mut entries = self
            .store
            .query_history(user_id, cursor.as_ref(), limit + 1)
            .await?;

        let next_page_token = if entries.len() > limit {
            entries.truncate(limit);
            entries.last().map(|e| PageToken::for_entry(e).encode())
        } else {
            None
        };

        Ok(HistoryPage {
            entries,
            next_page_token,
        })
    }

    fn clamp_page_size(&self, requested: Option<usize>) -> usize {
        match requested {
            None | Some(0) => self.config.default_page_size,
            Some(n) => n.min(self.config.max_page_size),
        }
    }
}
