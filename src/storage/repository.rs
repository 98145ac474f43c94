use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{Cents, HistoryEntry, PageToken, UserId, Wallet};

use super::{CreateOutcome, LedgerStore, WriteOutcome, MIGRATION_001_INITIAL};

/// SQLite-backed ledger store.
///
/// Wallet and history writes share one transaction, so their atomicity
/// comes from the database itself. Timestamps are stored as
/// fixed-width RFC 3339 strings (microsecond precision): with a constant
/// width, lexicographic ordering in SQL matches chronological ordering,
/// which the history cursor relies on.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store over an existing SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    fn format_ts(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(s)
            .context("Invalid timestamp")?
            .with_timezone(&Utc))
    }

    fn row_to_wallet(row: &sqlx::sqlite::SqliteRow) -> Result<Wallet> {
        let user_id_str: String = row.get("user_id");
        let created_at_str: String = row.get("created_at");
        let archived_at_str: Option<String> = row.get("archived_at");

        Ok(Wallet {
            user_id: Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
            balance: row.get("balance"),
            version: row.get("version"),
            created_at: Self::parse_ts(&created_at_str)?,
            archived_at: archived_at_str.as_deref().map(Self::parse_ts).transpose()?,
        })
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryEntry> {
        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let timestamp_str: String = row.get("timestamp");

        Ok(HistoryEntry {
            id: Uuid::parse_str(&id_str).context("Invalid entry ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
            delta_cents: row.get("delta_cents"),
            balance_after: row.get("balance_after"),
            timestamp: Self::parse_ts(&timestamp_str)?,
            reference: row.get("reference"),
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn read_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, balance, version, created_at, archived_at
            FROM wallets
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch wallet")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_wallet(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_wallet(&self, wallet: &Wallet) -> Result<CreateOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO wallets (user_id, balance, version, created_at, archived_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(wallet.user_id.to_string())
        .bind(wallet.balance)
        .bind(wallet.version)
        .bind(Self::format_ts(wallet.created_at))
        .bind(wallet.archived_at.map(Self::format_ts))
        .execute(&self.pool)
        .await
        .context("Failed to create wallet")?;

        if result.rows_affected() == 0 {
            Ok(CreateOutcome::AlreadyExists)
        } else {
            Ok(CreateOutcome::Created)
        }
    }

    async fn archive_wallet(&self, user_id: UserId, at: DateTime<Utc>) -> Result<bool> {
        // COALESCE keeps the original archive timestamp on repeat calls
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET archived_at = COALESCE(archived_at, ?)
            WHERE user_id = ?
            "#,
        )
        .bind(Self::format_ts(at))
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to archive wallet")?;

        Ok(result.rows_affected() > 0)
    }

    async fn write_wallet_if_version(
        &self,
        user_id: UserId,
        expected_version: i64,
        new_balance: Cents,
        entry: &HistoryEntry,
    ) -> Result<WriteOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let updated = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = ?, version = ?
            WHERE user_id = ? AND version = ?
            "#,
        )
        .bind(new_balance)
        .bind(expected_version + 1)
        .bind(user_id.to_string())
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .context("Failed to write wallet balance")?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .context("Failed to roll back transaction")?;
            return match self.read_wallet(user_id).await? {
                Some(_) => Ok(WriteOutcome::VersionMismatch),
                None => Ok(WriteOutcome::WalletMissing),
            };
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO history (id, user_id, delta_cents, balance_after, timestamp, reference)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.user_id.to_string())
        .bind(entry.delta_cents)
        .bind(entry.balance_after)
        .bind(Self::format_ts(entry.timestamp))
        .bind(&entry.reference)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await.context("Failed to commit update")?;
                Ok(WriteOutcome::Committed)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback()
                    .await
                    .context("Failed to roll back transaction")?;
                // The unique index only covers rows with a reference, so a
                // violation implies one is present.
                let reference = entry.reference.as_deref().unwrap_or_default();
                let existing = self
                    .entry_by_reference(user_id, reference)
                    .await?
                    .context("Duplicate reference reported but entry not found")?;
                Ok(WriteOutcome::DuplicateReference(existing))
            }
            Err(err) => Err(err).context("Failed to append history entry"),
        }
    }

    async fn entry_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, delta_cents, balance_after, timestamp, reference
            FROM history
            WHERE user_id = ? AND reference = ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch entry by reference")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn query_history(
        &self,
        user_id: Option<UserId>,
        cursor: Option<&PageToken>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let mut query = String::from(
            "SELECT id, user_id, delta_cents, balance_after, timestamp, reference FROM history WHERE 1=1",
        );

        let user_id_str = user_id.map(|id| id.to_string());
        let cursor_parts = cursor.map(|c| (Self::format_ts(c.timestamp), c.id.to_string()));

        if user_id_str.is_some() {
            query.push_str(" AND user_id = ?");
        }
        if cursor_parts.is_some() {
            // Resume strictly after the cursor in (timestamp DESC, id ASC) order
            query.push_str(" AND (timestamp < ? OR (timestamp = ? AND id > ?))");
        }

        query.push_str(" ORDER BY timestamp DESC, id ASC LIMIT ?");

        let mut sql_query = sqlx::query(&query);

        if let Some(ref uid) = user_id_str {
            sql_query = sql_query.bind(uid);
        }
        if let Some((ref ts, ref id)) = cursor_parts {
            sql_query = sql_query.bind(ts).bind(ts).bind(id);
        }
        sql_query = sql_query.bind(limit as i64);

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to query history")?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}
