use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId};

pub type EntryId = Uuid;

/// One committed balance change. Entries are immutable: corrections are
/// made by applying a compensating delta, never by editing the record.
///
/// Exactly one entry exists per committed update, written in the same
/// transaction as the balance change. Replaying a wallet's entries from a
/// zero balance must reconstruct its current balance exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub user_id: UserId,
    /// Signed delta applied by this update (positive = credit).
    pub delta_cents: Cents,
    /// Wallet balance immediately after the delta was applied.
    pub balance_after: Cents,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied idempotency reference, unique per user when present.
    pub reference: Option<String>,
}

impl HistoryEntry {
    pub fn new(
        user_id: UserId,
        delta_cents: Cents,
        balance_after: Cents,
        reference: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            delta_cents,
            balance_after,
            timestamp: Utc::now(),
            reference,
        }
    }
}

/// Result of replaying a wallet's entries from a zero balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    pub entry_count: usize,
    pub final_balance: Cents,
    /// True if any running prefix dipped below zero.
    pub went_negative: bool,
}

/// Replay entries in the given order (oldest first), summing deltas.
pub fn replay_balance(entries: &[HistoryEntry]) -> Replay {
    let mut balance: Cents = 0;
    let mut went_negative = false;

    for entry in entries {
        balance += entry.delta_cents;
        if balance < 0 {
            went_negative = true;
        }
    }

    Replay {
        entry_count: entries.len(),
        final_balance: balance,
        went_negative,
    }
}

/// Opaque pagination cursor: the sort key of the last entry on a page.
///
/// History listings are ordered newest first, ties broken by entry id
/// ascending. The token encodes that `(timestamp, id)` pair so the next
/// page can resume strictly after it, regardless of rows inserted between
/// requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    pub timestamp: DateTime<Utc>,
    pub id: EntryId,
}

impl PageToken {
    pub fn for_entry(entry: &HistoryEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            id: entry.id,
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a two-field struct cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(delta: Cents, after: Cents) -> HistoryEntry {
        HistoryEntry::new(Uuid::new_v4(), delta, after, None)
    }

    #[test]
    fn test_replay_empty_history() {
        let replay = replay_balance(&[]);
        assert_eq!(replay.entry_count, 0);
        assert_eq!(replay.final_balance, 0);
        assert!(!replay.went_negative);
    }

    #[test]
    fn test_replay_reconstructs_balance() {
        let entries = vec![entry(10000, 10000), entry(-3000, 7000), entry(500, 7500)];
        let replay = replay_balance(&entries);

        assert_eq!(replay.final_balance, 7500);
        assert_eq!(replay.final_balance, entries.last().unwrap().balance_after);
        assert!(!replay.went_negative);
    }

    #[test]
    fn test_replay_flags_negative_prefix() {
        // A debit committed before its covering credit: the sums match but
        // the running balance dipped below zero.
        let entries = vec![entry(-500, -500), entry(1000, 500)];
        let replay = replay_balance(&entries);

        assert_eq!(replay.final_balance, 500);
        assert!(replay.went_negative);
    }

    #[test]
    fn test_page_token_roundtrip() {
        let e = entry(100, 100);
        let token = PageToken::for_entry(&e);
        let encoded = token.encode();

        assert_eq!(PageToken::decode(&encoded), Some(token));
    }

    #[test]
    fn test_page_token_rejects_garbage() {
        assert_eq!(PageToken::decode("not a token"), None);
        assert_eq!(PageToken::decode(""), None);
        // Valid base64, invalid payload
        assert_eq!(PageToken::decode(&URL_SAFE_NO_PAD.encode(b"{}")), None);
    }
}
