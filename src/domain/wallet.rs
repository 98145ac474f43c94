use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type UserId = Uuid;

/// A wallet holds the monetary balance for exactly one user.
///
/// Wallets are created with a zero balance when the owning user registers
/// and are mutated only through the wallet service's update path. `version`
/// increases by exactly one per committed update; it is the optimistic
/// concurrency token checked by the store's conditional write.
///
/// Wallets are never physically deleted while their user exists. Deleting
/// a user archives the wallet instead (soft state), which blocks further
/// mutation but keeps the balance and history readable for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    /// Current balance in cents. Never negative.
    pub balance: Cents,
    /// Monotonically increasing update counter, starting at 0.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Wallet {
    /// Create a fresh wallet for a newly registered user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
            version: 0,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Balance that applying `delta` would produce, or `None` on i64 overflow.
    /// The result may be negative; rejecting that is the service's job.
    pub fn balance_after(&self, delta: Cents) -> Option<Cents> {
        self.balance.checked_add(delta)
    }
}
