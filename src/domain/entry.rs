use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Cents};

pub type EntryId = i64;

/// One immutable line in an account's ledger. Negative amounts are debits,
/// positive amounts are credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: Cents,
    pub created_at: DateTime<Utc>,
}
