use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Account, AccountId, Cents, Entry};

pub type TransferId = i64;

/// Record of one atomic movement of funds between two accounts.
/// Transfers are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    /// Source account (balance decreases)
    pub from_account_id: AccountId,
    /// Destination account (balance increases)
    pub to_account_id: AccountId,
    /// Always positive
    pub amount: Cents,
    pub created_at: DateTime<Utc>,
}

/// A request to move `amount` from one account to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Cents,
}

impl TransferRequest {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: Cents) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Checks that can be made without touching storage.
    pub fn validate(&self) -> Result<(), InvalidTransfer> {
        if self.amount <= 0 {
            return Err(InvalidTransfer::NonPositiveAmount(self.amount));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidTransfer {
    NonPositiveAmount(Cents),
}

impl std::fmt::Display for InvalidTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidTransfer::NonPositiveAmount(amount) => {
                write!(f, "transfer amount must be positive, got {}", amount)
            }
        }
    }
}

impl std::error::Error for InvalidTransfer {}

/// Snapshot returned by a committed transfer: the rows it created and both
/// accounts as read inside the same transaction. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}
