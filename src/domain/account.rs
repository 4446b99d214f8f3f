use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

pub type AccountId = i64;

/// A balance-carrying account. Owned by account management; the transfer
/// engine only reads it and applies signed deltas to `balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    /// Current balance in minor units
    pub balance: Cents,
    /// ISO 4217 code, e.g. "USD"
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner: String,
    pub currency: String,
    /// Recorded as an opening entry when non-zero, so the entry sum matches the balance.
    pub opening_balance: Cents,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            currency: currency.into(),
            opening_balance: 0,
        }
    }

    pub fn with_opening_balance(mut self, balance: Cents) -> Self {
        self.opening_balance = balance;
        self
    }
}
