use thiserror::Error;

use crate::domain::{AccountId, EntryId, TransferId};

/// SQLite primary result codes that mean another transaction holds the lock.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Another transaction holds a lock we need, or the engine refused to
    /// serialize us. Retrying the whole unit of work may succeed.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Balance overflow on account {0}")]
    BalanceOverflow(AccountId),

    #[error("Transaction already committed or rolled back")]
    TransactionClosed,

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    /// True when the failure is a lock/serialization conflict rather than a hard failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if is_conflict_code(db_err.code().as_deref()) {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

/// SQLite reports extended result codes; the low byte is the primary code
/// (e.g. 517 SQLITE_BUSY_SNAPSHOT is a kind of SQLITE_BUSY).
pub(crate) fn is_conflict_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_foreign_key_violation())
        .unwrap_or(false)
}

pub(crate) fn is_check_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_check_violation())
        .unwrap_or(false)
}
