use std::time::Duration;

use thiserror::Error;

use crate::domain::{AccountId, EntryId, InvalidTransfer, TransferId};
use crate::storage::StoreError;

/// Why a transfer did not commit. Every variant means nothing was written.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] InvalidTransfer),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// The storage engine could not serialize this transfer against a
    /// concurrent one. Re-running the same request may succeed.
    #[error("Transfer conflicted with a concurrent transaction: {0}")]
    Conflict(String),

    #[error("Transfer cancelled by caller")]
    Cancelled,

    #[error("Transfer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl TransferError {
    /// Only conflicts are worth retrying with the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Conflict(_))
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => TransferError::AccountNotFound(id),
            StoreError::Conflict(msg) => TransferError::Conflict(msg),
            other => TransferError::Storage(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("Currency mismatch between accounts: {from_currency} vs {to_currency}")]
    CurrencyMismatch {
        from_currency: String,
        to_currency: String,
    },

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => AppError::AccountNotFound(id),
            StoreError::TransferNotFound(id) => AppError::TransferNotFound(id),
            StoreError::EntryNotFound(id) => AppError::EntryNotFound(id),
            other => AppError::Storage(other),
        }
    }
}
