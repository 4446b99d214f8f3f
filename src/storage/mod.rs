//! Ledger Store primitives and the transaction seam they run inside.
//!
//! A [`LedgerStore`] hands out [`LedgerTx`] units of work. Every primitive on
//! `LedgerTx` executes inside that unit of work and becomes visible only when
//! [`LedgerTx::commit`] succeeds. Nothing is published on rollback, and
//! dropping an unfinished transaction discards it.

mod error;
mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::domain::{
    Account, AccountId, Cents, Entry, EntryId, NewAccount, Transfer, TransferId, TransferRequest,
};

pub use error::*;
pub use memory::*;
pub use sqlite::*;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// One open unit of work against a ledger store.
///
/// `commit` and `rollback` may each be called once; any call after the
/// transaction has finished returns [`StoreError::TransactionClosed`].
#[async_trait]
pub trait LedgerTx: Send {
    async fn create_transfer(&mut self, request: &TransferRequest) -> Result<Transfer, StoreError>;

    async fn create_entry(&mut self, account_id: AccountId, amount: Cents)
    -> Result<Entry, StoreError>;

    async fn get_account(&mut self, id: AccountId) -> Result<Account, StoreError>;

    /// Atomically add `delta` to the account balance and return the new state.
    /// Takes the account's row lock, held until the transaction finishes.
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Cents,
    ) -> Result<Account, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx + 'static;

    /// Open a new unit of work.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Open an account, recording an opening entry for a non-zero balance.
    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError>;

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError>;

    /// Entries ordered by id, optionally restricted to one account.
    async fn list_entries(&self, account_id: Option<AccountId>) -> Result<Vec<Entry>, StoreError>;

    /// Transfers ordered by id, optionally restricted to those touching one account.
    async fn list_transfers(
        &self,
        account_id: Option<AccountId>,
    ) -> Result<Vec<Transfer>, StoreError>;
}
