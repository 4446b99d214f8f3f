use std::collections::btree_map::Entry as Slot;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::config::EngineConfig;
use crate::domain::{
    Account, AccountId, Cents, Entry, EntryId, NewAccount, Transfer, TransferId, TransferRequest,
};

use super::{LedgerStore, LedgerTx, StoreError};

/// One account row. Whoever holds the mutex owns the right to change it.
type AccountRow = Arc<Mutex<Account>>;

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, AccountRow>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

struct Shared {
    tables: RwLock<Tables>,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    lock_timeout: Duration,
}

impl Shared {
    async fn row(&self, id: AccountId) -> Result<AccountRow, StoreError> {
        self.tables
            .read()
            .await
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn account_exists(&self, id: AccountId) -> bool {
        self.tables.read().await.accounts.contains_key(&id)
    }

    async fn lock_row(&self, id: AccountId) -> Result<OwnedMutexGuard<Account>, StoreError> {
        let row = self.row(id).await?;
        tokio::time::timeout(self.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| {
                StoreError::Conflict(format!(
                    "lock wait on account {} exceeded {:?}",
                    id, self.lock_timeout
                ))
            })
    }

    /// Committed state of an account. Waits while another transaction holds the row.
    async fn read_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let guard = self.lock_row(id).await?;
        Ok(Account::clone(&guard))
    }
}

/// In-process ledger store with per-account row locks.
///
/// A transaction locks an account row the first time it changes its balance
/// and keeps the lock until it commits or rolls back (strict two-phase
/// locking). Waits are bounded by the lock timeout; a wait that runs out is a
/// [`StoreError::Conflict`]. Only the rows a transaction touches are ever
/// locked, so transfers over disjoint accounts never wait on each other.
#[derive(Clone)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(EngineConfig::default().lock_timeout)
    }
}

impl MemoryLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.lock_timeout)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            locked: BTreeMap::new(),
            staged_balances: HashMap::new(),
            staged_entries: Vec::new(),
            staged_transfers: Vec::new(),
            open: true,
        })
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let now = Utc::now();
        let created = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: account.owner.clone(),
            balance: account.opening_balance,
            currency: account.currency.clone(),
            created_at: now,
        };

        let mut tables = self.shared.tables.write().await;
        if account.opening_balance != 0 {
            let entry = Entry {
                id: self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst),
                account_id: created.id,
                amount: account.opening_balance,
                created_at: now,
            };
            tables.entries.insert(entry.id, entry);
        }
        tables
            .accounts
            .insert(created.id, Arc::new(Mutex::new(created.clone())));

        Ok(created)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.shared.read_account(id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let ids: Vec<AccountId> = self.shared.tables.read().await.accounts.keys().copied().collect();

        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            accounts.push(self.shared.read_account(id).await?);
        }
        Ok(accounts)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        self.shared
            .tables
            .read()
            .await
            .transfers
            .get(&id)
            .cloned()
            .ok_or(StoreError::TransferNotFound(id))
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        self.shared
            .tables
            .read()
            .await
            .entries
            .get(&id)
            .cloned()
            .ok_or(StoreError::EntryNotFound(id))
    }

    async fn list_entries(&self, account_id: Option<AccountId>) -> Result<Vec<Entry>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .entries
            .values()
            .filter(|e| account_id.is_none_or(|id| e.account_id == id))
            .cloned()
            .collect())
    }

    async fn list_transfers(
        &self,
        account_id: Option<AccountId>,
    ) -> Result<Vec<Transfer>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .transfers
            .values()
            .filter(|t| {
                account_id.is_none_or(|id| t.from_account_id == id || t.to_account_id == id)
            })
            .cloned()
            .collect())
    }
}

/// An open in-memory transaction.
///
/// New rows and balances are staged locally and published on commit, while
/// the row locks are still held. Rolling back, or dropping the handle, throws
/// the staged work away and releases the locks.
pub struct MemoryTx {
    shared: Arc<Shared>,
    locked: BTreeMap<AccountId, OwnedMutexGuard<Account>>,
    staged_balances: HashMap<AccountId, Cents>,
    staged_entries: Vec<Entry>,
    staged_transfers: Vec<Transfer>,
    open: bool,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }

    /// The account as this transaction sees it, if the row is locked by us.
    fn own_view(&self, id: AccountId) -> Option<Account> {
        self.locked.get(&id).map(|guard| {
            let mut account = Account::clone(guard);
            if let Some(balance) = self.staged_balances.get(&id) {
                account.balance = *balance;
            }
            account
        })
    }

    async fn acquire(&mut self, id: AccountId) -> Result<(), StoreError> {
        if let Slot::Vacant(slot) = self.locked.entry(id) {
            let guard = self.shared.lock_row(id).await?;
            debug!(account_id = id, "row lock acquired");
            slot.insert(guard);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.open = false;
        self.staged_balances.clear();
        self.staged_entries.clear();
        self.staged_transfers.clear();
        self.locked.clear();
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn create_transfer(&mut self, request: &TransferRequest) -> Result<Transfer, StoreError> {
        self.ensure_open()?;
        for id in [request.from_account_id, request.to_account_id] {
            if !self.shared.account_exists(id).await {
                return Err(StoreError::AccountNotFound(id));
            }
        }

        let transfer = Transfer {
            id: self.shared.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount: request.amount,
            created_at: Utc::now(),
        };
        self.staged_transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Entry, StoreError> {
        self.ensure_open()?;
        if !self.shared.account_exists(account_id).await {
            return Err(StoreError::AccountNotFound(account_id));
        }

        let entry = Entry {
            id: self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.staged_entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        self.ensure_open()?;
        match self.own_view(id) {
            Some(account) => Ok(account),
            None => self.shared.read_account(id).await,
        }
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Cents,
    ) -> Result<Account, StoreError> {
        self.ensure_open()?;
        self.acquire(id).await?;

        let mut account = self.own_view(id).ok_or(StoreError::AccountNotFound(id))?;
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or(StoreError::BalanceOverflow(id))?;
        self.staged_balances.insert(id, account.balance);
        Ok(account)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;

        {
            let mut tables = self.shared.tables.write().await;
            for transfer in self.staged_transfers.drain(..) {
                tables.transfers.insert(transfer.id, transfer);
            }
            for entry in self.staged_entries.drain(..) {
                tables.entries.insert(entry.id, entry);
            }
        }

        for (id, guard) in self.locked.iter_mut() {
            if let Some(balance) = self.staged_balances.get(id) {
                guard.balance = *balance;
            }
        }

        self.release();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.release();
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.open {
            debug!(
                locked_rows = self.locked.len(),
                "in-memory transaction dropped while open, discarding staged writes"
            );
        }
    }
}
