use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Executor, Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::config::EngineConfig;
use crate::domain::{
    Account, AccountId, Cents, Entry, EntryId, NewAccount, Transfer, TransferId, TransferRequest,
};

use super::{
    LedgerStore, LedgerTx, MIGRATION_001_INITIAL, StoreError, is_check_violation,
    is_foreign_key_violation,
};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// Ledger store backed by a SQLite database.
///
/// SQLite transactions are serializable. Writers are serialized by the
/// database write lock, which a transaction waits on for up to the configured
/// busy timeout; a wait that runs out surfaces as [`StoreError::Conflict`].
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database named in `config`.
    /// With `create` set, the file is created if it doesn't exist.
    pub async fn connect(config: &EngineConfig, create: bool) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        debug!(database = %config.database.display(), "connected to ledger database");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &EngineConfig) -> Result<Self, StoreError> {
        let store = Self::connect(config, true).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    type Tx = SqliteTx;

    async fn begin(&self) -> Result<SqliteTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(SqliteTx { tx: Some(tx) })
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query(&format!(
            "INSERT INTO accounts (owner, balance, currency, created_at) VALUES (?, ?, ?, ?) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(&account.owner)
        .bind(account.opening_balance)
        .bind(&account.currency)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;
        let created = row_to_account(&row)?;

        if account.opening_balance != 0 {
            insert_entry(&mut *tx, created.id, account.opening_balance).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        fetch_account(&self.pool, id)
            .await?
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts ORDER BY id",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_account).collect()
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers WHERE id = ?",
            TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_transfer(&row),
            None => Err(StoreError::TransferNotFound(id)),
        }
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM entries WHERE id = ?", ENTRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_entry(&row),
            None => Err(StoreError::EntryNotFound(id)),
        }
    }

    async fn list_entries(&self, account_id: Option<AccountId>) -> Result<Vec<Entry>, StoreError> {
        let rows = match account_id {
            Some(account_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM entries WHERE account_id = ? ORDER BY id",
                    ENTRY_COLUMNS
                ))
                .bind(account_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {} FROM entries ORDER BY id", ENTRY_COLUMNS))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_transfers(
        &self,
        account_id: Option<AccountId>,
    ) -> Result<Vec<Transfer>, StoreError> {
        let rows = match account_id {
            Some(account_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM transfers WHERE from_account_id = ? OR to_account_id = ? ORDER BY id",
                    TRANSFER_COLUMNS
                ))
                .bind(account_id)
                .bind(account_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM transfers ORDER BY id",
                    TRANSFER_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_transfer).collect()
    }
}

/// An open SQLite transaction.
///
/// The wrapped `sqlx` transaction is taken on commit or rollback. If the
/// handle is dropped while still open, `sqlx` rolls it back before the
/// connection is reused.
pub struct SqliteTx {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteTx {
    fn conn(&mut self) -> Result<&mut SqliteConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::TransactionClosed)
    }
}

#[async_trait]
impl LedgerTx for SqliteTx {
    async fn create_transfer(&mut self, request: &TransferRequest) -> Result<Transfer, StoreError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let inserted = sqlx::query(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount, created_at) VALUES (?, ?, ?, ?) RETURNING {}",
            TRANSFER_COLUMNS
        ))
        .bind(request.from_account_id)
        .bind(request.to_account_id)
        .bind(request.amount)
        .bind(&now)
        .fetch_one(&mut *conn)
        .await;

        match inserted {
            Ok(row) => row_to_transfer(&row),
            Err(err) => Err(
                resolve_foreign_key(
                    conn,
                    err,
                    &[request.from_account_id, request.to_account_id],
                )
                .await,
            ),
        }
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Entry, StoreError> {
        let conn = self.conn()?;
        match insert_entry(&mut *conn, account_id, amount).await {
            Ok(entry) => Ok(entry),
            Err(StoreError::Database(err)) => {
                Err(resolve_foreign_key(conn, err, &[account_id]).await)
            }
            Err(err) => Err(err),
        }
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        let conn = self.conn()?;
        fetch_account(conn, id)
            .await?
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Cents,
    ) -> Result<Account, StoreError> {
        let conn = self.conn()?;
        let row = sqlx::query(&format!(
            "UPDATE accounts SET balance = balance + ? WHERE id = ? RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(delta)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|err| {
            if is_check_violation(&err) {
                StoreError::BalanceOverflow(id)
            } else {
                StoreError::from(err)
            }
        })?;

        match row {
            Some(row) => row_to_account(&row),
            None => Err(StoreError::AccountNotFound(id)),
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }
}

async fn fetch_account<'e, E>(executor: E, id: AccountId) -> Result<Option<Account>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM accounts WHERE id = ?",
        ACCOUNT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_account).transpose()
}

async fn insert_entry<'e, E>(
    executor: E,
    account_id: AccountId,
    amount: Cents,
) -> Result<Entry, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = Utc::now().to_rfc3339();
    let row = sqlx::query(&format!(
        "INSERT INTO entries (account_id, amount, created_at) VALUES (?, ?, ?) RETURNING {}",
        ENTRY_COLUMNS
    ))
    .bind(account_id)
    .bind(amount)
    .bind(&now)
    .fetch_one(executor)
    .await
    .map_err(|err| {
        // Keep foreign-key failures raw so the caller can name the missing account.
        if is_foreign_key_violation(&err) {
            StoreError::Database(err)
        } else {
            StoreError::from(err)
        }
    })?;

    row_to_entry(&row)
}

/// Turn a foreign-key failure into `AccountNotFound` for whichever referenced
/// account is missing. The probe runs on the same connection, inside the same
/// transaction as the failed insert.
async fn resolve_foreign_key(
    conn: &mut SqliteConnection,
    err: sqlx::Error,
    account_ids: &[AccountId],
) -> StoreError {
    if !is_foreign_key_violation(&err) {
        return err.into();
    }

    for &id in account_ids {
        match fetch_account(&mut *conn, id).await {
            Ok(None) => return StoreError::AccountNotFound(id),
            Ok(Some(_)) => {}
            Err(probe_err) => return probe_err,
        }
    }

    err.into()
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid {} '{}': {}", column, value, e)))
}

fn row_to_account(row: &SqliteRow) -> Result<Account, StoreError> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Account {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        balance: row.try_get("balance")?,
        currency: row.try_get("currency")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<Entry, StoreError> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Entry {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        amount: row.try_get("amount")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

fn row_to_transfer(row: &SqliteRow) -> Result<Transfer, StoreError> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Transfer {
        id: row.try_get("id")?,
        from_account_id: row.try_get("from_account_id")?,
        to_account_id: row.try_get("to_account_id")?,
        amount: row.try_get("amount")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}
