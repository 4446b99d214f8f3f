// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ledgerline::application::{TransferError, TransferOrchestrator};
use ledgerline::config::EngineConfig;
use ledgerline::domain::{
    Account, Cents, NewAccount, TransferRequest, TransferResult, build_integrity_report,
};
use ledgerline::storage::{LedgerStore, MemoryLedger, SqliteLedger};
use tempfile::TempDir;

/// Config pointing at a fresh database file inside `temp_dir`
pub fn test_config(temp_dir: &TempDir) -> EngineConfig {
    EngineConfig::with_database(temp_dir.path().join("test.db"))
}

/// Helper to create a migrated SQLite store in a temporary directory
pub async fn sqlite_store() -> Result<(SqliteLedger, TempDir)> {
    let temp_dir = TempDir::new()?;
    let store = SqliteLedger::init(&test_config(&temp_dir)).await?;
    Ok((store, temp_dir))
}

/// Same as [`sqlite_store`] but with a short busy timeout, for conflict tests
pub async fn sqlite_store_with_busy_timeout(timeout: Duration) -> Result<(SqliteLedger, TempDir)> {
    let temp_dir = TempDir::new()?;
    let mut config = test_config(&temp_dir);
    config.busy_timeout = timeout;
    let store = SqliteLedger::init(&config).await?;
    Ok((store, temp_dir))
}

pub fn memory_store() -> MemoryLedger {
    MemoryLedger::new(Duration::from_secs(5))
}

/// Open two USD accounts with the given opening balances
pub async fn open_pair<S: LedgerStore>(
    store: &S,
    first: Cents,
    second: Cents,
) -> Result<(Account, Account)> {
    let x = store
        .create_account(&NewAccount::new("xavier", "USD").with_opening_balance(first))
        .await?;
    let y = store
        .create_account(&NewAccount::new("yolanda", "USD").with_opening_balance(second))
        .await?;
    Ok((x, y))
}

/// Spawn every request as its own task and wait for all of them
pub async fn run_concurrently<S: LedgerStore + 'static>(
    orchestrator: Arc<TransferOrchestrator<S>>,
    requests: Vec<TransferRequest>,
) -> Vec<Result<TransferResult, TransferError>> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.execute(request).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.expect("transfer task panicked"));
    }
    results
}

/// Every account balance equals the sum of its entries
pub async fn assert_ledger_consistent<S: LedgerStore>(store: &S) -> Result<()> {
    let accounts = store.list_accounts().await?;
    let entries = store.list_entries(None).await?;
    let transfers = store.list_transfers(None).await?;

    let report = build_integrity_report(&accounts, &entries, &transfers);
    assert!(report.is_healthy(), "ledger issues: {:?}", report.issues);
    Ok(())
}
