mod common;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use common::{assert_ledger_consistent, memory_store, open_pair, run_concurrently, sqlite_store};
use ledgerline::application::TransferOrchestrator;
use ledgerline::domain::{NewAccount, TransferRequest, compute_balance};
use ledgerline::storage::LedgerStore;

// ========================
// Properties, run against every backend
// ========================

/// n concurrent transfers of the same amount each observe a distinct
/// multiple of that amount in their post-transfer balances.
async fn concurrent_transfers_see_distinct_progress<S: LedgerStore + 'static>(store: S) -> Result<()> {
    let (x, y) = open_pair(&store, 100, 50).await?;
    let orchestrator = Arc::new(TransferOrchestrator::new(store));

    let n = 5;
    let amount = 10;
    let requests = vec![TransferRequest::new(x.id, y.id, amount); n];
    let results = run_concurrently(Arc::clone(&orchestrator), requests).await;

    let mut seen = HashSet::new();
    for result in results {
        let result = result?;
        let store = orchestrator.store();

        // Every returned record was actually persisted
        assert_eq!(store.get_transfer(result.transfer.id).await?, result.transfer);
        assert_eq!(store.get_entry(result.from_entry.id).await?, result.from_entry);
        assert_eq!(store.get_entry(result.to_entry.id).await?, result.to_entry);

        assert_eq!(result.transfer.from_account_id, x.id);
        assert_eq!(result.transfer.to_account_id, y.id);
        assert_eq!(result.transfer.amount, amount);
        assert_eq!(result.from_entry.account_id, x.id);
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(result.to_entry.account_id, y.id);
        assert_eq!(result.to_entry.amount, amount);

        let debited = x.balance - result.from_account.balance;
        let credited = result.to_account.balance - y.balance;
        assert_eq!(debited, credited);
        assert!(debited > 0);
        assert_eq!(debited % amount, 0);

        let k = debited / amount;
        assert!((1..=n as i64).contains(&k), "k = {} out of range", k);
        assert!(seen.insert(k), "two transfers observed k = {}", k);
    }
    assert_eq!(seen.len(), n);

    let store = orchestrator.store();
    assert_eq!(store.get_account(x.id).await?.balance, x.balance - n as i64 * amount);
    assert_eq!(store.get_account(y.id).await?.balance, y.balance + n as i64 * amount);
    assert_ledger_consistent(store).await
}

/// Transfers in both directions over the same pair all complete.
async fn opposing_transfers_do_not_deadlock<S: LedgerStore + 'static>(store: S) -> Result<()> {
    let (x, y) = open_pair(&store, 100, 100).await?;
    let orchestrator = Arc::new(TransferOrchestrator::new(store));

    let amount = 10;
    let requests: Vec<_> = (0..10)
        .map(|i| {
            if i % 2 == 0 {
                TransferRequest::new(x.id, y.id, amount)
            } else {
                TransferRequest::new(y.id, x.id, amount)
            }
        })
        .collect();

    let results = run_concurrently(Arc::clone(&orchestrator), requests).await;
    for result in results {
        result?;
    }

    let store = orchestrator.store();
    assert_eq!(store.get_account(x.id).await?.balance, x.balance);
    assert_eq!(store.get_account(y.id).await?.balance, y.balance);
    assert_eq!(store.list_transfers(None).await?.len(), 10);
    assert_ledger_consistent(store).await
}

/// Five transfers of 10 from X(100) to Y(50).
async fn five_transfers_scenario<S: LedgerStore + 'static>(store: S) -> Result<()> {
    let (x, y) = open_pair(&store, 100, 50).await?;
    let entries_before = store.list_entries(None).await?.len();
    let orchestrator = Arc::new(TransferOrchestrator::new(store));

    let requests = vec![TransferRequest::new(x.id, y.id, 10); 5];
    for result in run_concurrently(Arc::clone(&orchestrator), requests).await {
        result?;
    }

    let store = orchestrator.store();
    assert_eq!(store.get_account(x.id).await?.balance, 50);
    assert_eq!(store.get_account(y.id).await?.balance, 100);
    assert_eq!(store.list_transfers(None).await?.len(), 5);
    assert_eq!(store.list_entries(None).await?.len() - entries_before, 10);

    for account in [x.id, y.id] {
        let entries = store.list_entries(Some(account)).await?;
        assert_eq!(
            compute_balance(account, &entries),
            store.get_account(account).await?.balance
        );
    }
    assert_ledger_consistent(store).await
}

/// A transfer adds exactly one entry per side and shifts both balances by the amount.
async fn single_transfer_keeps_ledger_identity<S: LedgerStore + 'static>(store: S) -> Result<()> {
    let (x, y) = open_pair(&store, 300, 0).await?;
    let orchestrator = TransferOrchestrator::new(store);

    let result = orchestrator.execute(TransferRequest::new(x.id, y.id, 125)).await?;
    assert_eq!(result.from_account.balance, 175);
    assert_eq!(result.to_account.balance, 125);

    let store = orchestrator.store();
    let x_entries = store.list_entries(Some(x.id)).await?;
    let y_entries = store.list_entries(Some(y.id)).await?;
    assert!(x_entries.iter().any(|e| e.id == result.from_entry.id && e.amount == -125));
    assert!(y_entries.iter().any(|e| e.id == result.to_entry.id && e.amount == 125));
    assert_eq!(compute_balance(x.id, &x_entries), 175);
    assert_eq!(compute_balance(y.id, &y_entries), 125);

    let touching_y = store.list_transfers(Some(y.id)).await?;
    assert_eq!(touching_y, vec![result.transfer]);
    Ok(())
}

/// Many transfers around a ring of accounts conserve the total.
async fn ring_of_transfers_conserves_total<S: LedgerStore + 'static>(store: S) -> Result<()> {
    let mut accounts = Vec::new();
    for owner in ["ann", "ben", "cat", "dan"] {
        accounts.push(
            store
                .create_account(&NewAccount::new(owner, "USD").with_opening_balance(1_000))
                .await?,
        );
    }
    let orchestrator = Arc::new(TransferOrchestrator::new(store));

    let requests: Vec<_> = (0..40)
        .map(|i| {
            let from = &accounts[i % accounts.len()];
            let to = &accounts[(i + 1 + i / accounts.len()) % accounts.len()];
            let to = if to.id == from.id { &accounts[(i + 2) % accounts.len()] } else { to };
            TransferRequest::new(from.id, to.id, (i as i64 % 7) + 1)
        })
        .collect();

    for result in run_concurrently(Arc::clone(&orchestrator), requests).await {
        result?;
    }

    let store = orchestrator.store();
    let total: i64 = store.list_accounts().await?.iter().map(|a| a.balance).sum();
    assert_eq!(total, 4_000);
    assert_eq!(store.list_transfers(None).await?.len(), 40);
    assert_ledger_consistent(store).await
}

// ========================
// SQLite
// ========================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_transfers_see_distinct_progress() -> Result<()> {
    let (store, _temp_dir) = sqlite_store().await?;
    concurrent_transfers_see_distinct_progress(store).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_opposing_transfers_do_not_deadlock() -> Result<()> {
    let (store, _temp_dir) = sqlite_store().await?;
    opposing_transfers_do_not_deadlock(store).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_five_transfers_scenario() -> Result<()> {
    let (store, _temp_dir) = sqlite_store().await?;
    five_transfers_scenario(store).await
}

#[tokio::test]
async fn test_sqlite_single_transfer_keeps_ledger_identity() -> Result<()> {
    let (store, _temp_dir) = sqlite_store().await?;
    single_transfer_keeps_ledger_identity(store).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_ring_of_transfers_conserves_total() -> Result<()> {
    let (store, _temp_dir) = sqlite_store().await?;
    ring_of_transfers_conserves_total(store).await
}

// ========================
// In-memory
// ========================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_transfers_see_distinct_progress() -> Result<()> {
    concurrent_transfers_see_distinct_progress(memory_store()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_opposing_transfers_do_not_deadlock() -> Result<()> {
    opposing_transfers_do_not_deadlock(memory_store()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_five_transfers_scenario() -> Result<()> {
    five_transfers_scenario(memory_store()).await
}

#[tokio::test]
async fn test_memory_single_transfer_keeps_ledger_identity() -> Result<()> {
    single_transfer_keeps_ledger_identity(memory_store()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_ring_of_transfers_conserves_total() -> Result<()> {
    ring_of_transfers_conserves_total(memory_store()).await
}
