use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::domain::{TransferRequest, TransferResult, ordered_balance_updates};
use crate::storage::{LedgerStore, LedgerTx};

use super::TransferError;

/// Executes transfers as single atomic units of work.
///
/// The orchestrator keeps no mutable state of its own; concurrent callers are
/// coordinated entirely by the store's transactions and row locks, plus the
/// smaller-id-first balance update order.
pub struct TransferOrchestrator<S> {
    store: S,
    transfer_timeout: Option<Duration>,
}

impl<S: LedgerStore> TransferOrchestrator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            transfer_timeout: None,
        }
    }

    /// Roll back any transfer still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Move `request.amount` from one account to the other.
    ///
    /// On success the transfer row, both entries and both balance updates
    /// are committed together. On any error nothing is. Conflicts are
    /// returned to the caller, never retried here.
    pub async fn execute(&self, request: TransferRequest) -> Result<TransferResult, TransferError> {
        match self.transfer_timeout {
            Some(limit) => {
                self.run(request, tokio::time::sleep(limit), TransferError::TimedOut(limit))
                    .await
            }
            None => {
                self.run(request, std::future::pending::<()>(), TransferError::Cancelled)
                    .await
            }
        }
    }

    /// Like [`execute`](Self::execute), but abandons the transfer as soon as
    /// `cancel` completes, even while a statement is waiting on a lock. The
    /// transaction is discarded uncommitted and [`TransferError::Cancelled`]
    /// is returned.
    pub async fn execute_until<F>(
        &self,
        request: TransferRequest,
        cancel: F,
    ) -> Result<TransferResult, TransferError>
    where
        F: Future<Output = ()> + Send,
    {
        self.run(request, cancel, TransferError::Cancelled).await
    }

    #[instrument(
        name = "transfer",
        skip_all,
        fields(
            from = request.from_account_id,
            to = request.to_account_id,
            amount = request.amount
        )
    )]
    async fn run<F>(
        &self,
        request: TransferRequest,
        interrupt: F,
        interrupted: TransferError,
    ) -> Result<TransferResult, TransferError>
    where
        F: Future<Output = ()> + Send,
    {
        request.validate()?;

        let mut tx = self.store.begin().await?;

        let outcome = tokio::select! {
            biased;
            _ = interrupt => None,
            result = apply_transfer(&mut tx, &request) => Some(result),
        };

        let Some(outcome) = outcome else {
            // The connection may still be stuck in the statement we stopped
            // waiting for, and an explicit rollback would queue behind it.
            // Dropping the handle discards the transaction instead.
            drop(tx);
            warn!(error = %interrupted, "transfer abandoned");
            return Err(interrupted);
        };

        match outcome {
            Ok(result) => {
                tx.commit().await?;
                info!(
                    transfer_id = result.transfer.id,
                    from_balance = result.from_account.balance,
                    to_balance = result.to_account.balance,
                    "transfer committed"
                );
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                warn!(error = %err, retryable = err.is_retryable(), "transfer rolled back");
                Err(err)
            }
        }
    }
}

/// The fixed statement sequence of a transfer, run inside `tx`.
async fn apply_transfer<T: LedgerTx>(
    tx: &mut T,
    request: &TransferRequest,
) -> Result<TransferResult, TransferError> {
    let transfer = tx.create_transfer(request).await?;
    let from_entry = tx
        .create_entry(request.from_account_id, -request.amount)
        .await?;
    let to_entry = tx.create_entry(request.to_account_id, request.amount).await?;

    for update in ordered_balance_updates(request) {
        debug!(
            account_id = update.account_id,
            delta = update.delta,
            "applying balance update"
        );
        tx.add_account_balance(update.account_id, update.delta)
            .await?;
    }

    let from_account = tx.get_account(request.from_account_id).await?;
    let to_account = tx.get_account(request.to_account_id).await?;

    Ok(TransferResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}
