use tracing::info;

use crate::config::EngineConfig;
use crate::domain::{
    Account, AccountId, Cents, Entry, IntegrityReport, NewAccount, Transfer, TransferId,
    TransferRequest, TransferResult, build_integrity_report,
};
use crate::storage::{LedgerStore, SqliteLedger};

use super::{AppError, TransferOrchestrator};

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, API, etc.).
pub struct LedgerService<S> {
    orchestrator: TransferOrchestrator<S>,
}

/// An account together with its ledger lines
pub struct AccountStatement {
    pub account: Account,
    pub entries: Vec<Entry>,
}

impl LedgerService<SqliteLedger> {
    /// Create the database if needed and bring its schema up to date.
    pub async fn init(config: &EngineConfig) -> Result<Self, AppError> {
        let store = SqliteLedger::init(config).await?;
        Ok(Self::new(store, config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &EngineConfig) -> Result<Self, AppError> {
        let store = SqliteLedger::connect(config, false).await?;
        Ok(Self::new(store, config))
    }
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S, config: &EngineConfig) -> Self {
        let mut orchestrator = TransferOrchestrator::new(store);
        if let Some(timeout) = config.transfer_timeout {
            orchestrator = orchestrator.with_timeout(timeout);
        }
        Self { orchestrator }
    }

    pub fn store(&self) -> &S {
        self.orchestrator.store()
    }

    // ========================
    // Account operations
    // ========================

    /// Open a new account, optionally funded with an opening balance.
    pub async fn open_account(
        &self,
        owner: &str,
        currency: &str,
        opening_balance: Cents,
    ) -> Result<Account, AppError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(AppError::InvalidAccount("owner must not be empty".into()));
        }

        let currency = currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(AppError::InvalidAccount(format!(
                "currency must be a three-letter code, got '{}'",
                currency
            )));
        }

        let account = self
            .store()
            .create_account(&NewAccount::new(owner, currency).with_opening_balance(opening_balance))
            .await?;

        info!(account_id = account.id, owner = %account.owner, "account opened");
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, AppError> {
        Ok(self.store().get_account(id).await?)
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.store().list_accounts().await?)
    }

    /// An account and every entry recorded against it.
    pub async fn account_statement(&self, id: AccountId) -> Result<AccountStatement, AppError> {
        let account = self.store().get_account(id).await?;
        let entries = self.store().list_entries(Some(id)).await?;
        Ok(AccountStatement { account, entries })
    }

    // ========================
    // Transfer operations
    // ========================

    /// Transfer between two accounts of the same currency.
    ///
    /// Currency is checked up front because it never changes; everything
    /// balance-related happens inside the orchestrator's transaction.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Cents,
    ) -> Result<TransferResult, AppError> {
        let request = TransferRequest::new(from, to, amount);
        request
            .validate()
            .map_err(|e| AppError::Transfer(e.into()))?;

        let from_account = self.store().get_account(from).await?;
        let to_account = self.store().get_account(to).await?;
        if from_account.currency != to_account.currency {
            return Err(AppError::CurrencyMismatch {
                from_currency: from_account.currency,
                to_currency: to_account.currency,
            });
        }

        Ok(self.orchestrator.execute(request).await?)
    }

    pub async fn get_transfer(&self, id: TransferId) -> Result<Transfer, AppError> {
        Ok(self.store().get_transfer(id).await?)
    }

    /// List transfers, optionally only those touching one account.
    pub async fn list_transfers(
        &self,
        account_id: Option<AccountId>,
    ) -> Result<Vec<Transfer>, AppError> {
        if let Some(id) = account_id {
            self.store().get_account(id).await?;
        }
        Ok(self.store().list_transfers(account_id).await?)
    }

    // ========================
    // Integrity
    // ========================

    /// Cross-check every account balance against its entries.
    /// Only meaningful while no transfers are in flight.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let accounts = self.store().list_accounts().await?;
        let entries = self.store().list_entries(None).await?;
        let transfers = self.store().list_transfers(None).await?;

        Ok(build_integrity_report(&accounts, &entries, &transfers))
    }
}
