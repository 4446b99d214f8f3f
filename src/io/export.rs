use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{Account, AccountId, Cents, Entry, format_cents};
use crate::storage::LedgerStore;

/// Account statement for JSON export
#[derive(Debug, Clone, Serialize)]
pub struct StatementSnapshot {
    pub exported_at: DateTime<Utc>,
    pub account: Account,
    pub entries: Vec<StatementLine>,
}

/// One entry with the balance it left the account at
#[derive(Debug, Clone, Serialize)]
pub struct StatementLine {
    #[serde(flatten)]
    pub entry: Entry,
    pub running_balance: Cents,
}

/// Exporter for writing account statements in various formats
pub struct Exporter<'a, S> {
    service: &'a LedgerService<S>,
}

impl<'a, S: LedgerStore> Exporter<'a, S> {
    pub fn new(service: &'a LedgerService<S>) -> Self {
        Self { service }
    }

    async fn statement_lines(&self, account_id: AccountId) -> Result<(Account, Vec<StatementLine>)> {
        let statement = self.service.account_statement(account_id).await?;

        let mut running_balance: Cents = 0;
        let lines = statement
            .entries
            .into_iter()
            .map(|entry| {
                running_balance += entry.amount;
                StatementLine {
                    entry,
                    running_balance,
                }
            })
            .collect();

        Ok((statement.account, lines))
    }

    /// Export an account's entries to CSV. Returns the number of rows written.
    pub async fn export_statement_csv<W: Write>(
        &self,
        account_id: AccountId,
        writer: W,
    ) -> Result<usize> {
        let (account, lines) = self.statement_lines(account_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "entry_id",
            "account_id",
            "created_at",
            "amount",
            "running_balance",
            "currency",
        ])?;

        for line in &lines {
            csv_writer.write_record([
                line.entry.id.to_string(),
                line.entry.account_id.to_string(),
                line.entry.created_at.to_rfc3339(),
                format_cents(line.entry.amount),
                format_cents(line.running_balance),
                account.currency.clone(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(lines.len())
    }

    /// Export an account and its entries as pretty-printed JSON.
    pub async fn export_statement_json<W: Write>(
        &self,
        account_id: AccountId,
        mut writer: W,
    ) -> Result<usize> {
        let (account, entries) = self.statement_lines(account_id).await?;
        let count = entries.len();

        let snapshot = StatementSnapshot {
            exported_at: Utc::now(),
            account,
            entries,
        };

        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writeln!(writer)?;
        Ok(count)
    }
}
