use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter};

use crate::application::LedgerService;
use crate::config::{EngineArgs, EngineConfig};
use crate::domain::{AccountId, TransferId, format_cents, parse_cents};
use crate::io::Exporter;
use crate::storage::SqliteLedger;

/// Ledgerline - double-entry funds transfers
#[derive(Parser)]
#[command(name = "ledgerline")]
#[command(about = "Move funds between accounts with an append-only, double-entry ledger")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Transfer funds between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account id
        #[arg(long)]
        from: AccountId,

        /// Destination account id
        #[arg(long)]
        to: AccountId,
    },

    /// List the ledger entries of an account
    Entries {
        /// Account id
        account: AccountId,
    },

    /// List transfers
    Transfers {
        /// Only transfers touching this account
        #[arg(long)]
        account: Option<AccountId>,
    },

    /// Show a single transfer
    ShowTransfer {
        /// Transfer id
        id: TransferId,
    },

    /// Verify that every balance matches its entries
    Check,

    /// Export an account statement to CSV or JSON
    Export {
        /// Account id
        account: AccountId,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Open {
        /// Account owner
        owner: String,

        /// Currency code (e.g., USD, EUR)
        #[arg(short, long, default_value = "USD")]
        currency: String,

        /// Opening balance (e.g., "100.00")
        #[arg(short, long)]
        balance: Option<String>,
    },

    /// List all accounts
    List,

    /// Show one account
    Show {
        /// Account id
        id: AccountId,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = EngineConfig::from(self.engine);

        match self.command {
            Commands::Init => {
                LedgerService::init(&config).await?;
                println!("Database initialized: {}", config.database.display());
            }

            Commands::Account(account_cmd) => {
                let service = connect(&config).await?;
                run_account_command(&service, account_cmd).await?;
            }

            Commands::Transfer { amount, from, to } => {
                let service = connect(&config).await?;
                let amount =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;

                let result = service.transfer(from, to, amount).await?;

                println!(
                    "Transfer {}: {} from account {} to account {}",
                    result.transfer.id,
                    format_cents(result.transfer.amount),
                    result.from_account.id,
                    result.to_account.id
                );
                println!(
                    "  Account {} balance: {} {}",
                    result.from_account.id,
                    format_cents(result.from_account.balance),
                    result.from_account.currency
                );
                println!(
                    "  Account {} balance: {} {}",
                    result.to_account.id,
                    format_cents(result.to_account.balance),
                    result.to_account.currency
                );
            }

            Commands::Entries { account } => {
                let service = connect(&config).await?;
                run_entries_command(&service, account).await?;
            }

            Commands::Transfers { account } => {
                let service = connect(&config).await?;
                run_transfers_command(&service, account).await?;
            }

            Commands::ShowTransfer { id } => {
                let service = connect(&config).await?;
                let transfer = service.get_transfer(id).await?;

                println!("Transfer: {}", transfer.id);
                println!(
                    "  Date:   {}",
                    transfer.created_at.format("%Y-%m-%d %H:%M:%S")
                );
                println!("  From:   {}", transfer.from_account_id);
                println!("  To:     {}", transfer.to_account_id);
                println!("  Amount: {}", format_cents(transfer.amount));
            }

            Commands::Check => {
                let service = connect(&config).await?;
                run_check_command(&service).await?;
            }

            Commands::Export {
                account,
                output,
                format,
            } => {
                let service = connect(&config).await?;
                run_export_command(&service, account, output, &format).await?;
            }
        }

        Ok(())
    }
}

async fn connect(config: &EngineConfig) -> Result<LedgerService<SqliteLedger>> {
    LedgerService::connect(config).await.with_context(|| {
        format!(
            "Failed to open {} (run `ledgerline init` first)",
            config.database.display()
        )
    })
}

async fn run_account_command(
    service: &LedgerService<SqliteLedger>,
    cmd: AccountCommands,
) -> Result<()> {
    match cmd {
        AccountCommands::Open {
            owner,
            currency,
            balance,
        } => {
            let opening_balance = balance
                .map(|b| parse_cents(&b))
                .transpose()
                .context("Invalid opening balance. Use '100.00' or '100'")?
                .unwrap_or(0);

            let account = service
                .open_account(&owner, &currency, opening_balance)
                .await?;
            println!(
                "Opened account {} for {} ({} {})",
                account.id,
                account.owner,
                format_cents(account.balance),
                account.currency
            );
        }

        AccountCommands::List => {
            let accounts = service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<8} {:<20} {:>14} {:<8}",
                    "ID", "OWNER", "BALANCE", "CURRENCY"
                );
                println!("{}", "-".repeat(53));
                for account in accounts {
                    println!(
                        "{:<8} {:<20} {:>14} {:<8}",
                        account.id,
                        account.owner,
                        format_cents(account.balance),
                        account.currency
                    );
                }
            }
        }

        AccountCommands::Show { id } => {
            let account = service.get_account(id).await?;
            println!("Account: {}", account.id);
            println!("  Owner:    {}", account.owner);
            println!(
                "  Balance:  {} {}",
                format_cents(account.balance),
                account.currency
            );
            println!(
                "  Opened:   {}",
                account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}

async fn run_entries_command(
    service: &LedgerService<SqliteLedger>,
    account_id: AccountId,
) -> Result<()> {
    let statement = service.account_statement(account_id).await?;

    if statement.entries.is_empty() {
        println!("No entries for account {}.", account_id);
        return Ok(());
    }

    println!("{:<8} {:<20} {:>14}", "ID", "DATE", "AMOUNT");
    println!("{}", "-".repeat(44));
    for entry in &statement.entries {
        println!(
            "{:<8} {:<20} {:>14}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_cents(entry.amount)
        );
    }
    println!("{}", "-".repeat(44));
    println!(
        "{:<29} {:>14} {}",
        "Balance:",
        format_cents(statement.account.balance),
        statement.account.currency
    );

    Ok(())
}

async fn run_transfers_command(
    service: &LedgerService<SqliteLedger>,
    account: Option<AccountId>,
) -> Result<()> {
    let transfers = service.list_transfers(account).await?;

    if transfers.is_empty() {
        println!("No transfers found.");
        return Ok(());
    }

    println!(
        "{:<8} {:<20} {:>8} {:>8} {:>14}",
        "ID", "DATE", "FROM", "TO", "AMOUNT"
    );
    println!("{}", "-".repeat(62));
    for transfer in transfers {
        println!(
            "{:<8} {:<20} {:>8} {:>8} {:>14}",
            transfer.id,
            transfer.created_at.format("%Y-%m-%d %H:%M:%S"),
            transfer.from_account_id,
            transfer.to_account_id,
            format_cents(transfer.amount)
        );
    }

    Ok(())
}

async fn run_check_command(service: &LedgerService<SqliteLedger>) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Accounts:  {}", report.account_count);
    println!("Entries:   {}", report.entry_count);
    println!("Transfers: {}", report.transfer_count);
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(
    service: &LedgerService<SqliteLedger>,
    account: AccountId,
    output: Option<String>,
    format: &str,
) -> Result<()> {
    let exporter = Exporter::new(service);

    let count = match output {
        Some(ref path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file '{}'", path))?;
            let writer = BufWriter::new(file);
            match format {
                "csv" => exporter.export_statement_csv(account, writer).await?,
                "json" => exporter.export_statement_json(account, writer).await?,
                other => anyhow::bail!("Unknown export format '{}'. Use csv or json", other),
            }
        }
        None => {
            let writer = io::stdout();
            match format {
                "csv" => exporter.export_statement_csv(account, writer).await?,
                "json" => exporter.export_statement_json(account, writer).await?,
                other => anyhow::bail!("Unknown export format '{}'. Use csv or json", other),
            }
        }
    };

    if let Some(path) = output {
        eprintln!("Exported {} entries to {}", count, path);
    }

    Ok(())
}
