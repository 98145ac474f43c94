use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{HistoryPage, WalletService};
use crate::domain::{format_cents, parse_cents, UserId};

/// Bursa - Wallet Ledger
#[derive(Parser)]
#[command(name = "bursa")]
#[command(about = "A wallet ledger with optimistic concurrency and an append-only purchase history")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "bursa.db")]
    pub database: String,

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

    /// Register a user and create their wallet at balance 0
    Register {
        /// User ID (UUID, generated when omitted)
        user: Option<String>,
    },

    /// Show a user's current balance
    Balance {
        /// User ID
        user: String,
    },

    /// Credit a user's wallet
    Credit {
        /// User ID
        user: String,

        /// Amount to credit (e.g., "50.00" or "50")
        amount: String,

        /// Idempotency reference (e.g., an order ID); repeating a
        /// reference returns the recorded result instead of re-applying
        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Debit a user's wallet
    Debit {
        /// User ID
        user: String,

        /// Amount to debit (e.g., "50.00" or "50")
        amount: String,

        /// Idempotency reference (e.g., an order ID)
        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Archive a user's wallet (blocks further updates, keeps history)
    Archive {
        /// User ID
        user: String,
    },

    /// List purchase history, newest first
    History {
        /// Filter by user ID (omit for all users)
        #[arg(long)]
        user: Option<String>,

        /// Entries per page
        #[arg(long)]
        page_size: Option<usize>,

        /// Resume from a page token printed by a previous run
        #[arg(long)]
        page_token: Option<String>,

        /// Follow page tokens until the history is exhausted
        #[arg(long)]
        all: bool,
    },

    /// Verify that a wallet's history replays to its stored balance
    Verify {
        /// User ID
        user: String,
    },

    /// Export history to CSV
    Export {
        /// Filter by user ID (omit for all users)
        #[arg(long)]
        user: Option<String>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn parse_user(input: &str) -> Result<UserId> {
    Uuid::parse_str(input).context("Invalid user ID format (expected UUID)")
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                WalletService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Register { user } => {
                let service = WalletService::connect(&self.database).await?;
                let user_id = match user {
                    Some(input) => parse_user(&input)?,
                    None => Uuid::new_v4(),
                };
                let wallet = service.register_user(user_id).await?;
                println!("Registered user: {}", wallet.user_id);
                println!("Balance: {}", format_cents(wallet.balance));
            }

            Commands::Balance { user } => {
                let service = WalletService::connect(&self.database).await?;
                let balance = service.get_balance(parse_user(&user)?).await?;
                println!("{}", format_cents(balance));
            }

            Commands::Credit {
                user,
                amount,
                reference,
            } => {
                let service = WalletService::connect(&self.database).await?;
                run_update_command(&service, &user, &amount, reference.as_deref(), 1).await?;
            }

            Commands::Debit {
                user,
                amount,
                reference,
            } => {
                let service = WalletService::connect(&self.database).await?;
                run_update_command(&service, &user, &amount, reference.as_deref(), -1).await?;
            }

            Commands::Archive { user } => {
                let service = WalletService::connect(&self.database).await?;
                let user_id = parse_user(&user)?;
                service.archive_user(user_id).await?;
                println!("Archived wallet for user: {}", user_id);
            }

            Commands::History {
                user,
                page_size,
                page_token,
                all,
            } => {
                let service = WalletService::connect(&self.database).await?;
                let user_id = user.as_deref().map(parse_user).transpose()?;
                run_history_command(&service, user_id, page_size, page_token, all).await?;
            }

            Commands::Verify { user } => {
                let service = WalletService::connect(&self.database).await?;
                let report = service.verify_integrity(parse_user(&user)?).await?;

                println!("Wallet: {}", report.user_id);
                println!("  Entries:          {}", report.entry_count);
                println!("  Stored balance:   {}", format_cents(report.stored_balance));
                println!(
                    "  Replayed balance: {}",
                    format_cents(report.replayed_balance)
                );
                if report.is_consistent() {
                    println!("  Status:           OK");
                } else {
                    println!("  Status:           INCONSISTENT");
                    if report.went_negative {
                        println!("  Balance went negative during replay");
                    }
                    std::process::exit(1);
                }
            }

            Commands::Export { user, output } => {
                let service = WalletService::connect(&self.database).await?;
                let user_id = user.as_deref().map(parse_user).transpose()?;
                run_export_command(&service, user_id, output.as_deref()).await?;
            }
        }

        Ok(())
    }
}

async fn run_update_command(
    service: &WalletService,
    user: &str,
    amount: &str,
    reference: Option<&str>,
    sign: i64,
) -> Result<()> {
    let user_id = parse_user(user)?;
    let cents = parse_cents(amount).context("Invalid amount format. Use '50.00' or '50'")?;
    if cents <= 0 {
        anyhow::bail!("Amount must be positive; use credit/debit to pick the direction");
    }

    let outcome = service
        .update_balance(user_id, sign * cents, reference)
        .await?;

    let verb = if sign > 0 { "Credited" } else { "Debited" };
    println!(
        "{} {}: new balance {} (entry {})",
        verb,
        format_cents(cents),
        format_cents(outcome.balance),
        outcome.entry_id
    );
    Ok(())
}

async fn run_history_command(
    service: &WalletService,
    user_id: Option<UserId>,
    page_size: Option<usize>,
    page_token: Option<String>,
    all: bool,
) -> Result<()> {
    let reader = service.history();
    let mut token = page_token;
    let mut total = 0usize;

    loop {
        let page: HistoryPage = match user_id {
            Some(uid) => reader.list_history(uid, token.as_deref(), page_size).await?,
            None => reader.list_all_history(token.as_deref(), page_size).await?,
        };

        if page.entries.is_empty() && total == 0 {
            println!("No history entries found.");
            return Ok(());
        }

        if total == 0 {
            println!(
                "{:<36} {:<36} {:>12} {:>12}  {:<20} {}",
                "ENTRY", "USER", "DELTA", "BALANCE", "TIMESTAMP", "REFERENCE"
            );
            println!("{}", "-".repeat(140));
        }

        for entry in &page.entries {
            println!(
                "{:<36} {:<36} {:>12} {:>12}  {:<20} {}",
                entry.id,
                entry.user_id,
                format_cents(entry.delta_cents),
                format_cents(entry.balance_after),
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.reference.as_deref().unwrap_or("-")
            );
            total += 1;
        }

        match page.next_page_token {
            Some(next) if all => token = Some(next),
            Some(next) => {
                println!();
                println!("Next page token: {}", next);
                return Ok(());
            }
            None => return Ok(()),
        }
    }
}

async fn run_export_command(
    service: &WalletService,
    user_id: Option<UserId>,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let reader = service.history();
    let exporter = Exporter::new(&reader);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = exporter.export_history_csv(user_id, writer).await?;
    if let Some(path) = output {
        eprintln!("Exported {} entries to {}", count, path);
    }
    Ok(())
}
