//! Balance audit tool.
//!
//! Walks every account's `balance_history_entries` trail and confirms the
//! last snapshot still matches the live `accounts` row (§8 Property 5: the
//! history trail is authoritative and the live row is a cache of its tip).
//! Read-only — a mismatch is reported, never silently repaired, since it
//! means either a bug in `update_balances_tx` or a row edited outside the
//! OCC path.
//!
//! # Usage
//! ```bash
//! cargo run --bin rebuild_balances -- [--instance ADDRESS]
//! ```
//! With no `--instance`, audits every account in the database.

use std::env;

use ledger_rs::config::Config;
use ledger_rs::repos::{account_repo, balance_history_repo, instance_repo};
use uuid::Uuid;

struct Args {
    instance_address: Option<String>,
}

impl Args {
    fn parse() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();
        let mut instance_address = None;
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--instance" => {
                    if i + 1 < args.len() {
                        instance_address = Some(args[i + 1].clone());
                        i += 2;
                    } else {
                        return Err("--instance requires a value".to_string());
                    }
                }
                other => return Err(format!("unknown argument: {other}")),
            }
        }
        Ok(Args { instance_address })
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let config = Config::from_env().expect("failed to load configuration from environment");
    let pool = ledger_rs::db::init_pool(&config.database_url).await.expect("failed to connect to database");

    let accounts = match &args.instance_address {
        Some(address) => {
            let instance = instance_repo::find_by_address(&pool, address)
                .await
                .expect("failed to look up instance")
                .unwrap_or_else(|| panic!("no instance with address {address}"));
            account_repo::list_all(&pool)
                .await
                .expect("failed to list accounts")
                .into_iter()
                .filter(|a| a.instance_id == instance.id)
                .collect::<Vec<_>>()
        }
        None => account_repo::list_all(&pool).await.expect("failed to list accounts"),
    };

    tracing::info!(count = accounts.len(), "auditing accounts");

    let mut mismatches: Vec<Uuid> = Vec::new();
    for account in &accounts {
        let history = balance_history_repo::history_for_account(&pool, account.id)
            .await
            .expect("failed to load balance history");

        let Some(latest) = history.last() else {
            // An account with no history rows has never had a balance
            // mutation applied; that's only valid if it's still at zero.
            if account.available != 0 || account.posted_amount != 0 || account.pending_amount != 0 {
                tracing::error!(account = %account.address, "nonzero balance with no history trail");
                mismatches.push(account.id);
            }
            continue;
        };

        let matches = latest.posted_amount == account.posted_amount
            && latest.posted_debit == account.posted_debit
            && latest.posted_credit == account.posted_credit
            && latest.pending_amount == account.pending_amount
            && latest.pending_debit == account.pending_debit
            && latest.pending_credit == account.pending_credit
            && latest.available == account.available;

        if !matches {
            tracing::error!(
                account = %account.address,
                live_available = account.available,
                history_available = latest.available,
                "account balance diverges from its history trail"
            );
            mismatches.push(account.id);
        }
    }

    if mismatches.is_empty() {
        tracing::info!("all accounts match their balance history trail");
    } else {
        tracing::error!(count = mismatches.len(), "accounts with mismatched balances");
        std::process::exit(1);
    }
}
