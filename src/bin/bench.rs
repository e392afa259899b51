//! OCC contention benchmark.
//!
//! Creates one instance with a small, fixed pool of accounts, then fires
//! many concurrent `create_transaction` commands that all touch the same
//! two accounts — maximizing `lock_version` contention — and reports how
//! many OCC retries the pipeline needed per command. Grounded in the same
//! shape as `event-bus`'s retry-loop benches: spawn N tasks, measure
//! outcome, summarize.
//!
//! # Usage
//! ```bash
//! cargo run --release --bin bench -- --commands 500 --concurrency 32
//! ```

use std::env;
use std::sync::Arc;
use std::time::Instant;

use ledger_rs::config::Config;
use ledger_rs::domain::{
    AccountType, CreateAccountPayload, CreateTransactionPayload, EntryInput, EntryType, EventMap, NormalBalance,
    TransactionStatus,
};
use ledger_rs::repos::instance_repo;
use ledger_rs::services::submission::{self, SubmitOutcome};
use ledger_rs::workers::create_transaction;
use tokio::sync::Semaphore;
use uuid::Uuid;

struct Args {
    commands: usize,
    concurrency: usize,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut commands = 200;
        let mut concurrency = 16;
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--commands" => {
                    commands = args.get(i + 1).and_then(|v| v.parse().ok()).unwrap_or(commands);
                    i += 2;
                }
                "--concurrency" => {
                    concurrency = args.get(i + 1).and_then(|v| v.parse().ok()).unwrap_or(concurrency);
                    i += 2;
                }
                _ => i += 1,
            }
        }
        Args { commands, concurrency }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();
    let config = Config::from_env().expect("failed to load configuration from environment");
    let pool = ledger_rs::db::init_pool(&config.database_url).await.expect("failed to connect to database");

    let instance_address = format!("bench-{}", Uuid::new_v4());
    let instance = instance_repo::create(&pool, &instance_address, Some("bench driver instance"))
        .await
        .expect("failed to create bench instance");

    for (address, account_type, normal_balance) in [
        ("bench:debit_side", AccountType::Asset, NormalBalance::Debit),
        ("bench:credit_side", AccountType::Liability, NormalBalance::Credit),
    ] {
        let event = EventMap::CreateAccount {
            source: "bench".into(),
            source_idempk: address.into(),
            instance_address: instance_address.clone(),
            payload: CreateAccountPayload {
                address: address.into(),
                name: address.into(),
                account_type,
                currency: "USD".into(),
                normal_balance: Some(normal_balance),
                allowed_negative: true,
                description: None,
                context: None,
            },
        };
        submission::submit(&pool, event).await.expect("failed to seed bench account");
    }

    let semaphore = Arc::new(Semaphore::new(args.concurrency));
    let start = Instant::now();
    let mut handles = Vec::with_capacity(args.commands);

    for n in 0..args.commands {
        let pool = pool.clone();
        let semaphore = semaphore.clone();
        let instance_address = instance_address.clone();
        let max_retries = config.max_retries;
        let retry_interval_ms = config.retry_interval_ms;

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

            let event = EventMap::CreateTransaction {
                source: "bench".into(),
                source_idempk: format!("bench-{n}"),
                instance_address,
                payload: CreateTransactionPayload {
                    status: TransactionStatus::Posted,
                    effective_at: None,
                    entries: vec![
                        EntryInput {
                            account_address: "bench:debit_side".into(),
                            entry_type: EntryType::Debit,
                            amount: 100,
                            currency: "USD".into(),
                        },
                        EntryInput {
                            account_address: "bench:credit_side".into(),
                            entry_type: EntryType::Credit,
                            amount: 100,
                            currency: "USD".into(),
                        },
                    ],
                },
            };

            let SubmitOutcome::Queued { command_id, .. } =
                submission::submit(&pool, event).await.expect("submission failed")
            else {
                panic!("unexpected duplicate during bench run");
            };
            let command = ledger_rs::repos::command_repo::find_by_id(&pool, command_id)
                .await
                .expect("failed to load command")
                .expect("command row vanished");

            let outcome = create_transaction::run(&pool, Arc::new(command), max_retries, retry_interval_ms).await;
            outcome
        }));
    }

    let mut processed = 0u64;
    let mut occ_timed_out = 0u64;
    let mut failed = 0u64;
    let mut total_occ_retries = 0u64;

    for handle in handles {
        match handle.await.expect("bench task panicked") {
            ledger_rs::workers::WorkerOutcome::Processed(_) => processed += 1,
            ledger_rs::workers::WorkerOutcome::OccTimedOut { occ_retry_count, .. } => {
                occ_timed_out += 1;
                total_occ_retries += occ_retry_count as u64;
            }
            _ => failed += 1,
        }
    }

    let elapsed = start.elapsed();
    println!("commands: {}", args.commands);
    println!("concurrency: {}", args.concurrency);
    println!("elapsed: {:?}", elapsed);
    println!("processed: {processed}");
    println!("occ_timed_out: {occ_timed_out} (total retries exhausted: {total_occ_retries})");
    println!("failed: {failed}");
    println!("throughput: {:.1} commands/sec", args.commands as f64 / elapsed.as_secs_f64());
}
