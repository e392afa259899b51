//! Dead-letter replay drill.
//!
//! Lists the dead-letter queue items for one instance and, with `--requeue`,
//! resets them back to `pending` with a clean retry slate so the scheduler
//! picks them up again on its next poll. Grounded in the teacher's
//! operational tooling pattern of a small standalone binary per admin task
//! (see `rebuild_balances`).
//!
//! # Usage
//! ```bash
//! cargo run --bin dlq_replay_drill -- --instance ACME
//! cargo run --bin dlq_replay_drill -- --instance ACME --requeue
//! ```

use std::env;

use ledger_rs::config::Config;
use ledger_rs::repos::{instance_repo, queue_repo};

struct Args {
    instance_address: String,
    requeue: bool,
}

impl Args {
    fn parse() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();
        let mut instance_address = None;
        let mut requeue = false;
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
                "--requeue" => {
                    requeue = true;
                    i += 1;
                }
                other => return Err(format!("unknown argument: {other}")),
            }
        }
        Ok(Args { instance_address: instance_address.ok_or("--instance is required")?, requeue })
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

    let instance = instance_repo::find_by_address(&pool, &args.instance_address)
        .await
        .expect("failed to look up instance")
        .unwrap_or_else(|| panic!("no instance with address {}", args.instance_address));

    let dead_letter_ids = queue_repo::select_dead_letter_for_instance(&pool, instance.id)
        .await
        .expect("failed to list dead-letter items");

    if dead_letter_ids.is_empty() {
        tracing::info!(instance = %args.instance_address, "no dead-letter items");
        return;
    }

    tracing::info!(instance = %args.instance_address, count = dead_letter_ids.len(), "dead-letter items found");
    for id in &dead_letter_ids {
        println!("{id}");
    }

    if !args.requeue {
        tracing::info!("run again with --requeue to reset these items to pending");
        return;
    }

    let mut requeued = 0;
    for id in dead_letter_ids {
        if queue_repo::requeue_dead_letter(&pool, id).await.expect("failed to requeue item") {
            requeued += 1;
        }
    }
    tracing::info!(requeued, "requeue complete");
}
