//! `create_account` worker (C7): claims a queued command, resolves its
//! instance, inserts the account row, and records a journal event — all
//! inside one pipeline run.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{Account, Command, EventMap};
use crate::errors::{Classify, ErrorKind};
use crate::occ::{process_with_retry, OccOutcome, PipelineError};
use crate::pipeline::Pipeline;
use crate::repos::{account_repo, instance_repo, journal_repo, links_repo};
use crate::workers::{from_occ, WorkerOutcome};

#[derive(Default)]
struct Results {
    instance_id: Option<Uuid>,
    account_id: Option<Uuid>,
}

/// Runs the full claimed-item attempt loop for one `create_account` command
/// and returns the terminal outcome to the caller (the scheduler), which
/// persists it via `queue_repo::mark_processed_tx` / `record_outcome`.
pub async fn run(pool: &PgPool, command: Arc<Command>, max_retries: u32, retry_interval_ms: u64) -> WorkerOutcome {
    let span = tracing::info_span!(
        "create_account",
        command_id = %command.id,
        instance_id = %command.instance_id,
        action = "create_account"
    );
    run_inner(pool, command, max_retries, retry_interval_ms).instrument(span).await
}

async fn run_inner(pool: &PgPool, command: Arc<Command>, max_retries: u32, retry_interval_ms: u64) -> WorkerOutcome {
    let EventMap::CreateAccount { instance_address, payload, .. } = &command.event_map else {
        return WorkerOutcome::Failed {
            kind: ErrorKind::Validation,
            message: "event_map is not a create_account event".into(),
        };
    };

    let outcome = process_with_retry(max_retries, retry_interval_ms, |_attempt| {
        let pool = pool.clone();
        let command = command.clone();
        let instance_address = instance_address.clone();
        let payload = payload.clone();
        async move {
            let pipeline = Pipeline::<Results>::builder()
                .step("occable_item", move |tx, results: &mut Results| {
                    let instance_address = instance_address.clone();
                    Box::pin(async move {
                        let instance = instance_repo::resolve_tx(tx, &instance_address)
                            .await
                            .map_err(|e| (e.kind(), e.to_string()))?;
                        results.instance_id = Some(instance.id);
                        Ok(())
                    })
                })
                .step("account", move |tx, results: &mut Results| {
                    let payload = payload.clone();
                    Box::pin(async move {
                        let instance_id = results.instance_id.expect("occable_item ran first");
                        let normal_balance =
                            payload.normal_balance.unwrap_or_else(|| payload.account_type.default_normal_balance());
                        let account = Account {
                            id: Uuid::new_v4(),
                            instance_id,
                            address: payload.address.clone(),
                            name: payload.name.clone(),
                            account_type: payload.account_type,
                            normal_balance,
                            currency: payload.currency.clone(),
                            allowed_negative: payload.allowed_negative,
                            description: payload.description.clone(),
                            context: payload.context.clone(),
                            available: 0,
                            posted_amount: 0,
                            posted_debit: 0,
                            posted_credit: 0,
                            pending_amount: 0,
                            pending_debit: 0,
                            pending_credit: 0,
                            lock_version: 0,
                        };
                        account_repo::insert_tx(tx, &account).await.map_err(|e| (e.kind(), e.to_string()))?;
                        results.account_id = Some(account.id);
                        Ok(())
                    })
                })
                .step("event_success", move |tx, results: &mut Results| {
                    let command = command.clone();
                    Box::pin(async move {
                        let instance_id = results.instance_id.expect("occable_item ran first");
                        let account_id = results.account_id.expect("account step ran first");
                        let event_id = Uuid::new_v4();
                        journal_repo::insert_tx(tx, event_id, instance_id, &command.event_map)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        links_repo::link_journal_event_command(tx, event_id, command.id)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        links_repo::link_journal_event_account(tx, event_id, account_id)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        links_repo::link_command_account(tx, command.id, account_id)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        Ok(())
                    })
                })
                .build();

            let mut tx = pool.begin().await.map_err(|e| PipelineError {
                step: "occable_item",
                kind: ErrorKind::Infrastructure,
                message: e.to_string(),
            })?;
            let mut results = Results::default();
            pipeline
                .run(&mut tx, &mut results)
                .await
                .map_err(|(step, kind, message)| PipelineError { step, kind, message })?;
            tx.commit().await.map_err(|e| PipelineError {
                step: "event_success",
                kind: ErrorKind::Infrastructure,
                message: e.to_string(),
            })?;
            Ok(results.account_id.expect("account step ran"))
        }
    })
    .await;
    from_occ(outcome)
}
