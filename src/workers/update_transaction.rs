//! `update_transaction` worker (C7): resolves the dependency on the
//! originating `create_transaction` command (§4.C8), locates the target
//! transaction via `PendingTransactionLookup` (C9), and drives
//! `pending_to_posted` / `pending_to_pending` / `pending_to_archived`
//! through the C3 applier under OCC retry.

use std::sync::Arc;

use chrono::Duration;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{Command, EventMap, TransactionMap};
use crate::errors::{Classify, ErrorKind};
use crate::occ::{process_with_retry, PipelineError};
use crate::pipeline::Pipeline;
use crate::repos::{journal_repo, links_repo, pending_lookup_repo};
use crate::services::dependency_resolution::{self, Resolution};
use crate::services::transaction_applier;
use crate::workers::{from_occ, WorkerOutcome};

#[derive(Default)]
struct Results {
    already_applied: bool,
    transaction_id: Option<Uuid>,
}

pub async fn run(
    pool: &PgPool,
    command: Arc<Command>,
    max_retries: u32,
    retry_interval_ms: u64,
    dependency_retry_delay: Duration,
) -> WorkerOutcome {
    let span = tracing::info_span!(
        "update_transaction",
        command_id = %command.id,
        instance_id = %command.instance_id,
        action = "update_transaction"
    );
    run_inner(pool, command, max_retries, retry_interval_ms, dependency_retry_delay).instrument(span).await
}

async fn run_inner(
    pool: &PgPool,
    command: Arc<Command>,
    max_retries: u32,
    retry_interval_ms: u64,
    dependency_retry_delay: Duration,
) -> WorkerOutcome {
    let EventMap::UpdateTransaction { instance_address, source, source_idempk, payload, .. } = &command.event_map
    else {
        return WorkerOutcome::Failed {
            kind: ErrorKind::Validation,
            message: "event_map is not an update_transaction event".into(),
        };
    };

    let instance = match crate::repos::instance_repo::find_by_address(pool, instance_address).await {
        Ok(Some(i)) => i,
        Ok(None) => {
            return WorkerOutcome::Failed {
                kind: ErrorKind::Validation,
                message: format!("instance not found: {instance_address}"),
            }
        }
        Err(e) => return WorkerOutcome::Failed { kind: ErrorKind::Infrastructure, message: e.to_string() },
    };

    // The create_transaction command must already be processed (§4.C8): it
    // alone is what durably guarantees the target transaction exists.
    let resolution = match dependency_resolution::resolve(
        pool,
        instance.id,
        source,
        source_idempk,
        dependency_retry_delay,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => return WorkerOutcome::Failed { kind: ErrorKind::Infrastructure, message: e.to_string() },
    };
    match resolution {
        Resolution::Proceed { .. } => {}
        Resolution::RevertToPending { retry_after } => return WorkerOutcome::RevertToPending { retry_after },
        Resolution::DeadLetter { reason } => return WorkerOutcome::DeadLetter { reason },
    }

    let lookup = match pool.begin().await {
        Ok(mut tx) => {
            let found = pending_lookup_repo::find_tx(&mut tx, source, source_idempk, instance.id).await;
            let _ = tx.rollback().await;
            found
        }
        Err(e) => return WorkerOutcome::Failed { kind: ErrorKind::Infrastructure, message: e.to_string() },
    };
    let target = match lookup {
        Ok(Some(row)) => row,
        Ok(None) => {
            return WorkerOutcome::DeadLetter {
                reason: "no pending transaction lookup for this update's create counterpart".into(),
            }
        }
        Err(e) => return WorkerOutcome::Failed { kind: ErrorKind::Infrastructure, message: e.to_string() },
    };

    let instance_id = instance.id;
    let transaction_id = target.transaction_id;
    let tmap = TransactionMap {
        status: payload.status,
        effective_at: None,
        entries: payload.entries.clone().unwrap_or_default(),
    };

    let outcome = process_with_retry(max_retries, retry_interval_ms, |_attempt| {
        let pool = pool.clone();
        let command = command.clone();
        let tmap = tmap.clone();
        async move {
            let pipeline = Pipeline::<Results>::builder()
                .step("occable_item", move |_tx, _results: &mut Results| Box::pin(async move { Ok(()) }))
                .step("idempotency", move |tx, results: &mut Results| {
                    let command_id = command.id;
                    Box::pin(async move {
                        if let Some(existing) = links_repo::transaction_for_command_tx(tx, command_id)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?
                        {
                            results.already_applied = true;
                            results.transaction_id = Some(existing);
                        }
                        Ok(())
                    })
                })
                .step("transaction_map", move |_tx, results: &mut Results| {
                    let tmap = tmap.clone();
                    Box::pin(async move {
                        if results.already_applied {
                            return Ok(());
                        }
                        if tmap.status != crate::domain::TransactionStatus::Archived && tmap.entries.len() < 2 {
                            return Err((
                                ErrorKind::BalanceInvariant,
                                format!("a transaction needs at least 2 entries, got {}", tmap.entries.len()),
                            ));
                        }
                        Ok(())
                    })
                })
                .step(crate::pipeline::TRANSACTION_STEP, move |tx, results: &mut Results| {
                    let tmap = tmap.clone();
                    Box::pin(async move {
                        if results.already_applied {
                            return Ok(());
                        }
                        let applied = transaction_applier::update(tx, instance_id, transaction_id, &tmap)
                            .await
                            .map_err(|e| (classify_applier_error(&e), e.to_string()))?;
                        results.transaction_id = Some(applied.transaction_id);
                        Ok(())
                    })
                })
                .step("event_success", move |tx, results: &mut Results| {
                    let command = command.clone();
                    Box::pin(async move {
                        if results.already_applied {
                            return Ok(());
                        }
                        let transaction_id = results.transaction_id.expect("transaction step ran first");
                        let event_id = Uuid::new_v4();
                        journal_repo::insert_tx(tx, event_id, instance_id, &command.event_map)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        links_repo::link_journal_event_command(tx, event_id, command.id)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        links_repo::link_journal_event_transaction(tx, event_id, transaction_id)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        links_repo::link_command_transaction(tx, command.id, transaction_id)
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
            Ok(results.transaction_id.expect("transaction step ran"))
        }
    })
    .await;
    from_occ(outcome)
}

fn classify_applier_error(e: &transaction_applier::ApplierError) -> ErrorKind {
    use transaction_applier::ApplierError::*;
    match e {
        StaleAccount(_) => ErrorKind::StaleAccount,
        Database(_) => ErrorKind::Infrastructure,
        Account(inner) => inner.kind(),
        _ => ErrorKind::BalanceInvariant,
    }
}
