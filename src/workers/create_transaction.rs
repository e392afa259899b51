//! `create_transaction` worker (C7): resolves account addresses, applies the
//! double-entry invariant via the C3 applier under OCC retry, and — when the
//! created transaction is `pending` — records a `PendingTransactionLookup`
//! row so a later `update_transaction` can find it without scanning.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{Command, EventMap, TransactionMap, TransactionStatus};
use crate::errors::{Classify, ErrorKind};
use crate::occ::{process_with_retry, PipelineError};
use crate::pipeline::Pipeline;
use crate::repos::{instance_repo, journal_repo, links_repo, pending_lookup_repo};
use crate::services::transaction_applier;
use crate::workers::{from_occ, WorkerOutcome};

#[derive(Default)]
struct Results {
    instance_id: Option<Uuid>,
    already_applied: bool,
    transaction_id: Option<Uuid>,
    status: Option<TransactionStatus>,
}

pub async fn run(pool: &PgPool, command: Arc<Command>, max_retries: u32, retry_interval_ms: u64) -> WorkerOutcome {
    let span = tracing::info_span!(
        "create_transaction",
        command_id = %command.id,
        instance_id = %command.instance_id,
        action = "create_transaction"
    );
    run_inner(pool, command, max_retries, retry_interval_ms).instrument(span).await
}

async fn run_inner(pool: &PgPool, command: Arc<Command>, max_retries: u32, retry_interval_ms: u64) -> WorkerOutcome {
    let EventMap::CreateTransaction { instance_address, source, source_idempk, payload, .. } = &command.event_map
    else {
        return WorkerOutcome::Failed {
            kind: ErrorKind::Validation,
            message: "event_map is not a create_transaction event".into(),
        };
    };

    let transaction_id = Uuid::new_v4();
    let tmap = TransactionMap {
        status: payload.status,
        effective_at: payload.effective_at,
        entries: payload.entries.clone(),
    };

    let outcome = process_with_retry(max_retries, retry_interval_ms, |_attempt| {
        let pool = pool.clone();
        let command = command.clone();
        let instance_address = instance_address.clone();
        let source = source.clone();
        let source_idempk = source_idempk.clone();
        let tmap = tmap.clone();
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
                        if tmap.status == TransactionStatus::Archived {
                            return Err((ErrorKind::BalanceInvariant, "cannot create a transaction directly in archived status".to_string()));
                        }
                        if tmap.entries.len() < 2 {
                            return Err((
                                ErrorKind::BalanceInvariant,
                                format!("a transaction needs at least 2 entries, got {}", tmap.entries.len()),
                            ));
                        }
                        results.status = Some(tmap.status);
                        Ok(())
                    })
                })
                .step(crate::pipeline::TRANSACTION_STEP, move |tx, results: &mut Results| {
                    let tmap = tmap.clone();
                    Box::pin(async move {
                        if results.already_applied {
                            return Ok(());
                        }
                        let instance_id = results.instance_id.expect("occable_item ran first");
                        let applied = transaction_applier::create(tx, instance_id, transaction_id, &tmap)
                            .await
                            .map_err(|e| (classify_applier_error(&e), e.to_string()))?;
                        results.transaction_id = Some(applied.transaction_id);
                        results.status = Some(applied.status);
                        Ok(())
                    })
                })
                .step("event_success", move |tx, results: &mut Results| {
                    let command = command.clone();
                    let source = source.clone();
                    let source_idempk = source_idempk.clone();
                    Box::pin(async move {
                        let instance_id = results.instance_id.expect("occable_item ran first");
                        let transaction_id = results.transaction_id.expect("transaction step ran first");
                        let status = results.status.expect("transaction step ran first");

                        if results.already_applied {
                            return Ok(());
                        }

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

                        if status == TransactionStatus::Pending {
                            pending_lookup_repo::upsert_tx(
                                tx,
                                &source,
                                &source_idempk,
                                instance_id,
                                command.id,
                                transaction_id,
                                event_id,
                            )
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        }
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
