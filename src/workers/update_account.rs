//! `update_account` worker (C7): applies mutable-field changes
//! (description/context) to an already-created account. Must first resolve
//! its dependency on the `create_account` command that produced the account
//! (§4.C8) before touching anything. No OCC contention on the write itself —
//! mutable fields carry no version guard (§4.C2).

use std::sync::Arc;

use chrono::Duration;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{Command, EventMap};
use crate::errors::ErrorKind;
use crate::occ::{process_with_retry, PipelineError};
use crate::pipeline::Pipeline;
use crate::repos::{account_repo, instance_repo, journal_repo, links_repo};
use crate::services::dependency_resolution::{self, Resolution};
use crate::workers::{from_occ, WorkerOutcome};

#[derive(Default)]
struct Results {
    instance_id: Option<Uuid>,
    account_id: Option<Uuid>,
}

pub async fn run(
    pool: &PgPool,
    command: Arc<Command>,
    max_retries: u32,
    retry_interval_ms: u64,
    dependency_retry_delay: Duration,
) -> WorkerOutcome {
    let span = tracing::info_span!(
        "update_account",
        command_id = %command.id,
        instance_id = %command.instance_id,
        action = "update_account"
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
    let EventMap::UpdateAccount { instance_address, source, source_idempk, payload, .. } = &command.event_map
    else {
        return WorkerOutcome::Failed {
            kind: ErrorKind::Validation,
            message: "event_map is not an update_account event".into(),
        };
    };

    let instance = match instance_repo::find_by_address(pool, instance_address).await {
        Ok(Some(i)) => i,
        Ok(None) => {
            return WorkerOutcome::Failed {
                kind: ErrorKind::Validation,
                message: format!("instance not found: {instance_address}"),
            }
        }
        Err(e) => return WorkerOutcome::Failed { kind: ErrorKind::Infrastructure, message: e.to_string() },
    };

    let create_command = match dependency_resolution::resolve(
        pool,
        instance.id,
        source,
        source_idempk,
        dependency_retry_delay,
    )
    .await
    {
        Ok(Resolution::Proceed { create_command }) => create_command,
        Ok(Resolution::RevertToPending { retry_after }) => {
            return WorkerOutcome::RevertToPending { retry_after }
        }
        Ok(Resolution::DeadLetter { reason }) => return WorkerOutcome::DeadLetter { reason },
        Err(e) => return WorkerOutcome::Failed { kind: ErrorKind::Infrastructure, message: e.to_string() },
    };

    let account_id = match links_repo::account_for_command(pool, create_command.id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return WorkerOutcome::DeadLetter {
                reason: "create_account command has no linked account".into(),
            }
        }
        Err(e) => return WorkerOutcome::Failed { kind: ErrorKind::Infrastructure, message: e.to_string() },
    };

    let outcome = process_with_retry(max_retries, retry_interval_ms, |_attempt| {
        let pool = pool.clone();
        let command = command.clone();
        let payload = payload.clone();
        async move {
            let pipeline = Pipeline::<Results>::builder()
                .step("occable_item", move |tx, results: &mut Results| {
                    Box::pin(async move {
                        let account = account_repo::find_by_id_tx(tx, account_id)
                            .await
                            .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?
                            .ok_or_else(|| (ErrorKind::Validation, "account no longer exists".to_string()))?;
                        results.instance_id = Some(account.instance_id);
                        results.account_id = Some(account.id);
                        Ok(())
                    })
                })
                .step("account", move |tx, results: &mut Results| {
                    let payload = payload.clone();
                    Box::pin(async move {
                        let account_id = results.account_id.expect("occable_item ran first");
                        account_repo::update_mutable_fields_tx(
                            tx,
                            account_id,
                            payload.description.as_deref(),
                            payload.context.as_ref(),
                        )
                        .await
                        .map_err(|e| (ErrorKind::Infrastructure, e.to_string()))?;
                        Ok(())
                    })
                })
                .step("event_success", move |tx, results: &mut Results| {
                    let command = command.clone();
                    Box::pin(async move {
                        let instance_id = results.instance_id.expect("occable_item ran first");
                        let account_id = results.account_id.expect("occable_item ran first");
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
            Ok(results.account_id.expect("occable_item ran"))
        }
    })
    .await;
    from_occ(outcome)
}
