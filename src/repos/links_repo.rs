//! Append-only audit link tables: `CommandTransactionLink`,
//! `CommandAccountLink`, `JournalEventCommandLink`, `JournalEventAccountLink`,
//! `JournalEventTransactionLink` (§3). Every worker pipeline (C7) writes the
//! links relevant to its action in the same DB transaction as the command.

use sqlx::{PgPool, Postgres, Transaction as DbTx};
use uuid::Uuid;

async fn insert_link_tx(
    tx: &mut DbTx<'_, Postgres>,
    table: &str,
    event_id: Uuid,
    target_id: Uuid,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {table} (event_id, target_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
    );
    sqlx::query(&sql).bind(event_id).bind(target_id).execute(&mut **tx).await?;
    Ok(())
}

pub async fn link_command_transaction(
    tx: &mut DbTx<'_, Postgres>,
    command_id: Uuid,
    transaction_id: Uuid,
) -> Result<(), sqlx::Error> {
    insert_link_tx(tx, "command_transaction_links", command_id, transaction_id).await
}

pub async fn link_command_account(
    tx: &mut DbTx<'_, Postgres>,
    command_id: Uuid,
    account_id: Uuid,
) -> Result<(), sqlx::Error> {
    insert_link_tx(tx, "command_account_links", command_id, account_id).await
}

pub async fn link_journal_event_command(
    tx: &mut DbTx<'_, Postgres>,
    journal_event_id: Uuid,
    command_id: Uuid,
) -> Result<(), sqlx::Error> {
    insert_link_tx(tx, "journal_event_command_links", journal_event_id, command_id).await
}

pub async fn link_journal_event_account(
    tx: &mut DbTx<'_, Postgres>,
    journal_event_id: Uuid,
    account_id: Uuid,
) -> Result<(), sqlx::Error> {
    insert_link_tx(tx, "journal_event_account_links", journal_event_id, account_id).await
}

pub async fn link_journal_event_transaction(
    tx: &mut DbTx<'_, Postgres>,
    journal_event_id: Uuid,
    transaction_id: Uuid,
) -> Result<(), sqlx::Error> {
    insert_link_tx(tx, "journal_event_transaction_links", journal_event_id, transaction_id).await
}

/// Resolves the account a `create_account` command produced, via its
/// `CommandAccountLink` — the dependency an `update_account` worker (C7/C8)
/// needs once its create-command is confirmed `processed`.
pub async fn account_for_command(pool: &PgPool, command_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT target_id FROM command_account_links WHERE event_id = $1 LIMIT 1",
    )
    .bind(command_id)
    .fetch_optional(pool)
    .await
}

/// Whether this command already recorded a `CommandTransactionLink` — used
/// by the `create_transaction`/`update_transaction` pipelines' `idempotency`
/// step to detect a prior attempt that committed before the queue item was
/// marked `processed` (crash recovery, §5).
pub async fn transaction_for_command_tx(
    tx: &mut DbTx<'_, Postgres>,
    command_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT target_id FROM command_transaction_links WHERE event_id = $1 LIMIT 1",
    )
    .bind(command_id)
    .fetch_optional(&mut **tx)
    .await
}
