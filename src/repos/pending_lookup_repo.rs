//! `PendingTransactionLookup` (C9): a lightweight correlation row from
//! `(source, source_idempk, instance)` to the artifact a later update_*
//! targets, upserted so repeated writes to the same key are safe.

use sqlx::{Postgres, Transaction as DbTx};
use uuid::Uuid;

pub async fn upsert_tx(
    tx: &mut DbTx<'_, Postgres>,
    source: &str,
    source_idempk: &str,
    instance_id: Uuid,
    command_id: Uuid,
    transaction_id: Uuid,
    journal_event_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pending_transaction_lookup
            (source, source_idempk, instance_id, command_id, transaction_id, journal_event_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source, source_idempk, instance_id) DO UPDATE SET
            command_id = EXCLUDED.command_id,
            transaction_id = EXCLUDED.transaction_id,
            journal_event_id = EXCLUDED.journal_event_id,
            ts = now()
        "#,
    )
    .bind(source)
    .bind(source_idempk)
    .bind(instance_id)
    .bind(command_id)
    .bind(transaction_id)
    .bind(journal_event_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub struct LookupRow {
    pub command_id: Uuid,
    pub transaction_id: Uuid,
    pub journal_event_id: Uuid,
}

pub async fn find_tx(
    tx: &mut DbTx<'_, Postgres>,
    source: &str,
    source_idempk: &str,
    instance_id: Uuid,
) -> Result<Option<LookupRow>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, Uuid, Uuid)>(
        r#"
        SELECT command_id, transaction_id, journal_event_id
        FROM pending_transaction_lookup
        WHERE source = $1 AND source_idempk = $2 AND instance_id = $3
        "#,
    )
    .bind(source)
    .bind(source_idempk)
    .bind(instance_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|(command_id, transaction_id, journal_event_id)| LookupRow {
        command_id,
        transaction_id,
        journal_event_id,
    }))
}
