//! CommandQueueItem repository (C5/C6): the 1:1 queue-tracking row, the
//! versioned claim UPDATE, and the due-item selection query the scheduler
//! polls with.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as DbTx};
use uuid::Uuid;

use crate::domain::{CommandQueueItem, QueueError, QueueItemStatus};

#[derive(Debug, Clone, sqlx::FromRow)]
struct QueueItemRow {
    id: Uuid,
    command_id: Uuid,
    status: QueueItemStatus,
    processor_id: Option<String>,
    processor_version: i64,
    processing_started_at: Option<DateTime<Utc>>,
    processing_completed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    occ_retry_count: i32,
    next_retry_after: Option<DateTime<Utc>>,
    errors: serde_json::Value,
}

impl From<QueueItemRow> for CommandQueueItem {
    fn from(row: QueueItemRow) -> Self {
        CommandQueueItem {
            id: row.id,
            command_id: row.command_id,
            status: row.status,
            processor_id: row.processor_id,
            processor_version: row.processor_version,
            processing_started_at: row.processing_started_at,
            processing_completed_at: row.processing_completed_at,
            retry_count: row.retry_count,
            occ_retry_count: row.occ_retry_count,
            next_retry_after: row.next_retry_after,
            errors: serde_json::from_value(row.errors).unwrap_or_default(),
        }
    }
}

const QUEUE_ITEM_COLUMNS: &str = r#"
    id, command_id, status, processor_id, processor_version,
    processing_started_at, processing_completed_at,
    retry_count, occ_retry_count, next_retry_after, errors
"#;

pub async fn insert_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
    command_id: Uuid,
) -> Result<CommandQueueItem, sqlx::Error> {
    let row = sqlx::query_as::<_, QueueItemRow>(&format!(
        r#"
        INSERT INTO command_queue_items (id, command_id, status)
        VALUES ($1, $2, 'pending')
        RETURNING {QUEUE_ITEM_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(command_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.into())
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<CommandQueueItem>, sqlx::Error> {
    let row = sqlx::query_as::<_, QueueItemRow>(&format!(
        "SELECT {QUEUE_ITEM_COLUMNS} FROM command_queue_items WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

pub async fn find_by_command_id(pool: &PgPool, command_id: Uuid) -> Result<Option<CommandQueueItem>, sqlx::Error> {
    let row = sqlx::query_as::<_, QueueItemRow>(&format!(
        "SELECT {QUEUE_ITEM_COLUMNS} FROM command_queue_items WHERE command_id = $1"
    ))
    .bind(command_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

pub async fn find_by_command_id_tx(
    tx: &mut DbTx<'_, Postgres>,
    command_id: Uuid,
) -> Result<Option<CommandQueueItem>, sqlx::Error> {
    let row = sqlx::query_as::<_, QueueItemRow>(&format!(
        "SELECT {QUEUE_ITEM_COLUMNS} FROM command_queue_items WHERE command_id = $1"
    ))
    .bind(command_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(Into::into))
}

/// Selects items due for (re)dispatch: `pending`/`failed`/`occ_timeout` whose
/// `next_retry_after` has elapsed, oldest-due first (§4.C6). Read-only — the
/// scheduler's own short-lived claim attempt is a separate statement.
pub async fn select_due(pool: &PgPool, limit: i64) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id FROM command_queue_items
        WHERE status IN ('pending', 'failed', 'occ_timeout')
          AND (next_retry_after IS NULL OR next_retry_after <= now())
        ORDER BY next_retry_after ASC NULLS FIRST, ts ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// The at-most-one-claim protocol (§4.C5-C6). `rows_affected() == 0` means a
/// different worker already owns this item; the caller aborts quietly.
pub async fn claim(
    pool: &PgPool,
    id: Uuid,
    processor_id: &str,
    expected_version: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE command_queue_items
        SET status = 'processing',
            processor_id = $1,
            processing_started_at = now(),
            next_retry_after = NULL,
            retry_count = retry_count + 1,
            processor_version = processor_version + 1
        WHERE id = $2 AND processor_version = $3
        "#,
    )
    .bind(processor_id)
    .bind(id)
    .bind(expected_version)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_processed_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE command_queue_items
        SET status = 'processed', processing_completed_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Pool-level variant the scheduler calls once a worker pipeline has already
/// committed its own DB transaction and returned `WorkerOutcome::Processed`.
pub async fn mark_processed(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE command_queue_items
        SET status = 'processed', processing_completed_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Appends one error (newest first, bounded) and sets the item's terminal or
/// retryable status, matching §4.C5-C6's retry scheduling policy.
pub async fn record_outcome(
    pool: &PgPool,
    id: Uuid,
    status: QueueItemStatus,
    next_retry_after: Option<DateTime<Utc>>,
    error_message: &str,
    occ_retry_count_delta: i32,
) -> Result<(), sqlx::Error> {
    const MAX_ERRORS: usize = 50;
    let mut tx = pool.begin().await?;

    let current_errors: serde_json::Value =
        sqlx::query_scalar("SELECT errors FROM command_queue_items WHERE id = $1 FOR NO KEY UPDATE")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
    let mut errors: Vec<QueueError> = serde_json::from_value(current_errors).unwrap_or_default();
    errors.insert(0, QueueError { message: error_message.to_string(), inserted_at: Utc::now() });
    errors.truncate(MAX_ERRORS);

    sqlx::query(
        r#"
        UPDATE command_queue_items
        SET status = $1,
            next_retry_after = $2,
            errors = $3,
            occ_retry_count = occ_retry_count + $4
        WHERE id = $5
        "#,
    )
    .bind(status)
    .bind(next_retry_after)
    .bind(serde_json::to_value(&errors).expect("errors always serialize"))
    .bind(occ_retry_count_delta)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Stuck-item recovery (§5): forces items back to `pending` unconditionally.
/// The caller has already decided, via its liveness set, that these items'
/// claims are abandoned.
pub async fn force_revert_to_pending(pool: &PgPool, ids: &[Uuid]) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        r#"
        UPDATE command_queue_items
        SET status = 'pending', processor_id = NULL, processing_started_at = NULL
        WHERE id = ANY($1) AND status = 'processing'
        "#,
    )
    .bind(ids)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Items currently `processing`, for the stuck-item sweep to compare against
/// the in-process liveness set (§5, §9 Open Question #3).
pub async fn select_processing(pool: &PgPool) -> Result<Vec<CommandQueueItem>, sqlx::Error> {
    let rows = sqlx::query_as::<_, QueueItemRow>(&format!(
        "SELECT {QUEUE_ITEM_COLUMNS} FROM command_queue_items WHERE status = 'processing'"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// Manual dead-letter requeue (`dlq_replay_drill`): resets an item back to
/// `pending` with a clean retry slate.
pub async fn requeue_dead_letter(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE command_queue_items
        SET status = 'pending', retry_count = 0, occ_retry_count = 0,
            next_retry_after = NULL, processor_id = NULL, processing_started_at = NULL
        WHERE id = $1 AND status = 'dead_letter'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn select_dead_letter_for_instance(
    pool: &PgPool,
    instance_id: Uuid,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT q.id FROM command_queue_items q
        JOIN commands c ON c.id = q.command_id
        WHERE c.instance_id = $1 AND q.status = 'dead_letter'
        ORDER BY q.ts
        "#,
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await
}
