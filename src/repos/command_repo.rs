//! Command repository (C5/C9): persists the durable `Command` row and
//! enforces idempotency via the store's partial unique indexes
//! (`commands_create_idempotency_idx` / `commands_update_idempotency_idx`).

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction as DbTx};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Command, EventMap};

#[derive(Debug, Error)]
pub enum CommandRepoError {
    /// Uniqueness conflict on `(instance, source, source_idempk[,
    /// update_idempk])` — §4.C9, §7 IDEMPOTENCY_DUPLICATE.
    #[error("duplicate command for source={source} source_idempk={source_idempk}")]
    Duplicate { source: String, source_idempk: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub async fn insert_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
    instance_id: Uuid,
    event_map: &EventMap,
) -> Result<DateTime<Utc>, CommandRepoError> {
    let payload = serde_json::to_value(event_map).expect("EventMap always serializes");
    let action = event_map.action();
    let source = event_map.source();
    let source_idempk = event_map.source_idempk();
    let update_idempk = event_map.update_idempk();

    let result = sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        INSERT INTO commands (id, instance_id, action, source, source_idempk, update_idempk, event_map)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING ts
        "#,
    )
    .bind(id)
    .bind(instance_id)
    .bind(action)
    .bind(source)
    .bind(source_idempk)
    .bind(update_idempk)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await;

    match result {
        Ok(ts) => Ok(ts),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(CommandRepoError::Duplicate {
                source: source.to_string(),
                source_idempk: source_idempk.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Loads a command outside any transaction — the scheduler's dispatch path
/// reads it once right after claiming the paired queue item.
pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Command>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, Uuid, serde_json::Value, DateTime<Utc>)>(
        "SELECT id, instance_id, event_map, ts FROM commands WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, instance_id, event_map, inserted_at)| Command {
        id,
        instance_id,
        event_map: serde_json::from_value(event_map).expect("stored event_map is always valid"),
        inserted_at,
    }))
}

/// Finds the id of a command already persisted under the same idempotency
/// key, for turning a unique-violation on insert into a success-equivalent
/// response (§4.C9, §7 IDEMPOTENCY_DUPLICATE).
pub async fn find_existing_id(
    pool: &sqlx::PgPool,
    instance_id: Uuid,
    source: &str,
    source_idempk: &str,
    update_idempk: Option<&str>,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id FROM commands
        WHERE instance_id = $1 AND source = $2 AND source_idempk = $3
          AND update_idempk IS NOT DISTINCT FROM $4
        "#,
    )
    .bind(instance_id)
    .bind(source)
    .bind(source_idempk)
    .bind(update_idempk)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Command>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, Uuid, serde_json::Value, DateTime<Utc>)>(
        "SELECT id, instance_id, event_map, ts FROM commands WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|(id, instance_id, event_map, inserted_at)| Command {
        id,
        instance_id,
        event_map: serde_json::from_value(event_map).expect("stored event_map is always valid"),
        inserted_at,
    }))
}

/// Finds a create-* command by the (instance, source, source_idempk) triple
/// an update_* command's dependency resolution (§4.C8) needs to locate.
pub async fn find_create_by_source_idempk(
    pool: &sqlx::PgPool,
    instance_id: Uuid,
    source: &str,
    source_idempk: &str,
) -> Result<Option<Command>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, Uuid, serde_json::Value, DateTime<Utc>)>(
        r#"
        SELECT id, instance_id, event_map, ts
        FROM commands
        WHERE instance_id = $1 AND source = $2 AND source_idempk = $3 AND update_idempk IS NULL
        "#,
    )
    .bind(instance_id)
    .bind(source)
    .bind(source_idempk)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, instance_id, event_map, inserted_at)| Command {
        id,
        instance_id,
        event_map: serde_json::from_value(event_map).expect("stored event_map is always valid"),
        inserted_at,
    }))
}

pub async fn find_create_by_source_idempk_tx(
    tx: &mut DbTx<'_, Postgres>,
    instance_id: Uuid,
    source: &str,
    source_idempk: &str,
) -> Result<Option<Command>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, Uuid, serde_json::Value, DateTime<Utc>)>(
        r#"
        SELECT id, instance_id, event_map, ts
        FROM commands
        WHERE instance_id = $1 AND source = $2 AND source_idempk = $3 AND update_idempk IS NULL
        "#,
    )
    .bind(instance_id)
    .bind(source)
    .bind(source_idempk)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|(id, instance_id, event_map, inserted_at)| Command {
        id,
        instance_id,
        event_map: serde_json::from_value(event_map).expect("stored event_map is always valid"),
        inserted_at,
    }))
}
