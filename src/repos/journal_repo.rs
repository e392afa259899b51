//! `JournalEvent` repository: a frozen copy of a command's `event_map`,
//! written once at successful apply and never mutated (§3).

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction as DbTx};
use uuid::Uuid;

use crate::domain::EventMap;

pub async fn insert_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
    instance_id: Uuid,
    event_map: &EventMap,
) -> Result<DateTime<Utc>, sqlx::Error> {
    let payload = serde_json::to_value(event_map).expect("EventMap always serializes");
    sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        INSERT INTO journal_events (id, instance_id, event_map)
        VALUES ($1, $2, $3)
        RETURNING ts
        "#,
    )
    .bind(id)
    .bind(instance_id)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await
}
