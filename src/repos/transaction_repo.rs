//! Transaction/Entry repository (C3): the transaction row and its entries,
//! matched by `account_id` so an update can tell "amend this entry" from
//! "the referenced accounts changed" (forbidden, §4.C3 step 4).

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as DbTx};
use uuid::Uuid;

use crate::domain::{Entry, EntryType, Transaction, TransactionStatus};

/// Pool-level variant for callers outside a pipeline's own transaction
/// (admin tools, tests).
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>("SELECT id, instance_id, status, posted_at FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(
        "SELECT id, instance_id, status, posted_at FROM transactions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn insert_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
    instance_id: Uuid,
    status: TransactionStatus,
    posted_at: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO transactions (id, instance_id, status, posted_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(instance_id)
    .bind(status)
    .bind(posted_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn update_status_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
    status: TransactionStatus,
    posted_at: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE transactions SET status = $1, posted_at = $2 WHERE id = $3")
        .bind(status)
        .bind(posted_at)
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn entries_for_transaction_tx(
    tx: &mut DbTx<'_, Postgres>,
    transaction_id: Uuid,
) -> Result<Vec<Entry>, sqlx::Error> {
    sqlx::query_as::<_, Entry>(
        r#"
        SELECT id, transaction_id, account_id, type, amount, currency
        FROM entries
        WHERE transaction_id = $1
        ORDER BY ts
        "#,
    )
    .bind(transaction_id)
    .fetch_all(&mut **tx)
    .await
}

pub async fn insert_entry_tx(
    tx: &mut DbTx<'_, Postgres>,
    id: Uuid,
    transaction_id: Uuid,
    account_id: Uuid,
    entry_type: EntryType,
    amount: i64,
    currency: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO entries (id, transaction_id, account_id, type, amount, currency)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(transaction_id)
    .bind(account_id)
    .bind(entry_type)
    .bind(amount)
    .bind(currency)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Updates an existing entry's amount in place. The entry's `type` is
/// immutable (§4.C2) and is never part of this UPDATE's SET list.
pub async fn update_entry_amount_tx(
    tx: &mut DbTx<'_, Postgres>,
    entry_id: Uuid,
    amount: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE entries SET amount = $1 WHERE id = $2")
        .bind(amount)
        .bind(entry_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
