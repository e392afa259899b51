//! Append-only `BalanceHistoryEntry` snapshots (§3, §8 Property 5). One row
//! is written every time an account's balance mutates; `rebuild_balances`
//! replays this trail to verify the live row still matches.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction as DbTx};
use uuid::Uuid;

use crate::domain::{Account, Balance};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BalanceHistoryEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub entry_id: Option<Uuid>,
    pub posted_amount: i64,
    pub posted_debit: i64,
    pub posted_credit: i64,
    pub pending_amount: i64,
    pub pending_debit: i64,
    pub pending_credit: i64,
    pub available: i64,
    pub ts: DateTime<Utc>,
}

impl BalanceHistoryEntry {
    pub fn posted(&self) -> Balance {
        Balance { amount: self.posted_amount, debit: self.posted_debit, credit: self.posted_credit }
    }

    pub fn pending(&self) -> Balance {
        Balance { amount: self.pending_amount, debit: self.pending_debit, credit: self.pending_credit }
    }
}

pub async fn insert_snapshot_tx(
    tx: &mut DbTx<'_, Postgres>,
    account: &Account,
    entry_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO balance_history_entries (
            id, account_id, entry_id,
            posted_amount, posted_debit, posted_credit,
            pending_amount, pending_debit, pending_credit,
            available
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account.id)
    .bind(entry_id)
    .bind(account.posted_amount)
    .bind(account.posted_debit)
    .bind(account.posted_credit)
    .bind(account.pending_amount)
    .bind(account.pending_debit)
    .bind(account.pending_credit)
    .bind(account.available)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Ordered by `ts`, oldest first, for the `rebuild_balances` replay (§8
/// Property 5: the trail replays to the account's current balance).
pub async fn history_for_account(
    pool: &sqlx::PgPool,
    account_id: Uuid,
) -> Result<Vec<BalanceHistoryEntry>, sqlx::Error> {
    sqlx::query_as::<_, BalanceHistoryEntry>(
        r#"
        SELECT id, account_id, entry_id,
               posted_amount, posted_debit, posted_credit,
               pending_amount, pending_debit, pending_credit,
               available, ts
        FROM balance_history_entries
        WHERE account_id = $1
        ORDER BY ts ASC
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
}
