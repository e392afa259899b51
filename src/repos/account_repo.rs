//! Account repository (C2/C9): lookup by address, and the version-guarded
//! write that is the entire OCC mechanism — `UPDATE ... WHERE lock_version =
//! $old`, zero rows meaning `STALE_ACCOUNT`.

use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::Account;

#[derive(Debug, Error)]
pub enum AccountRepoError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("account {address} belongs to a different instance")]
    CrossInstance { address: String },
    #[error("account address already in use: {0}")]
    DuplicateAddress(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const ACCOUNT_COLUMNS: &str = r#"
    id, instance_id, address, name, type, normal_balance, currency,
    allowed_negative, description, context, available,
    posted_amount, posted_debit, posted_credit,
    pending_amount, pending_debit, pending_credit,
    lock_version
"#;

pub async fn find_by_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_by_address_tx(
    tx: &mut Transaction<'_, Postgres>,
    instance_id: Uuid,
    address: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE instance_id = $1 AND address = $2"
    ))
    .bind(instance_id)
    .bind(address)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn find_by_address(
    pool: &PgPool,
    instance_id: Uuid,
    address: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE instance_id = $1 AND address = $2"
    ))
    .bind(instance_id)
    .bind(address)
    .fetch_optional(pool)
    .await
}

/// Every account in the system, for offline tools (`rebuild_balances`) that
/// walk the whole table rather than one instance at a time.
pub async fn list_all(pool: &PgPool) -> Result<Vec<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY instance_id, address"))
        .fetch_all(pool)
        .await
}

/// Loads every account referenced by `addresses` in one instance. Returns
/// `CrossInstance`/`NotFound` rather than silently dropping rows so callers
/// can tell "missing" from "belongs elsewhere" (§4.C3 step 2).
pub async fn load_all_tx(
    tx: &mut Transaction<'_, Postgres>,
    instance_id: Uuid,
    addresses: &[String],
) -> Result<Vec<Account>, AccountRepoError> {
    let mut accounts = Vec::with_capacity(addresses.len());
    for address in addresses {
        let account = find_by_address_tx(tx, instance_id, address)
            .await?
            .ok_or_else(|| AccountRepoError::NotFound(address.clone()))?;
        if account.instance_id != instance_id {
            return Err(AccountRepoError::CrossInstance { address: address.clone() });
        }
        accounts.push(account);
    }
    Ok(accounts)
}

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    account: &Account,
) -> Result<(), AccountRepoError> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (
            id, instance_id, address, name, type, normal_balance, currency,
            allowed_negative, description, context, available,
            posted_amount, posted_debit, posted_credit,
            pending_amount, pending_debit, pending_credit,
            lock_version
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(account.id)
    .bind(account.instance_id)
    .bind(&account.address)
    .bind(&account.name)
    .bind(account.account_type)
    .bind(account.normal_balance)
    .bind(&account.currency)
    .bind(account.allowed_negative)
    .bind(&account.description)
    .bind(&account.context)
    .bind(account.available)
    .bind(account.posted_amount)
    .bind(account.posted_debit)
    .bind(account.posted_credit)
    .bind(account.pending_amount)
    .bind(account.pending_debit)
    .bind(account.pending_credit)
    .bind(account.lock_version)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(AccountRepoError::DuplicateAddress(account.address.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Writes an account's balance slots back under its previous `lock_version`.
/// A zero-row result means another writer got there first — the caller
/// (`transaction_applier`) turns this into `STALE_ACCOUNT` at the reserved
/// `"transaction"` pipeline step.
pub async fn update_balances_tx(
    tx: &mut Transaction<'_, Postgres>,
    next: &Account,
    previous_lock_version: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE accounts SET
            available = $1,
            posted_amount = $2, posted_debit = $3, posted_credit = $4,
            pending_amount = $5, pending_debit = $6, pending_credit = $7,
            lock_version = $8
        WHERE id = $9 AND lock_version = $10
        "#,
    )
    .bind(next.available)
    .bind(next.posted_amount)
    .bind(next.posted_debit)
    .bind(next.posted_credit)
    .bind(next.pending_amount)
    .bind(next.pending_debit)
    .bind(next.pending_credit)
    .bind(next.lock_version)
    .bind(next.id)
    .bind(previous_lock_version)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Applies the mutable-field update for `update_account` (§4.C7): only
/// `description`/`context` ever change here, so no version guard is needed —
/// this never races with a balance-affecting write.
pub async fn update_mutable_fields_tx(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    description: Option<&str>,
    context: Option<&serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE accounts SET
            description = COALESCE($1, description),
            context = COALESCE($2, context)
        WHERE id = $3
        "#,
    )
    .bind(description)
    .bind(context)
    .bind(account_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
