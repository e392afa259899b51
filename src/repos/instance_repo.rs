//! Instance repository: the tenancy boundary row. Resolution by address is
//! the hot path every worker (C7) calls first.

use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Instance {
    pub id: Uuid,
    pub address: String,
    pub description: Option<String>,
}

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub async fn find_by_address(pool: &PgPool, address: &str) -> Result<Option<Instance>, InstanceError> {
    let instance = sqlx::query_as::<_, Instance>(
        "SELECT id, address, description FROM instances WHERE address = $1",
    )
    .bind(address)
    .fetch_optional(pool)
    .await?;
    Ok(instance)
}

pub async fn resolve_tx(
    tx: &mut Transaction<'_, Postgres>,
    address: &str,
) -> Result<Instance, InstanceError> {
    let instance = sqlx::query_as::<_, Instance>(
        "SELECT id, address, description FROM instances WHERE address = $1",
    )
    .bind(address)
    .fetch_optional(&mut **tx)
    .await?;
    instance.ok_or_else(|| InstanceError::NotFound(address.to_string()))
}

pub async fn create(pool: &PgPool, address: &str, description: Option<&str>) -> Result<Instance, InstanceError> {
    let instance = sqlx::query_as::<_, Instance>(
        r#"
        INSERT INTO instances (id, address, description)
        VALUES ($1, $2, $3)
        RETURNING id, address, description
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(address)
    .bind(description)
    .fetch_one(pool)
    .await?;
    Ok(instance)
}
