//! Command submission (C5/C9): the external entry point that turns a
//! validated `EventMap` into a durable `Command` + `CommandQueueItem` pair,
//! or rejects it before either row ever exists.
//!
//! Grounded in `gl-rs/src/services/journal_service.rs`'s idempotency-check-
//! then-insert shape, generalized from one posting payload to all four
//! command actions and their shared idempotency envelope.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::EventMap;
use crate::errors::FieldError;
use crate::repos::{command_repo, instance_repo, queue_repo};
use crate::validation;

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A new Command + CommandQueueItem were durably inserted.
    Queued { command_id: Uuid, queue_item_id: Uuid },
    /// The same idempotency key was already submitted; safe to treat as a
    /// success-equivalent response rather than inserting a second Command.
    Duplicate { command_id: Uuid },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("payload validation failed")]
    Validation(Vec<FieldError>),
    #[error("instance not found: {0}")]
    InstanceNotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub async fn submit(pool: &sqlx::PgPool, event_map: EventMap) -> Result<SubmitOutcome, SubmitError> {
    validation::validate(&event_map).map_err(SubmitError::Validation)?;

    let instance = instance_repo::find_by_address(pool, event_map.instance_address())
        .await
        .map_err(|e| match e {
            instance_repo::InstanceError::NotFound(addr) => SubmitError::InstanceNotFound(addr),
            instance_repo::InstanceError::Database(e) => SubmitError::Database(e),
        })?
        .ok_or_else(|| SubmitError::InstanceNotFound(event_map.instance_address().to_string()))?;

    let command_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;
    match command_repo::insert_tx(&mut tx, command_id, instance.id, &event_map).await {
        Ok(_inserted_at) => {
            let queue_item = queue_repo::insert_tx(&mut tx, Uuid::new_v4(), command_id).await?;
            tx.commit().await?;
            Ok(SubmitOutcome::Queued { command_id, queue_item_id: queue_item.id })
        }
        Err(command_repo::CommandRepoError::Duplicate { .. }) => {
            tx.rollback().await.ok();
            let existing = command_repo::find_existing_id(
                pool,
                instance.id,
                event_map.source(),
                event_map.source_idempk(),
                event_map.update_idempk(),
            )
            .await?
            .expect("unique violation implies a matching row exists");
            Ok(SubmitOutcome::Duplicate { command_id: existing })
        }
        Err(command_repo::CommandRepoError::Database(e)) => {
            tx.rollback().await.ok();
            Err(SubmitError::Database(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountType, CreateAccountPayload};

    #[test]
    fn validation_failure_short_circuits_before_any_db_call() {
        // Exercises only the pure validation path; a malformed submission
        // must never reach `pool.begin()`.
        let event = EventMap::CreateAccount {
            source: "bad source".into(),
            source_idempk: "idem".into(),
            instance_address: "acme".into(),
            payload: CreateAccountPayload {
                address: "cash:main".into(),
                name: "Cash".into(),
                account_type: AccountType::Asset,
                currency: "USD".into(),
                normal_balance: None,
                allowed_negative: false,
                description: None,
                context: None,
            },
        };
        assert!(validation::validate(&event).is_err());
    }
}
