//! Dependency resolution (C8): before an `update_*` command may apply, it
//! must locate the `create_*` command it amends and react to that command's
//! current queue status.
//!
//! Grounded in the claim/retry bookkeeping already built for C5/C6
//! (`queue_repo::record_outcome`), generalized here to resolve one command's
//! fate against another's rather than against its own prior attempts.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Command, QueueItemStatus};
use crate::repos::{command_repo, queue_repo};

/// What an `update_*` worker should do next, given its create-command's
/// current status (§4.C8).
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The create command finished; proceed with applying the update against
    /// the account/transaction it created.
    Proceed { create_command: Box<Command> },
    /// The create command hasn't settled yet; reschedule this update to run
    /// no earlier than the create's own next retry plus one retry interval,
    /// so the dependency gets a chance to resolve first.
    RevertToPending { retry_after: DateTime<Utc> },
    /// The create command is permanently failed or was never found; this
    /// update can never apply.
    DeadLetter { reason: String },
}

/// Resolves an `update_*` command's dependency on its `create_*` counterpart.
/// `retry_delay` is the queue's configured base retry interval, used to space
/// the rescheduled attempt past the create command's own next retry.
pub async fn resolve(
    pool: &PgPool,
    instance_id: Uuid,
    source: &str,
    source_idempk: &str,
    retry_delay: chrono::Duration,
) -> Result<Resolution, sqlx::Error> {
    // Absence here is ambiguous between "never will arrive" and "hasn't
    // arrived yet" (§8 S6: an update may be submitted before its create).
    // Treated as the latter — retry rather than dead-letter — since nothing
    // in this lookup can tell the two apart, and a permanently missing
    // create is still recoverable by resubmission.
    let create_command = match command_repo::find_create_by_source_idempk(pool, instance_id, source, source_idempk).await? {
        Some(c) => c,
        None => return Ok(Resolution::RevertToPending { retry_after: Utc::now() + retry_delay }),
    };

    let queue_item = match queue_repo::find_by_command_id(pool, create_command.id).await? {
        Some(q) => q,
        None => return Ok(Resolution::DeadLetter { reason: "create command has no queue item".into() }),
    };

    match queue_item.status {
        QueueItemStatus::Processed => Ok(Resolution::Proceed { create_command: Box::new(create_command) }),
        QueueItemStatus::Pending | QueueItemStatus::Processing | QueueItemStatus::OccTimeout | QueueItemStatus::Failed => {
            let base = queue_item.next_retry_after.unwrap_or_else(Utc::now);
            Ok(Resolution::RevertToPending { retry_after: base + retry_delay })
        }
        QueueItemStatus::DeadLetter => Ok(Resolution::DeadLetter { reason: "create command is dead-lettered".into() }),
    }
}
