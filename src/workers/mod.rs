//! Command workers (C7): one module per action, each composing a pipeline of
//! named steps and driving it under OCC retry where the action touches
//! account balances.

pub mod create_account;
pub mod create_transaction;
pub mod update_account;
pub mod update_transaction;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::ErrorKind;
use crate::occ::OccOutcome;

/// The terminal result of one worker invocation, generalizing `OccOutcome`
/// with the two dependency-resolution (C8) outcomes that short-circuit a
/// pipeline run before it even begins.
#[derive(Debug)]
pub enum WorkerOutcome {
    Processed(Uuid),
    Failed { kind: ErrorKind, message: String },
    OccTimedOut { occ_retry_count: u32, errors: Vec<String> },
    RevertToPending { retry_after: DateTime<Utc> },
    DeadLetter { reason: String },
}

pub(crate) fn from_occ(outcome: OccOutcome<Uuid>) -> WorkerOutcome {
    match outcome {
        OccOutcome::Ok(id) => WorkerOutcome::Processed(id),
        OccOutcome::Failed(err) => WorkerOutcome::Failed { kind: err.kind, message: err.message },
        OccOutcome::TimedOut { occ_retry_count, errors } => WorkerOutcome::OccTimedOut { occ_retry_count, errors },
    }
}
