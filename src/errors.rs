//! The error taxonomy (§7): a classification every layer's concrete error
//! type maps itself onto, used both to decide retry/dead-letter routing in
//! the scheduler and to build field-tagged responses for no-save-on-error
//! callers.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    IdempotencyDuplicate,
    DependencyPending,
    DependencyDead,
    BalanceInvariant,
    StaleAccount,
    OccTimeout,
    Infrastructure,
}

impl ErrorKind {
    /// Whether the queue should ever reattempt a command that failed with
    /// this kind. Validation and balance-invariant failures are permanent;
    /// everything else may clear on its own.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Validation | ErrorKind::BalanceInvariant | ErrorKind::DependencyDead)
    }
}

/// A failure rewritten onto a field path of the submitted payload, for
/// "no-save-on-error" synchronous callers (§4.C4, §7).
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { field: field.into(), kind, message: message.into() }
    }
}

pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for crate::domain::AccountError {
    fn kind(&self) -> ErrorKind {
        use crate::domain::AccountError::*;
        match self {
            NegativeBalance { .. } => ErrorKind::BalanceInvariant,
            CurrencyMismatch { .. } => ErrorKind::BalanceInvariant,
            EntryTypeImmutable => ErrorKind::BalanceInvariant,
            StaleAccount(_) => ErrorKind::StaleAccount,
            InvalidTransition => ErrorKind::BalanceInvariant,
            Database(_) => ErrorKind::Infrastructure,
        }
    }
}

impl Classify for crate::repos::account_repo::AccountRepoError {
    fn kind(&self) -> ErrorKind {
        use crate::repos::account_repo::AccountRepoError::*;
        match self {
            NotFound(_) | CrossInstance { .. } | DuplicateAddress(_) => ErrorKind::Validation,
            Database(_) => ErrorKind::Infrastructure,
        }
    }
}

impl Classify for crate::repos::command_repo::CommandRepoError {
    fn kind(&self) -> ErrorKind {
        use crate::repos::command_repo::CommandRepoError::*;
        match self {
            Duplicate { .. } => ErrorKind::IdempotencyDuplicate,
            Database(_) => ErrorKind::Infrastructure,
        }
    }
}

impl Classify for crate::repos::instance_repo::InstanceError {
    fn kind(&self) -> ErrorKind {
        use crate::repos::instance_repo::InstanceError::*;
        match self {
            NotFound(_) => ErrorKind::Validation,
            Database(_) => ErrorKind::Infrastructure,
        }
    }
}

impl Classify for crate::services::transaction_applier::ApplierError {
    fn kind(&self) -> ErrorKind {
        use crate::services::transaction_applier::ApplierError::*;
        match self {
            StaleAccount(_) => ErrorKind::StaleAccount,
            Database(_) => ErrorKind::Infrastructure,
            Account(inner) => inner.kind(),
            _ => ErrorKind::BalanceInvariant,
        }
    }
}
