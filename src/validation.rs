//! Payload-shape validation (§6, §7 VALIDATION): the field-format checks a
//! command must pass before it is ever inserted. A command that fails here
//! is never written to the store and never retried by the queue — the
//! caller gets a field-tagged response back instead (§7 propagation policy).
//!
//! Grounded in `gl-rs/src/validation.rs`'s shape (one validator function per
//! payload, a `Vec`-accumulating field-error type), generalized from GL
//! posting requests to this spec's four command payloads.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{CommandAction, EventMap, TransactionStatus};
use crate::errors::{ErrorKind, FieldError};

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_0-9]+(:[a-zA-Z_0-9]+)*$").expect("valid regex"));
static SOURCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{1,29}$").expect("valid regex"));

fn is_address(s: &str) -> bool {
    ADDRESS_RE.is_match(s)
}

fn is_source(s: &str) -> bool {
    SOURCE_RE.is_match(s)
}

/// Validates the envelope and payload of one `event_map` against §6's field
/// formats and §3's structural invariants that can be checked without
/// touching the store (the balance/cross-instance checks live in C3, since
/// they need loaded accounts). Returns every violation found, not just the
/// first, so a caller can report them all at once on the submitted shape.
pub fn validate(event_map: &EventMap) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if !is_source(event_map.source()) {
        errors.push(FieldError::new("source", ErrorKind::Validation, "source must match ^[a-z0-9][a-z0-9_-]{1,29}$"));
    }
    if event_map.source_idempk().is_empty() {
        errors.push(FieldError::new("source_idempk", ErrorKind::Validation, "source_idempk must not be empty"));
    }
    if !is_address(event_map.instance_address()) {
        errors.push(FieldError::new(
            "instance_address",
            ErrorKind::Validation,
            "instance_address must match ^[a-zA-Z_0-9]+(:[a-zA-Z_0-9]+)*$",
        ));
    }
    if let Some(action @ (CommandAction::UpdateAccount | CommandAction::UpdateTransaction)) =
        Some(event_map.action())
    {
        let _ = action;
        match event_map.update_idempk() {
            Some(k) if !k.is_empty() => {}
            _ => errors.push(FieldError::new(
                "update_idempk",
                ErrorKind::Validation,
                "update_idempk is required for update_* actions",
            )),
        }
    }

    match event_map {
        EventMap::CreateAccount { payload, .. } => {
            if !is_address(&payload.address) {
                errors.push(FieldError::new("address", ErrorKind::Validation, "address must match the address pattern"));
            }
            if payload.name.trim().is_empty() {
                errors.push(FieldError::new("name", ErrorKind::Validation, "name must not be empty"));
            }
            if payload.currency.trim().is_empty() {
                errors.push(FieldError::new("currency", ErrorKind::Validation, "currency must not be empty"));
            }
        }
        EventMap::UpdateAccount { .. } => {
            // description/context are both optional; no further shape to check.
        }
        EventMap::CreateTransaction { payload, .. } => {
            if payload.status == TransactionStatus::Archived {
                errors.push(FieldError::new(
                    "status",
                    ErrorKind::Validation,
                    "a transaction cannot be created directly in archived status",
                ));
            }
            validate_entries(&payload.entries, &mut errors);
        }
        EventMap::UpdateTransaction { payload, .. } => {
            if let Some(entries) = &payload.entries {
                validate_entries(entries, &mut errors);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_entries(entries: &[crate::domain::EntryInput], errors: &mut Vec<FieldError>) {
    if entries.len() < 2 {
        errors.push(FieldError::new(
            "entries",
            ErrorKind::BalanceInvariant,
            format!("a transaction needs at least 2 entries, got {}", entries.len()),
        ));
    }
    for (i, e) in entries.iter().enumerate() {
        if !is_address(&e.account_address) {
            errors.push(FieldError::new(
                format!("entries[{i}].account_address"),
                ErrorKind::Validation,
                "account_address must match the address pattern",
            ));
        }
        if e.amount < 0 {
            errors.push(FieldError::new(
                format!("entries[{i}].amount"),
                ErrorKind::Validation,
                "amount must be >= 0",
            ));
        }
        if e.currency.trim().is_empty() {
            errors.push(FieldError::new(
                format!("entries[{i}].currency"),
                ErrorKind::Validation,
                "currency must not be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CreateAccountPayload, AccountType};

    fn valid_create_account() -> EventMap {
        EventMap::CreateAccount {
            source: "ledger-api".into(),
            source_idempk: "idem-1".into(),
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
        }
    }

    #[test]
    fn accepts_well_formed_create_account() {
        assert!(validate(&valid_create_account()).is_ok());
    }

    #[test]
    fn rejects_bad_source() {
        let mut event = valid_create_account();
        if let EventMap::CreateAccount { source, .. } = &mut event {
            *source = "BAD SOURCE!".into();
        }
        let errors = validate(&event).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "source"));
    }

    #[test]
    fn rejects_bad_address() {
        let mut event = valid_create_account();
        if let EventMap::CreateAccount { payload, .. } = &mut event {
            payload.address = "bad address!".into();
        }
        let errors = validate(&event).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "address"));
    }

    #[test]
    fn rejects_too_few_entries() {
        use crate::domain::{CreateTransactionPayload, EntryInput, EntryType};
        let event = EventMap::CreateTransaction {
            source: "ledger-api".into(),
            source_idempk: "idem-2".into(),
            instance_address: "acme".into(),
            payload: CreateTransactionPayload {
                status: TransactionStatus::Posted,
                effective_at: None,
                entries: vec![EntryInput {
                    account_address: "cash:main".into(),
                    entry_type: EntryType::Debit,
                    amount: 100,
                    currency: "USD".into(),
                }],
            },
        };
        let errors = validate(&event).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "entries"));
    }

    #[test]
    fn rejects_archived_at_creation() {
        use crate::domain::{CreateTransactionPayload, EntryInput, EntryType};
        let event = EventMap::CreateTransaction {
            source: "ledger-api".into(),
            source_idempk: "idem-3".into(),
            instance_address: "acme".into(),
            payload: CreateTransactionPayload {
                status: TransactionStatus::Archived,
                effective_at: None,
                entries: vec![
                    EntryInput { account_address: "cash:main".into(), entry_type: EntryType::Debit, amount: 10, currency: "USD".into() },
                    EntryInput { account_address: "rev:sales".into(), entry_type: EntryType::Credit, amount: 10, currency: "USD".into() },
                ],
            },
        };
        let errors = validate(&event).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "status"));
    }

    #[test]
    fn update_actions_require_update_idempk() {
        use crate::domain::UpdateAccountPayload;
        let event = EventMap::UpdateAccount {
            source: "ledger-api".into(),
            source_idempk: "idem-4".into(),
            update_idempk: "".into(),
            instance_address: "acme".into(),
            payload: UpdateAccountPayload::default(),
        };
        let errors = validate(&event).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "update_idempk"));
    }
}
