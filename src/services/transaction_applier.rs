//! Transaction applier (C3): the double-entry invariant engine. Given a
//! `TransactionMap`, validates it, applies balance changes to every
//! referenced account under OCC, and writes a `BalanceHistoryEntry`
//! snapshot per touched account — all inside the caller's DB transaction.
//!
//! Grounded in `journal_service::process_gl_posting_request`'s shape
//! (validate → tx.begin → insert → mark processed), generalized from a
//! single posted-only insert to the full pending/posted/archived state
//! machine and to updates that must diff against a prior version.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{Postgres, Transaction as DbTx};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Account, AccountError, EntryType, TransactionMap, TransactionStatus, TrxTransition};
use crate::repos::{account_repo, balance_history_repo, transaction_repo};
use crate::repos::account_repo::AccountRepoError;

#[derive(Debug, Error)]
pub enum ApplierError {
    #[error("a transaction must reference at least 2 entries, got {0}")]
    TooFewEntries(usize),
    #[error("creating an archived transaction directly is forbidden")]
    ArchivedAtCreation,
    #[error("per-currency debit/credit mismatch for {currency}: debit={debit} credit={credit}")]
    Unbalanced { currency: String, debit: i64, credit: i64 },
    #[error("account {address} not found in this instance")]
    AccountMissing { address: String },
    #[error("account {address} belongs to a different instance")]
    CrossInstanceAccount { address: String },
    #[error("entry currency {entry_currency} does not match account {address} currency {account_currency}")]
    CurrencyMismatch { address: String, entry_currency: String, account_currency: String },
    #[error("the set of referenced accounts cannot change between versions of a transaction")]
    AccountSetChanged,
    #[error("entry type cannot change for an existing entry")]
    EntryTypeImmutable,
    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),
    #[error("transaction {0} is in a terminal state and cannot be updated")]
    TerminalState(Uuid),
    #[error("account went stale under concurrent update: {0}")]
    StaleAccount(Uuid),
    #[error("account balance invariant violated: {0}")]
    Account(#[from] AccountError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AccountRepoError> for ApplierError {
    fn from(e: AccountRepoError) -> Self {
        match e {
            AccountRepoError::NotFound(address) => ApplierError::AccountMissing { address },
            AccountRepoError::CrossInstance { address } => ApplierError::CrossInstanceAccount { address },
            AccountRepoError::DuplicateAddress(a) => ApplierError::AccountMissing { address: a },
            AccountRepoError::Database(e) => ApplierError::Database(e),
        }
    }
}

pub struct AppliedTransaction {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub touched_account_ids: Vec<Uuid>,
}

fn validate_balanced(entries: &[(Account, crate::domain::EntryInput)]) -> Result<(), ApplierError> {
    let mut totals: HashMap<&str, (i64, i64)> = HashMap::new();
    for (account, entry) in entries {
        if entry.currency != account.currency {
            return Err(ApplierError::CurrencyMismatch {
                address: account.address.clone(),
                entry_currency: entry.currency.clone(),
                account_currency: account.currency.clone(),
            });
        }
        let slot = totals.entry(entry.currency.as_str()).or_insert((0, 0));
        match entry.entry_type {
            EntryType::Debit => slot.0 += entry.amount,
            EntryType::Credit => slot.1 += entry.amount,
        }
    }
    for (currency, (debit, credit)) in totals {
        if debit != credit {
            return Err(ApplierError::Unbalanced { currency: currency.to_string(), debit, credit });
        }
    }
    Ok(())
}

/// Applies one entry to its account and persists the version-guarded write
/// plus the balance-history snapshot. Returns `Err(StaleAccount)` the moment
/// any single account's guarded UPDATE affects zero rows — the caller must
/// treat this as fatal for the whole surrounding DB transaction (it is about
/// to be rolled back by the OCC driver).
async fn apply_and_persist(
    tx: &mut DbTx<'_, Postgres>,
    account: &Account,
    amount: i64,
    entry_type: EntryType,
    transition: TrxTransition,
    entry_id: Uuid,
) -> Result<(), ApplierError> {
    let next = account.update_balances(amount, entry_type, transition)?;
    let ok = account_repo::update_balances_tx(tx, &next, account.lock_version).await?;
    if !ok {
        return Err(ApplierError::StaleAccount(account.id));
    }
    balance_history_repo::insert_snapshot_tx(tx, &next, Some(entry_id)).await?;
    Ok(())
}

/// §4.C3: creates a new Transaction + Entries and applies balance effects.
/// `status` must be `pending` or `posted`; `archived` is rejected here.
pub async fn create(
    tx: &mut DbTx<'_, Postgres>,
    instance_id: Uuid,
    transaction_id: Uuid,
    tmap: &TransactionMap,
) -> Result<AppliedTransaction, ApplierError> {
    if tmap.status == TransactionStatus::Archived {
        return Err(ApplierError::ArchivedAtCreation);
    }
    if tmap.entries.len() < 2 {
        return Err(ApplierError::TooFewEntries(tmap.entries.len()));
    }

    let addresses: Vec<String> = tmap.entries.iter().map(|e| e.account_address.clone()).collect();
    let accounts = account_repo::load_all_tx(tx, instance_id, &addresses).await?;
    let paired: Vec<(Account, crate::domain::EntryInput)> =
        accounts.iter().cloned().zip(tmap.entries.iter().cloned()).collect();
    validate_balanced(&paired)?;

    let transition = match tmap.status {
        TransactionStatus::Posted => TrxTransition::Posted,
        TransactionStatus::Pending => TrxTransition::Pending,
        TransactionStatus::Archived => unreachable!("rejected above"),
    };

    let posted_at = if tmap.status == TransactionStatus::Posted { Some(Utc::now()) } else { None };
    transaction_repo::insert_tx(tx, transaction_id, instance_id, tmap.status, posted_at).await?;

    let mut touched = Vec::with_capacity(paired.len());
    for (account, entry) in &paired {
        let entry_id = Uuid::new_v4();
        transaction_repo::insert_entry_tx(
            tx,
            entry_id,
            transaction_id,
            account.id,
            entry.entry_type,
            entry.amount,
            &entry.currency,
        )
        .await?;
        apply_and_persist(tx, account, entry.amount, entry.entry_type, transition, entry_id).await?;
        touched.push(account.id);
    }

    Ok(AppliedTransaction { transaction_id, status: tmap.status, touched_account_ids: touched })
}

/// §4.C3: applies an update to an existing transaction, driving
/// `pending_to_posted`, `pending_to_pending`, or `pending_to_archived`
/// depending on `tmap.status` relative to the transaction's current status.
pub async fn update(
    tx: &mut DbTx<'_, Postgres>,
    instance_id: Uuid,
    transaction_id: Uuid,
    tmap: &TransactionMap,
) -> Result<AppliedTransaction, ApplierError> {
    let existing = transaction_repo::find_by_id_tx(tx, transaction_id)
        .await?
        .ok_or(ApplierError::TransactionNotFound(transaction_id))?;

    if existing.status != TransactionStatus::Pending {
        return Err(ApplierError::TerminalState(transaction_id));
    }

    let existing_entries = transaction_repo::entries_for_transaction_tx(tx, transaction_id).await?;

    // Empty entries means "unchanged" (the archive path never resends
    // them — §8 S3), not "the account set shrank to nothing". Only a
    // non-empty, differing set is rejected.
    if !tmap.entries.is_empty() {
        let provided_addresses: Vec<String> = tmap.entries.iter().map(|e| e.account_address.clone()).collect();
        let provided_accounts = account_repo::load_all_tx(tx, instance_id, &provided_addresses).await?;

        let mut existing_ids: Vec<Uuid> = existing_entries.iter().map(|e| e.account_id).collect();
        existing_ids.sort();
        let mut provided_ids: Vec<Uuid> = provided_accounts.iter().map(|a| a.id).collect();
        provided_ids.sort();
        if existing_ids != provided_ids {
            return Err(ApplierError::AccountSetChanged);
        }
    }

    let transition_for = |new_status: TransactionStatus| match new_status {
        TransactionStatus::Posted => TrxTransitionKind::ToPosted,
        TransactionStatus::Pending => TrxTransitionKind::ToPending,
        TransactionStatus::Archived => TrxTransitionKind::ToArchived,
    };
    let kind = transition_for(tmap.status);

    // Resolve every existing entry's account and its post-update amount
    // first, then validate the resulting set is still balanced per currency
    // before persisting anything — the same check `create()` runs, applied
    // to the amended entry set rather than the as-submitted one.
    let mut resolved = Vec::with_capacity(existing_entries.len());
    for existing_entry in &existing_entries {
        let account = account_repo::find_by_id_tx(tx, existing_entry.account_id)
            .await?
            .ok_or(ApplierError::AccountMissing { address: existing_entry.account_id.to_string() })?;

        let new_amount = tmap
            .entries
            .iter()
            .find(|e| e.account_address == account.address)
            .map(|e| {
                if e.entry_type != existing_entry.entry_type {
                    Err(ApplierError::EntryTypeImmutable)
                } else {
                    Ok(e.amount)
                }
            })
            .transpose()?
            .unwrap_or(existing_entry.amount);

        resolved.push((account, new_amount));
    }

    let amended: Vec<(Account, crate::domain::EntryInput)> = resolved
        .iter()
        .zip(existing_entries.iter())
        .map(|((account, new_amount), existing_entry)| {
            (
                account.clone(),
                crate::domain::EntryInput {
                    account_address: account.address.clone(),
                    entry_type: existing_entry.entry_type,
                    amount: *new_amount,
                    currency: account.currency.clone(),
                },
            )
        })
        .collect();
    validate_balanced(&amended)?;

    let mut touched = Vec::with_capacity(existing_entries.len());
    for ((account, new_amount), existing_entry) in resolved.iter().zip(existing_entries.iter()) {
        let new_amount = *new_amount;
        let transition = match kind {
            TrxTransitionKind::ToPosted => TrxTransition::PendingToPosted { old_amount: existing_entry.amount },
            TrxTransitionKind::ToPending => {
                TrxTransition::PendingToPending { old_amount: existing_entry.amount }
            }
            TrxTransitionKind::ToArchived => TrxTransition::PendingToArchived,
        };

        if new_amount != existing_entry.amount {
            transaction_repo::update_entry_amount_tx(tx, existing_entry.id, new_amount).await?;
        }

        let amount_for_transition = match kind {
            TrxTransitionKind::ToArchived => existing_entry.amount,
            _ => new_amount,
        };
        apply_and_persist(
            tx,
            account,
            amount_for_transition,
            existing_entry.entry_type,
            transition,
            existing_entry.id,
        )
        .await?;
        touched.push(account.id);
    }

    let posted_at = match tmap.status {
        TransactionStatus::Posted => Some(Utc::now()),
        _ => None,
    };
    transaction_repo::update_status_tx(tx, transaction_id, tmap.status, posted_at).await?;

    Ok(AppliedTransaction { transaction_id, status: tmap.status, touched_account_ids: touched })
}

#[derive(Debug, Clone, Copy)]
enum TrxTransitionKind {
    ToPosted,
    ToPending,
    ToArchived,
}
