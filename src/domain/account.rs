//! Account model (C2): balance slots, the transition table, and the
//! availability invariant that drives `NEGATIVE_BALANCE` rejection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Type;
use thiserror::Error;
use uuid::Uuid;

use super::balance::Balance;
use super::entry::EntryType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "account_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    /// The normal balance implied by type, absent an explicit override
    /// (contra-accounts set `normal_balance` explicitly at creation).
    pub fn default_normal_balance(self) -> NormalBalance {
        match self {
            AccountType::Asset | AccountType::Expense => NormalBalance::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => NormalBalance::Credit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "normal_balance", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NormalBalance {
    Debit,
    Credit,
}

impl NormalBalance {
    pub fn opposite(self) -> NormalBalance {
        match self {
            NormalBalance::Debit => NormalBalance::Credit,
            NormalBalance::Credit => NormalBalance::Debit,
        }
    }

    fn slot_of(self, bal: Balance) -> i64 {
        match self {
            NormalBalance::Debit => bal.debit,
            NormalBalance::Credit => bal.credit,
        }
    }
}

/// The only transitions `Account::update_balances` accepts. Anything else is
/// an `InvalidTransition` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxTransition {
    Posted,
    Pending,
    PendingToPosted { old_amount: i64 },
    PendingToPending { old_amount: i64 },
    PendingToArchived,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub address: String,
    pub name: String,
    #[sqlx(rename = "type")]
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub currency: String,
    pub allowed_negative: bool,
    pub description: Option<String>,
    pub context: Option<Value>,
    pub available: i64,
    pub posted_amount: i64,
    pub posted_debit: i64,
    pub posted_credit: i64,
    pub pending_amount: i64,
    pub pending_debit: i64,
    pub pending_credit: i64,
    pub lock_version: i64,
}

impl Account {
    pub fn posted(&self) -> Balance {
        Balance { amount: self.posted_amount, debit: self.posted_debit, credit: self.posted_credit }
    }

    pub fn pending(&self) -> Balance {
        Balance { amount: self.pending_amount, debit: self.pending_debit, credit: self.pending_credit }
    }

    fn with_balances(&self, posted: Balance, pending: Balance) -> Account {
        let mut next = self.clone();
        next.posted_amount = posted.amount;
        next.posted_debit = posted.debit;
        next.posted_credit = posted.credit;
        next.pending_amount = pending.amount;
        next.pending_debit = pending.debit;
        next.pending_credit = pending.credit;
        next
    }

    /// Applies one entry under one transition, returning a new, still
    /// unpersisted, account state. The caller is responsible for writing it
    /// back with `WHERE lock_version = self.lock_version` and treating a
    /// zero-row result as `StaleAccount`.
    pub fn update_balances(
        &self,
        amount: i64,
        et: EntryType,
        transition: TrxTransition,
    ) -> Result<Account, AccountError> {
        let nb = self.normal_balance;
        let (posted, pending) = match transition {
            TrxTransition::Posted => (self.posted().update(amount, et, nb), self.pending()),
            TrxTransition::Pending => (self.posted(), self.pending().update(amount, et, nb)),
            TrxTransition::PendingToPosted { old_amount } => (
                self.posted().update(amount, et, nb),
                self.pending().reverse_pending(old_amount, et, nb),
            ),
            TrxTransition::PendingToPending { old_amount } => (
                self.posted(),
                self.pending().reverse_and_update_pending(old_amount, amount, et, nb),
            ),
            TrxTransition::PendingToArchived => (self.posted(), self.pending().reverse_pending(amount, et, nb)),
        };

        let mut next = self.with_balances(posted, pending);
        let opposite = nb.opposite();
        let mut available = next.posted_amount - opposite.slot_of(next.pending());
        if available < 0 {
            if !next.allowed_negative {
                return Err(AccountError::NegativeBalance {
                    account_id: self.id,
                    available,
                });
            }
        } else {
            available = available.max(0);
        }
        next.available = available;
        next.lock_version = self.lock_version + 1;
        Ok(next)
    }
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account {account_id} would go negative ({available}) without allowed_negative")]
    NegativeBalance { account_id: Uuid, available: i64 },
    #[error("entry currency {entry_currency} does not match account currency {account_currency}")]
    CurrencyMismatch { entry_currency: String, account_currency: String },
    #[error("entry type cannot change for an existing entry")]
    EntryTypeImmutable,
    #[error("account {0} is stale: lock_version changed concurrently")]
    StaleAccount(Uuid),
    #[error("invalid account transition")]
    InvalidTransition,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_account(nb: NormalBalance, allowed_negative: bool) -> Account {
        Account {
            id: Uuid::new_v4(),
            instance_id: Uuid::new_v4(),
            address: "cash:main".into(),
            name: "Cash".into(),
            account_type: AccountType::Asset,
            normal_balance: nb,
            currency: "USD".into(),
            allowed_negative,
            description: None,
            context: None,
            available: 0,
            posted_amount: 0,
            posted_debit: 0,
            posted_credit: 0,
            pending_amount: 0,
            pending_debit: 0,
            pending_credit: 0,
            lock_version: 0,
        }
    }

    #[test]
    fn posted_direct_updates_posted_only() {
        let a = test_account(NormalBalance::Debit, false);
        let next = a.update_balances(100, EntryType::Debit, TrxTransition::Posted).unwrap();
        assert_eq!(next.posted_amount, 100);
        assert_eq!(next.pending_amount, 0);
        assert_eq!(next.available, 100);
        assert_eq!(next.lock_version, 1);
    }

    #[test]
    fn pending_hold_reserves_availability() {
        let a = test_account(NormalBalance::Debit, false);
        let posted = a.update_balances(100, EntryType::Debit, TrxTransition::Posted).unwrap();
        // A pending credit against a debit-normal account reserves funds.
        let held = posted.update_balances(30, EntryType::Credit, TrxTransition::Pending).unwrap();
        assert_eq!(held.available, 70);
    }

    #[test]
    fn pending_to_posted_releases_and_applies() {
        let a = test_account(NormalBalance::Debit, false);
        let posted = a.update_balances(100, EntryType::Debit, TrxTransition::Posted).unwrap();
        let held = posted.update_balances(30, EntryType::Credit, TrxTransition::Pending).unwrap();
        let settled = held
            .update_balances(30, EntryType::Credit, TrxTransition::PendingToPosted { old_amount: 30 })
            .unwrap();
        assert_eq!(settled.posted_amount, 70);
        assert_eq!(settled.pending_amount, 0);
        assert_eq!(settled.available, 70);
    }

    #[test]
    fn pending_to_archived_releases_hold() {
        let a = test_account(NormalBalance::Debit, false);
        let posted = a.update_balances(100, EntryType::Debit, TrxTransition::Posted).unwrap();
        let held = posted.update_balances(30, EntryType::Credit, TrxTransition::Pending).unwrap();
        let archived = held
            .update_balances(30, EntryType::Credit, TrxTransition::PendingToArchived)
            .unwrap();
        assert_eq!(archived.pending_amount, 0);
        assert_eq!(archived.posted_amount, 100);
        assert_eq!(archived.available, 100);
    }

    #[test]
    fn negative_balance_rejected_without_flag() {
        let a = test_account(NormalBalance::Debit, false);
        let posted = a.update_balances(50, EntryType::Debit, TrxTransition::Posted).unwrap();
        let result = posted.update_balances(100, EntryType::Credit, TrxTransition::Posted);
        assert!(matches!(result, Err(AccountError::NegativeBalance { .. })));
    }

    #[test]
    fn negative_balance_allowed_when_flagged() {
        let a = test_account(NormalBalance::Debit, true);
        let posted = a.update_balances(50, EntryType::Debit, TrxTransition::Posted).unwrap();
        let result = posted.update_balances(100, EntryType::Credit, TrxTransition::Posted).unwrap();
        assert_eq!(result.available, -50);
    }
}
