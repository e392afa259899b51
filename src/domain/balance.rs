//! Pure balance-slot math (C1).
//!
//! A `Balance` is one side of an account's ledger state — `posted` or
//! `pending`. The functions here never touch the database and never clamp;
//! callers guarantee `i64` range and non-negative amounts.

use serde::{Deserialize, Serialize};

use super::account::NormalBalance;
use super::entry::EntryType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub amount: i64,
    pub debit: i64,
    pub credit: i64,
}

impl Balance {
    fn slot_mut(&mut self, et: EntryType) -> &mut i64 {
        match et {
            EntryType::Debit => &mut self.debit,
            EntryType::Credit => &mut self.credit,
        }
    }

    /// Applies a new entry of amount `a` to this slot.
    ///
    /// If the entry's type matches the account's normal balance side, the net
    /// `amount` grows; otherwise it shrinks. Either way the gross side for
    /// `et` records `a`.
    pub fn update(mut self, a: i64, et: EntryType, nb: NormalBalance) -> Self {
        if et.matches(nb) {
            self.amount += a;
        } else {
            self.amount -= a;
        }
        *self.slot_mut(et) += a;
        self
    }

    /// Undoes a pending entry of amount `a`, releasing the availability it
    /// reserved.
    pub fn reverse_pending(mut self, a: i64, et: EntryType, nb: NormalBalance) -> Self {
        if et.matches(nb) {
            self.amount += a;
        } else {
            self.amount -= a;
        }
        *self.slot_mut(et) -= a;
        self
    }

    /// Reverses `old` and applies `new` on the same side in one step, so the
    /// intermediate state is never observable.
    pub fn reverse_and_update_pending(self, old: i64, new: i64, et: EntryType, nb: NormalBalance) -> Self {
        self.reverse_pending(old, et, nb).update(new, et, nb)
    }
}
