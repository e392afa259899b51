//! Entry model (C2): a single debit or credit against one account.

use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

use super::account::NormalBalance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "entry_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    /// True when this entry type is the account's normal balance side.
    pub fn matches(self, nb: NormalBalance) -> bool {
        matches!(
            (self, nb),
            (EntryType::Debit, NormalBalance::Debit) | (EntryType::Credit, NormalBalance::Credit)
        )
    }

    pub fn opposite(self) -> EntryType {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Entry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    #[sqlx(rename = "type")]
    pub entry_type: EntryType,
    pub amount: i64,
    pub currency: String,
}

/// An entry as it arrives on the wire, addressed by account address rather
/// than account id — resolved to an `Entry` once the applier has loaded the
/// referenced accounts.
///
/// §6's payload table lists `entries: [{account_address, amount, currency}]`
/// without a `type` field, but every §8 scenario submits entries tagged
/// "debit"/"credit" and the Entry model invariant (§3) requires one — an
/// entry's direction can't be recovered from `amount` alone since `value
/// amount ≥ 0` always. The wire format here carries `type` explicitly.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntryInput {
    pub account_address: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: i64,
    pub currency: String,
}
