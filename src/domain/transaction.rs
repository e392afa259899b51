//! Transaction model: a set of >= 2 entries that net to zero per currency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

use super::entry::EntryInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Posted,
    Archived,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub status: TransactionStatus,
    pub posted_at: Option<DateTime<Utc>>,
}

/// The transaction as submitted on the wire: a status plus entries
/// addressed by account address. Resolved into concrete `Entry` rows by the
/// applier once accounts are loaded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionMap {
    pub status: TransactionStatus,
    pub effective_at: Option<DateTime<Utc>>,
    pub entries: Vec<EntryInput>,
}
