//! Command schema (C5): the tagged payload union submitted by callers, and
//! the queue-tracking record paired 1:1 with each persisted `Command`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Type;
use uuid::Uuid;

use super::account::{AccountType, NormalBalance};
use super::entry::EntryInput;
use super::transaction::TransactionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "command_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    CreateAccount,
    UpdateAccount,
    CreateTransaction,
    UpdateTransaction,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateAccountPayload {
    pub address: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub currency: String,
    pub normal_balance: Option<NormalBalance>,
    #[serde(default)]
    pub allowed_negative: bool,
    pub description: Option<String>,
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct UpdateAccountPayload {
    pub description: Option<String>,
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateTransactionPayload {
    pub status: TransactionStatus,
    pub effective_at: Option<DateTime<Utc>>,
    pub entries: Vec<EntryInput>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateTransactionPayload {
    pub status: TransactionStatus,
    pub entries: Option<Vec<EntryInput>>,
}

/// The `event_map` field: an action-tagged variant, one per worker in C7.
/// Every variant carries the idempotency envelope (`source`, `source_idempk`,
/// `update_idempk` for updates, `instance_address`) plus its action payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventMap {
    CreateAccount {
        source: String,
        source_idempk: String,
        instance_address: String,
        #[serde(flatten)]
        payload: CreateAccountPayload,
    },
    UpdateAccount {
        source: String,
        source_idempk: String,
        update_idempk: String,
        instance_address: String,
        #[serde(flatten)]
        payload: UpdateAccountPayload,
    },
    CreateTransaction {
        source: String,
        source_idempk: String,
        instance_address: String,
        #[serde(flatten)]
        payload: CreateTransactionPayload,
    },
    UpdateTransaction {
        source: String,
        source_idempk: String,
        update_idempk: String,
        instance_address: String,
        #[serde(flatten)]
        payload: UpdateTransactionPayload,
    },
}

impl EventMap {
    pub fn action(&self) -> CommandAction {
        match self {
            EventMap::CreateAccount { .. } => CommandAction::CreateAccount,
            EventMap::UpdateAccount { .. } => CommandAction::UpdateAccount,
            EventMap::CreateTransaction { .. } => CommandAction::CreateTransaction,
            EventMap::UpdateTransaction { .. } => CommandAction::UpdateTransaction,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            EventMap::CreateAccount { source, .. }
            | EventMap::UpdateAccount { source, .. }
            | EventMap::CreateTransaction { source, .. }
            | EventMap::UpdateTransaction { source, .. } => source,
        }
    }

    pub fn source_idempk(&self) -> &str {
        match self {
            EventMap::CreateAccount { source_idempk, .. }
            | EventMap::UpdateAccount { source_idempk, .. }
            | EventMap::CreateTransaction { source_idempk, .. }
            | EventMap::UpdateTransaction { source_idempk, .. } => source_idempk,
        }
    }

    pub fn update_idempk(&self) -> Option<&str> {
        match self {
            EventMap::UpdateAccount { update_idempk, .. } | EventMap::UpdateTransaction { update_idempk, .. } => {
                Some(update_idempk)
            }
            _ => None,
        }
    }

    pub fn instance_address(&self) -> &str {
        match self {
            EventMap::CreateAccount { instance_address, .. }
            | EventMap::UpdateAccount { instance_address, .. }
            | EventMap::CreateTransaction { instance_address, .. }
            | EventMap::UpdateTransaction { instance_address, .. } => instance_address,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Command {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub event_map: EventMap,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "queue_item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    OccTimeout,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueError {
    pub message: String,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CommandQueueItem {
    pub id: Uuid,
    pub command_id: Uuid,
    pub status: QueueItemStatus,
    pub processor_id: Option<String>,
    pub processor_version: i64,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub occ_retry_count: i32,
    pub next_retry_after: Option<DateTime<Utc>>,
    pub errors: Vec<QueueError>,
}
