pub mod account;
pub mod balance;
pub mod command;
pub mod entry;
pub mod transaction;

pub use account::{Account, AccountError, AccountType, NormalBalance, TrxTransition};
pub use balance::Balance;
pub use command::{
    Command, CommandAction, CommandQueueItem, CreateAccountPayload, CreateTransactionPayload, EventMap,
    QueueItemStatus, UpdateAccountPayload, UpdateTransactionPayload,
};
pub use entry::{Entry, EntryInput, EntryType};
pub use transaction::{Transaction, TransactionMap, TransactionStatus};
