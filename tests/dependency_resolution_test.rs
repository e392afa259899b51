//! S6 and §4.C8: an `update_transaction` submitted before its `create_transaction`
//! counterpart must not apply; it reverts to `pending` until the create
//! settles, then a later dispatch picks it back up.

mod common;

use ledger_rs::domain::{
    AccountType, CreateAccountPayload, CreateTransactionPayload, EntryInput, EntryType, EventMap, TransactionStatus,
    UpdateTransactionPayload,
};
use ledger_rs::services::submission::{self, SubmitOutcome};
use ledger_rs::workers::WorkerOutcome;
use serial_test::serial;

fn create_account_event(instance: &str, source_idempk: &str, address: &str, account_type: AccountType) -> EventMap {
    EventMap::CreateAccount {
        source: "ledger-test".into(),
        source_idempk: source_idempk.into(),
        instance_address: instance.into(),
        payload: CreateAccountPayload {
            address: address.into(),
            name: address.into(),
            account_type,
            currency: "USD".into(),
            normal_balance: None,
            allowed_negative: false,
            description: None,
            context: None,
        },
    }
}

#[tokio::test]
#[serial]
async fn update_before_create_reverts_to_pending_then_applies() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    common::expect_processed(
        common::submit_and_run(&pool, create_account_event(&instance, "acc-cash", "cash:main", AccountType::Asset)).await,
    );
    common::expect_processed(
        common::submit_and_run(&pool, create_account_event(&instance, "acc-rev", "rev:sales", AccountType::Revenue)).await,
    );

    let update_event = EventMap::UpdateTransaction {
        source: "ledger-test".into(),
        source_idempk: "u1".into(),
        update_idempk: "v1".into(),
        instance_address: instance.clone(),
        payload: UpdateTransactionPayload { status: TransactionStatus::Posted, entries: None },
    };
    let update_command_id = match submission::submit(&pool, update_event).await.unwrap() {
        SubmitOutcome::Queued { command_id, .. } => command_id,
        SubmitOutcome::Duplicate { .. } => panic!("must be a fresh submission"),
    };

    // Dispatching the update before its create exists must revert to
    // pending with a scheduled retry, not dead-letter or succeed.
    let outcome = common::run_command(&pool, update_command_id).await;
    match outcome {
        WorkerOutcome::RevertToPending { .. } => {}
        other => panic!("expected RevertToPending, got {other:?}"),
    }

    // Now the create_transaction counterpart arrives and is processed.
    let create_event = EventMap::CreateTransaction {
        source: "ledger-test".into(),
        source_idempk: "u1".into(),
        instance_address: instance.clone(),
        payload: CreateTransactionPayload {
            status: TransactionStatus::Pending,
            effective_at: None,
            entries: vec![
                EntryInput { account_address: "cash:main".into(), entry_type: EntryType::Debit, amount: 40, currency: "USD".into() },
                EntryInput { account_address: "rev:sales".into(), entry_type: EntryType::Credit, amount: 40, currency: "USD".into() },
            ],
        },
    };
    common::expect_processed(common::submit_and_run(&pool, create_event).await);

    // A later dispatch of the same update command now finds its dependency
    // satisfied and applies.
    let final_outcome = common::run_command(&pool, update_command_id).await;
    common::expect_processed(final_outcome);

    let instance_row = ledger_rs::repos::instance_repo::find_by_address(&pool, &instance).await.unwrap().unwrap();
    let cash = ledger_rs::repos::account_repo::find_by_address(&pool, instance_row.id, "cash:main").await.unwrap().unwrap();
    assert_eq!(cash.posted_amount, 40);
    assert_eq!(cash.pending_amount, 0);
}

/// An `update_transaction` whose create counterpart never existed and whose
/// source/source_idempk has no matching row stays recoverable (`RevertToPending`),
/// per `dependency_resolution::resolve`'s documented "absence is ambiguous" rule —
/// it is not dead-lettered just because nothing has arrived yet.
#[tokio::test]
#[serial]
async fn update_with_no_matching_create_ever_stays_pending() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    let update_event = EventMap::UpdateTransaction {
        source: "ledger-test".into(),
        source_idempk: "never-created".into(),
        update_idempk: "v1".into(),
        instance_address: instance.clone(),
        payload: UpdateTransactionPayload { status: TransactionStatus::Posted, entries: None },
    };

    let outcome = common::submit_and_run(&pool, update_event).await;
    match outcome {
        WorkerOutcome::RevertToPending { .. } => {}
        other => panic!("expected RevertToPending, got {other:?}"),
    }
}
