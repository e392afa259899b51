//! End-to-end scenarios from §8: submit real `EventMap`s through
//! `submission::submit` and one worker dispatch each (the same path the
//! scheduler drives), then assert on the resulting account/transaction rows.

mod common;

use ledger_rs::domain::{
    AccountType, CreateAccountPayload, CreateTransactionPayload, EntryInput, EntryType, EventMap, TransactionStatus,
    UpdateTransactionPayload,
};
use ledger_rs::repos::account_repo;
use ledger_rs::repos::transaction_repo;
use ledger_rs::workers::WorkerOutcome;
use serial_test::serial;

fn create_account(instance: &str, source_idempk: &str, address: &str, account_type: AccountType) -> EventMap {
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

fn create_transaction(
    instance: &str,
    source_idempk: &str,
    status: TransactionStatus,
    entries: Vec<(&str, EntryType, i64)>,
) -> EventMap {
    EventMap::CreateTransaction {
        source: "ledger-test".into(),
        source_idempk: source_idempk.into(),
        instance_address: instance.into(),
        payload: CreateTransactionPayload {
            status,
            effective_at: None,
            entries: entries
                .into_iter()
                .map(|(addr, et, amount)| EntryInput {
                    account_address: addr.into(),
                    entry_type: et,
                    amount,
                    currency: "USD".into(),
                })
                .collect(),
        },
    }
}

fn update_transaction(
    instance: &str,
    source_idempk: &str,
    update_idempk: &str,
    status: TransactionStatus,
    entries: Option<Vec<(&str, EntryType, i64)>>,
) -> EventMap {
    EventMap::UpdateTransaction {
        source: "ledger-test".into(),
        source_idempk: source_idempk.into(),
        update_idempk: update_idempk.into(),
        instance_address: instance.into(),
        payload: UpdateTransactionPayload {
            status,
            entries: entries.map(|es| {
                es.into_iter()
                    .map(|(addr, et, amount)| EntryInput {
                        account_address: addr.into(),
                        entry_type: et,
                        amount,
                        currency: "USD".into(),
                    })
                    .collect()
            }),
        },
    }
}

/// S1 — a direct-posted transaction moves both accounts' `posted` slots and
/// leaves `available` non-negative on both sides.
#[tokio::test]
#[serial]
async fn s1_double_entry_create_posts_both_sides() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-cash", "cash:main", AccountType::Asset)).await,
    );
    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-rev", "rev:sales", AccountType::Revenue)).await,
    );

    let outcome = common::submit_and_run(
        &pool,
        create_transaction(
            &instance,
            "t1",
            TransactionStatus::Posted,
            vec![("cash:main", EntryType::Debit, 100), ("rev:sales", EntryType::Credit, 100)],
        ),
    )
    .await;
    common::expect_processed(outcome);

    let instance_row = ledger_rs::repos::instance_repo::find_by_address(&pool, &instance).await.unwrap().unwrap();
    let cash = account_repo::find_by_address(&pool, instance_row.id, "cash:main").await.unwrap().unwrap();
    let rev = account_repo::find_by_address(&pool, instance_row.id, "rev:sales").await.unwrap().unwrap();

    assert_eq!(cash.posted_amount, 100);
    assert_eq!(cash.posted_debit, 100);
    assert_eq!(cash.posted_credit, 0);
    assert_eq!(cash.available, 100);

    assert_eq!(rev.posted_amount, 100);
    assert_eq!(rev.posted_credit, 100);
    assert_eq!(rev.posted_debit, 0);
    assert_eq!(rev.available, 100);
}

/// S2 — a pending hold reserves availability; posting it releases the hold
/// and applies the net to `posted`.
#[tokio::test]
#[serial]
async fn s2_pending_hold_then_post() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-cash", "cash:main", AccountType::Asset)).await,
    );
    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-rev", "rev:sales", AccountType::Revenue)).await,
    );
    common::expect_processed(
        common::submit_and_run(
            &pool,
            create_transaction(
                &instance,
                "t1",
                TransactionStatus::Posted,
                vec![("cash:main", EntryType::Debit, 100), ("rev:sales", EntryType::Credit, 100)],
            ),
        )
        .await,
    );

    common::expect_processed(
        common::submit_and_run(
            &pool,
            create_transaction(
                &instance,
                "t2",
                TransactionStatus::Pending,
                vec![("cash:main", EntryType::Credit, 30), ("rev:sales", EntryType::Debit, 30)],
            ),
        )
        .await,
    );

    common::expect_processed(
        common::submit_and_run(
            &pool,
            update_transaction(&instance, "t2", "u1", TransactionStatus::Posted, None),
        )
        .await,
    );

    let instance_row = ledger_rs::repos::instance_repo::find_by_address(&pool, &instance).await.unwrap().unwrap();
    let cash = account_repo::find_by_address(&pool, instance_row.id, "cash:main").await.unwrap().unwrap();
    let rev = account_repo::find_by_address(&pool, instance_row.id, "rev:sales").await.unwrap().unwrap();

    assert_eq!(cash.posted_amount, 70);
    assert_eq!(cash.pending_amount, 0);
    assert_eq!(cash.pending_debit, 0);
    assert_eq!(cash.pending_credit, 0);

    assert_eq!(rev.posted_amount, 70);
    assert_eq!(rev.pending_amount, 0);
}

/// S3 — archiving a pending transaction releases its hold and leaves
/// `posted` untouched; the row itself ends `archived` with no `posted_at`.
#[tokio::test]
#[serial]
async fn s3_pending_archived_restores_prior_balances() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-cash", "cash:main", AccountType::Asset)).await,
    );
    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-rev", "rev:sales", AccountType::Revenue)).await,
    );
    common::expect_processed(
        common::submit_and_run(
            &pool,
            create_transaction(
                &instance,
                "t1",
                TransactionStatus::Posted,
                vec![("cash:main", EntryType::Debit, 100), ("rev:sales", EntryType::Credit, 100)],
            ),
        )
        .await,
    );

    let txn_id = match common::submit_and_run(
        &pool,
        create_transaction(
            &instance,
            "t2",
            TransactionStatus::Pending,
            vec![("cash:main", EntryType::Credit, 30), ("rev:sales", EntryType::Debit, 30)],
        ),
    )
    .await
    {
        WorkerOutcome::Processed(id) => id,
        other => panic!("expected Processed, got {other:?}"),
    };

    common::expect_processed(
        common::submit_and_run(
            &pool,
            update_transaction(&instance, "t2", "u1", TransactionStatus::Archived, None),
        )
        .await,
    );

    let instance_row = ledger_rs::repos::instance_repo::find_by_address(&pool, &instance).await.unwrap().unwrap();
    let cash = account_repo::find_by_address(&pool, instance_row.id, "cash:main").await.unwrap().unwrap();
    let rev = account_repo::find_by_address(&pool, instance_row.id, "rev:sales").await.unwrap().unwrap();

    assert_eq!(cash.posted_amount, 100);
    assert_eq!(cash.pending_amount, 0);
    assert_eq!(rev.posted_amount, 100);
    assert_eq!(rev.pending_amount, 0);

    let txn = transaction_repo::find_by_id(&pool, txn_id).await.unwrap().unwrap();
    assert_eq!(txn.status, TransactionStatus::Archived);
    assert!(txn.posted_at.is_none());
}

/// S7 — a transaction that would push a non-`allowed_negative` account
/// negative is refused; no balance on either referenced account changes.
#[tokio::test]
#[serial]
async fn s7_negative_balance_refused_leaves_balances_untouched() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-cash", "cash:main", AccountType::Asset)).await,
    );
    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-rev", "rev:sales", AccountType::Revenue)).await,
    );
    common::expect_processed(
        common::submit_and_run(
            &pool,
            create_transaction(
                &instance,
                "t1",
                TransactionStatus::Posted,
                vec![("cash:main", EntryType::Debit, 50), ("rev:sales", EntryType::Credit, 50)],
            ),
        )
        .await,
    );

    let outcome = common::submit_and_run(
        &pool,
        create_transaction(
            &instance,
            "t2",
            TransactionStatus::Posted,
            vec![("rev:sales", EntryType::Debit, 100), ("cash:main", EntryType::Credit, 100)],
        ),
    )
    .await;

    match outcome {
        WorkerOutcome::Failed { kind, .. } => assert_eq!(kind, ledger_rs::errors::ErrorKind::BalanceInvariant),
        other => panic!("expected Failed(BalanceInvariant), got {other:?}"),
    }

    let instance_row = ledger_rs::repos::instance_repo::find_by_address(&pool, &instance).await.unwrap().unwrap();
    let cash = account_repo::find_by_address(&pool, instance_row.id, "cash:main").await.unwrap().unwrap();
    assert_eq!(cash.posted_amount, 50);
    assert_eq!(cash.available, 50);
}

/// Property 4: a transaction with an unbalanced currency (debit != credit)
/// is rejected before any account balance changes.
#[tokio::test]
#[serial]
async fn unbalanced_entries_rejected() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-cash", "cash:main", AccountType::Asset)).await,
    );
    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-rev", "rev:sales", AccountType::Revenue)).await,
    );

    let outcome = common::submit_and_run(
        &pool,
        create_transaction(
            &instance,
            "t1",
            TransactionStatus::Posted,
            vec![("cash:main", EntryType::Debit, 100), ("rev:sales", EntryType::Credit, 90)],
        ),
    )
    .await;

    match outcome {
        WorkerOutcome::Failed { kind, .. } => assert_eq!(kind, ledger_rs::errors::ErrorKind::BalanceInvariant),
        other => panic!("expected Failed(BalanceInvariant), got {other:?}"),
    }

    let instance_row = ledger_rs::repos::instance_repo::find_by_address(&pool, &instance).await.unwrap().unwrap();
    let cash = account_repo::find_by_address(&pool, instance_row.id, "cash:main").await.unwrap().unwrap();
    assert_eq!(cash.posted_amount, 0);
}

/// Property 4, update path: amending a pending transaction's entry amounts
/// must keep each currency's debit/credit balanced, same as at creation —
/// the account set is unchanged so only the per-currency sum check can
/// catch an out-of-balance amendment.
#[tokio::test]
#[serial]
async fn update_transaction_with_unbalanced_amended_entries_is_rejected() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-cash", "cash:main", AccountType::Asset)).await,
    );
    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-rev", "rev:sales", AccountType::Revenue)).await,
    );
    common::expect_processed(
        common::submit_and_run(
            &pool,
            create_transaction(
                &instance,
                "t1",
                TransactionStatus::Pending,
                vec![("cash:main", EntryType::Credit, 30), ("rev:sales", EntryType::Debit, 30)],
            ),
        )
        .await,
    );

    let outcome = common::submit_and_run(
        &pool,
        update_transaction(
            &instance,
            "t1",
            "u1",
            TransactionStatus::Pending,
            Some(vec![("cash:main", EntryType::Credit, 50), ("rev:sales", EntryType::Debit, 20)]),
        ),
    )
    .await;

    match outcome {
        WorkerOutcome::Failed { kind, .. } => assert_eq!(kind, ledger_rs::errors::ErrorKind::BalanceInvariant),
        other => panic!("expected Failed(BalanceInvariant), got {other:?}"),
    }

    let instance_row = ledger_rs::repos::instance_repo::find_by_address(&pool, &instance).await.unwrap().unwrap();
    let cash = account_repo::find_by_address(&pool, instance_row.id, "cash:main").await.unwrap().unwrap();
    let rev = account_repo::find_by_address(&pool, instance_row.id, "rev:sales").await.unwrap().unwrap();
    assert_eq!(cash.pending_amount, -30, "the rejected amendment must not have touched the pending hold");
    assert_eq!(cash.pending_credit, 30);
    assert_eq!(rev.pending_amount, -30);
    assert_eq!(rev.pending_debit, 30);
}

/// Property 5: an account's `BalanceHistoryEntry` trail, replayed in order,
/// lands on its current live balance.
#[tokio::test]
#[serial]
async fn balance_history_replays_to_current_balance() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-cash", "cash:main", AccountType::Asset)).await,
    );
    common::expect_processed(
        common::submit_and_run(&pool, create_account(&instance, "acc-rev", "rev:sales", AccountType::Revenue)).await,
    );
    common::expect_processed(
        common::submit_and_run(
            &pool,
            create_transaction(
                &instance,
                "t1",
                TransactionStatus::Posted,
                vec![("cash:main", EntryType::Debit, 100), ("rev:sales", EntryType::Credit, 100)],
            ),
        )
        .await,
    );
    common::expect_processed(
        common::submit_and_run(
            &pool,
            create_transaction(
                &instance,
                "t2",
                TransactionStatus::Posted,
                vec![("cash:main", EntryType::Debit, 25), ("rev:sales", EntryType::Credit, 25)],
            ),
        )
        .await,
    );

    let instance_row = ledger_rs::repos::instance_repo::find_by_address(&pool, &instance).await.unwrap().unwrap();
    let cash = account_repo::find_by_address(&pool, instance_row.id, "cash:main").await.unwrap().unwrap();

    let history = ledger_rs::repos::balance_history_repo::history_for_account(&pool, cash.id).await.unwrap();
    let latest = history.last().expect("at least one snapshot written");

    assert_eq!(latest.posted_amount, cash.posted_amount);
    assert_eq!(latest.posted_debit, cash.posted_debit);
    assert_eq!(latest.posted_credit, cash.posted_credit);
    assert_eq!(latest.available, cash.available);
}
