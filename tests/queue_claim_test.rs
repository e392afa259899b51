//! §8 Property 6 / §4.C5-C6: the versioned claim UPDATE is the only path by
//! which a `CommandQueueItem` moves to `processing`, and it is at-most-one —
//! two concurrent claims against the same `processor_version` must not both
//! succeed.

mod common;

use ledger_rs::domain::{AccountType, CreateAccountPayload, EventMap};
use ledger_rs::repos::queue_repo;
use ledger_rs::services::submission::{self, SubmitOutcome};
use serial_test::serial;

fn create_account_event(instance: &str) -> EventMap {
    EventMap::CreateAccount {
        source: "ledger-test".into(),
        source_idempk: "claim-race".into(),
        instance_address: instance.into(),
        payload: CreateAccountPayload {
            address: "cash:main".into(),
            name: "cash:main".into(),
            account_type: AccountType::Asset,
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
async fn only_one_concurrent_claim_succeeds() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    let queue_item_id = match submission::submit(&pool, create_account_event(&instance)).await.unwrap() {
        SubmitOutcome::Queued { queue_item_id, .. } => queue_item_id,
        SubmitOutcome::Duplicate { .. } => panic!("unexpected duplicate"),
    };

    let item = queue_repo::find_by_id(&pool, queue_item_id).await.unwrap().unwrap();
    assert_eq!(item.processor_version, 0);

    let mut handles = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            queue_repo::claim(&pool, queue_item_id, &format!("worker-{i}"), 0).await.unwrap()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.expect("task panicked") {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "exactly one of N concurrent claims against the same version must succeed");

    let after = queue_repo::find_by_id(&pool, queue_item_id).await.unwrap().unwrap();
    assert_eq!(after.status, ledger_rs::domain::QueueItemStatus::Processing);
    assert_eq!(after.processor_version, 1);
    assert_eq!(after.retry_count, 1);
}

/// A second claim attempt at the stale (pre-claim) version must fail even
/// after the first succeeds, by construction of the `WHERE processor_version
/// = $expected` predicate — covered incidentally above, exercised again here
/// sequentially for clarity.
#[tokio::test]
#[serial]
async fn claim_at_stale_version_fails_after_first_claim() {
    let pool = common::get_test_pool().await;
    common::reset_db(&pool).await;
    let instance = common::make_instance(&pool).await;

    let queue_item_id = match submission::submit(&pool, create_account_event(&instance)).await.unwrap() {
        SubmitOutcome::Queued { queue_item_id, .. } => queue_item_id,
        SubmitOutcome::Duplicate { .. } => panic!("unexpected duplicate"),
    };

    assert!(queue_repo::claim(&pool, queue_item_id, "worker-a", 0).await.unwrap());
    assert!(!queue_repo::claim(&pool, queue_item_id, "worker-b", 0).await.unwrap());
    assert!(queue_repo::claim(&pool, queue_item_id, "worker-b", 1).await.unwrap());
}
