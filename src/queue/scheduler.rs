//! The queue scheduler (C6): a polling loop that selects due items, claims
//! them one at a time under the versioned at-most-one protocol, dispatches
//! each claim to its C7 worker with bounded concurrency, and periodically
//! sweeps items stuck in `processing` back to `pending`.
//!
//! Grounded in `gl-rs/src/main.rs`'s pattern of spawning one background task
//! per concern, and in `event-bus::consumer_retry`'s retry-loop idiom
//! (generalized here from "retry a closure" to "poll a table and dispatch").

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashSet;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{Command, CommandAction, QueueItemStatus};
use crate::errors::ErrorKind;
use crate::queue::backoff;
use crate::repos::{command_repo, queue_repo};
use crate::workers::{self, WorkerOutcome};

/// Runs a stuck-item sweep once every this many poll ticks, rather than
/// every tick — it's a full-table scan and doesn't need poll_interval
/// granularity.
const STUCK_SWEEP_EVERY_N_TICKS: u64 = 12;

pub struct Scheduler {
    pool: PgPool,
    config: Config,
    processor_id: String,
    /// Queue item ids this process is actively working. The stuck-item sweep
    /// (§5, §9 Open Question #3) only reverts `processing` items *absent*
    /// from this set — items this process still holds are not stuck, they're
    /// just slow. A crash loses the set, which is exactly when recovery is
    /// needed: on restart nothing is "active" yet, so every row left in
    /// `processing` by the dead process becomes eligible once it ages past
    /// `stuck_threshold_secs`.
    active: Arc<DashSet<Uuid>>,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let processor_id = format!("{}-{}", config.processor_name, Uuid::new_v4());
        let worker_concurrency = config.worker_concurrency;
        Scheduler {
            pool,
            config,
            processor_id,
            active: Arc::new(DashSet::new()),
            semaphore: Arc::new(Semaphore::new(worker_concurrency)),
        }
    }

    /// Runs forever. Intended to be `tokio::spawn`ed once from `main`.
    pub async fn run(self: Arc<Self>) {
        let mut ticks: u64 = 0;
        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "scheduler poll failed");
            }
            ticks = ticks.wrapping_add(1);
            if ticks % STUCK_SWEEP_EVERY_N_TICKS == 0 {
                if let Err(e) = self.sweep_stuck().await {
                    tracing::error!(error = %e, "stuck-item sweep failed");
                }
            }
            tokio::time::sleep(StdDuration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    /// One poll: selects items due for (re)dispatch and claims as many as
    /// the worker pool has free capacity for. If the pool is saturated, the
    /// scheduler simply claims nothing this tick — already-claimed items
    /// keep their claim until they finish (§9 backpressure).
    async fn tick(&self) -> Result<(), sqlx::Error> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            return Ok(());
        }

        let due = queue_repo::select_due(&self.pool, available as i64).await?;
        for id in due {
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = self.clone_shared();
            self.active.insert(id);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = this.claim_and_dispatch(id).await {
                    tracing::error!(queue_item_id = %id, error = %e, "dispatch failed");
                }
                this.active.remove(&id);
            });
        }
        Ok(())
    }

    fn clone_shared(&self) -> SharedScheduler {
        SharedScheduler {
            pool: self.pool.clone(),
            config: self.config.clone(),
            processor_id: self.processor_id.clone(),
            active: self.active.clone(),
        }
    }

    async fn sweep_stuck(&self) -> Result<(), sqlx::Error> {
        let processing = queue_repo::select_processing(&self.pool).await?;
        let now = Utc::now();
        let threshold = self.config.stuck_threshold_secs as i64;

        let stuck: Vec<Uuid> = processing
            .into_iter()
            .filter(|item| !self.active.contains(&item.id))
            .filter(|item| {
                item.processing_started_at
                    .map(|started| now.signed_duration_since(started).num_seconds() >= threshold)
                    .unwrap_or(false)
            })
            .map(|item| item.id)
            .collect();

        if !stuck.is_empty() {
            let reverted = queue_repo::force_revert_to_pending(&self.pool, &stuck).await?;
            tracing::warn!(count = reverted, "reverted stuck processing items to pending");
        }
        Ok(())
    }
}

/// The handle a spawned dispatch task needs. A plain struct rather than
/// `Arc<Scheduler>` itself because `Scheduler::run`'s `Semaphore` permit is
/// already held by the spawned task via `_permit`; cloning the whole
/// scheduler would duplicate the semaphore.
#[derive(Clone)]
struct SharedScheduler {
    pool: PgPool,
    config: Config,
    processor_id: String,
    active: Arc<DashSet<Uuid>>,
}

impl SharedScheduler {
    async fn claim_and_dispatch(&self, id: Uuid) -> Result<(), sqlx::Error> {
        let item = match queue_repo::find_by_id(&self.pool, id).await? {
            Some(item) => item,
            None => return Ok(()),
        };

        let claimed = queue_repo::claim(&self.pool, id, &self.processor_id, item.processor_version).await?;
        if !claimed {
            // Another worker claimed it first between select_due and now.
            return Ok(());
        }
        let retry_count_after_claim = item.retry_count + 1;

        let command = match command_repo::find_by_id(&self.pool, item.command_id).await? {
            Some(command) => command,
            None => {
                tracing::error!(queue_item_id = %id, "claimed item has no command row");
                return Ok(());
            }
        };

        let outcome = self.dispatch(Arc::new(command)).await;
        self.route_outcome(id, retry_count_after_claim, outcome).await
    }

    async fn dispatch(&self, command: Arc<Command>) -> WorkerOutcome {
        let max_retries = self.config.max_retries;
        let retry_interval_ms = self.config.retry_interval_ms;
        let dependency_retry_delay = ChronoDuration::milliseconds(retry_interval_ms as i64);

        match command.event_map.action() {
            CommandAction::CreateAccount => {
                workers::create_account::run(&self.pool, command, max_retries, retry_interval_ms).await
            }
            CommandAction::CreateTransaction => {
                workers::create_transaction::run(&self.pool, command, max_retries, retry_interval_ms).await
            }
            CommandAction::UpdateAccount => {
                workers::update_account::run(
                    &self.pool,
                    command,
                    max_retries,
                    retry_interval_ms,
                    dependency_retry_delay,
                )
                .await
            }
            CommandAction::UpdateTransaction => {
                workers::update_transaction::run(
                    &self.pool,
                    command,
                    max_retries,
                    retry_interval_ms,
                    dependency_retry_delay,
                )
                .await
            }
        }
    }

    /// Routes a worker's terminal outcome onto the queue item's next status
    /// per §4.C5-C6's retry scheduling policy. `retry_count_after_claim` is
    /// this item's attempt count including the claim that just ran, used to
    /// decide whether a retryable failure still has attempts left or must
    /// move straight to `dead_letter`.
    async fn route_outcome(
        &self,
        id: Uuid,
        retry_count_after_claim: i32,
        outcome: WorkerOutcome,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let exhausted = retry_count_after_claim >= self.config.max_retries as i32;

        match outcome {
            WorkerOutcome::Processed(_) => queue_repo::mark_processed(&self.pool, id).await,

            WorkerOutcome::Failed { kind, message } => {
                if !kind.is_retryable() || exhausted {
                    queue_repo::record_outcome(&self.pool, id, QueueItemStatus::DeadLetter, None, &message, 0).await
                } else {
                    let delay = backoff::next_retry_delay(
                        self.config.base_retry_delay_secs,
                        self.config.max_retry_delay_secs,
                        retry_count_after_claim,
                    );
                    queue_repo::record_outcome(
                        &self.pool,
                        id,
                        QueueItemStatus::Failed,
                        Some(now + delay),
                        &message,
                        0,
                    )
                    .await
                }
            }

            WorkerOutcome::OccTimedOut { occ_retry_count, errors } => {
                let message = errors.first().cloned().unwrap_or_else(|| "OCC retries exhausted".to_string());
                if exhausted {
                    queue_repo::record_outcome(
                        &self.pool,
                        id,
                        QueueItemStatus::DeadLetter,
                        None,
                        &message,
                        occ_retry_count as i32,
                    )
                    .await
                } else {
                    let next = now
                        + ChronoDuration::milliseconds(
                            self.config.max_retries as i64 * self.config.retry_interval_ms as i64,
                        );
                    queue_repo::record_outcome(
                        &self.pool,
                        id,
                        QueueItemStatus::OccTimeout,
                        Some(next),
                        &message,
                        occ_retry_count as i32,
                    )
                    .await
                }
            }

            WorkerOutcome::RevertToPending { retry_after } => {
                queue_repo::record_outcome(
                    &self.pool,
                    id,
                    QueueItemStatus::Pending,
                    Some(retry_after),
                    "dependency not yet processed; rescheduled",
                    0,
                )
                .await
            }

            WorkerOutcome::DeadLetter { reason } => {
                queue_repo::record_outcome(&self.pool, id, QueueItemStatus::DeadLetter, None, &reason, 0).await
            }
        }
    }
}

/// Whether an error kind should ever be retried — re-exported here only to
/// keep `ErrorKind` imported for doc links; the real logic lives on
/// `ErrorKind::is_retryable`.
#[allow(dead_code)]
fn _assert_error_kind_linked(_: ErrorKind) {}
