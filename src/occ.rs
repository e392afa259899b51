//! OCC retry driver (C4): runs a pipeline attempt function, detects
//! `STALE_ACCOUNT` raised at the reserved `"transaction"` step, and retries
//! with a **linear** backoff.
//!
//! The backoff here must stay linear even though a caller skimming similar
//! retry code elsewhere might expect exponential —
//! `delay(attempt) = (max_retries - attempt + 1) * retry_interval`. The
//! queue-level scheduled retry in `queue::scheduler` is the one that's
//! exponential; the two must not be conflated.

use std::future::Future;
use std::time::Duration;

use crate::errors::ErrorKind;
use crate::pipeline::TRANSACTION_STEP;

/// A pipeline-step failure, named so the driver can single out
/// `STALE_ACCOUNT` raised at the `"transaction"` step.
#[derive(Debug, Clone)]
pub struct PipelineError {
    pub step: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn stale_account(message: impl Into<String>) -> Self {
        Self { step: TRANSACTION_STEP, kind: ErrorKind::StaleAccount, message: message.into() }
    }

    fn is_stale_account(&self) -> bool {
        self.step == TRANSACTION_STEP && matches!(self.kind, ErrorKind::StaleAccount)
    }
}

#[derive(Debug)]
pub enum OccOutcome<T> {
    Ok(T),
    /// A non-STALE_ACCOUNT failure; the caller classifies and routes it.
    Failed(PipelineError),
    /// Attempts exhausted on repeated `STALE_ACCOUNT`.
    TimedOut { occ_retry_count: u32, errors: Vec<String> },
}

/// Runs `attempt` up to `max_retries` times. `attempt` is called with the
/// 1-based attempt number and should run one full DB transaction, returning
/// `Err(PipelineError::stale_account(..))` if the reserved `"transaction"`
/// step lost its optimistic lock.
///
/// The sleep between attempts never holds a DB connection — it runs after
/// the attempt's transaction has already been rolled back by the caller.
pub async fn process_with_retry<T, F, Fut>(
    max_retries: u32,
    retry_interval_ms: u64,
    mut attempt: F,
) -> OccOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut occ_retry_count = 0u32;
    let mut errors = Vec::new();

    for n in 1..=max_retries {
        match attempt(n).await {
            Ok(value) => return OccOutcome::Ok(value),
            Err(err) if err.is_stale_account() => {
                occ_retry_count += 1;
                let attempts_left = max_retries - n;
                errors.push(format!("OCC conflict on account update, {attempts_left} attempts left"));
                if n == max_retries {
                    return OccOutcome::TimedOut { occ_retry_count, errors };
                }
                let delay_ms = (max_retries - n + 1) as u64 * retry_interval_ms;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(err) => return OccOutcome::Failed(err),
        }
    }
    unreachable!("loop always returns on or before the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// delay(attempt) must be linear: (max_retries - attempt + 1) * retry_interval.
    #[test]
    fn linear_delay_schedule() {
        let max_retries = 5u64;
        let retry_interval = 200u64;
        let delays: Vec<u64> = (1..=max_retries)
            .map(|attempt| (max_retries - attempt + 1) * retry_interval)
            .collect();
        assert_eq!(delays, vec![1000, 800, 600, 400, 200]);
    }

    #[tokio::test]
    async fn retries_on_stale_account_then_succeeds() {
        let calls = AtomicU32::new(0);
        let outcome = process_with_retry(5, 1, |_n| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(PipelineError::stale_account("conflict"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert!(matches!(outcome, OccOutcome::Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_attempts_times_out() {
        let outcome: OccOutcome<()> =
            process_with_retry(3, 1, |_n| async { Err(PipelineError::stale_account("conflict")) }).await;
        match outcome {
            OccOutcome::TimedOut { occ_retry_count, errors } => {
                assert_eq!(occ_retry_count, 3);
                assert_eq!(errors.len(), 3);
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_stale_failure_returns_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: OccOutcome<()> = process_with_retry(5, 1, |_n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError { step: "idempotency", kind: ErrorKind::IdempotencyDuplicate, message: "dup".into() }) }
        })
        .await;
        assert!(matches!(outcome, OccOutcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
