//! Named-step pipeline composition (§9): a builder that accumulates steps,
//! each a closure over the prior steps' results, and a runner that executes
//! them in order inside one DB transaction. Names appear in both success and
//! failure results so the OCC driver can single out the `"transaction"` step.
//!
//! The normative step names for a worker pipeline are
//! `occable_item`, `idempotency`, `transaction_map`, `transaction`, and
//! either `event_success` or `event_failure`.

use std::future::Future;
use std::pin::Pin;

use sqlx::{Postgres, Transaction};

use crate::errors::ErrorKind;

pub type StepError = (ErrorKind, String);
pub type TxResult<'a, T> = Pin<Box<dyn Future<Output = Result<T, StepError>> + Send + 'a>>;

/// One named step. `Results` is the accumulator type threaded through the
/// whole pipeline (typically a struct with `Option<T>` fields filled in as
/// prior steps run).
pub struct Step<Results> {
    pub name: &'static str,
    #[allow(clippy::type_complexity)]
    run: Box<
        dyn for<'a> Fn(&'a mut Transaction<'_, Postgres>, &'a mut Results) -> TxResult<'a, ()> + Send,
    >,
}

pub struct Pipeline<Results> {
    steps: Vec<Step<Results>>,
}

/// The step at which `STALE_ACCOUNT` is ever surfaced.
pub const TRANSACTION_STEP: &str = "transaction";

impl<Results> Pipeline<Results> {
    pub fn builder() -> PipelineBuilder<Results> {
        PipelineBuilder { steps: Vec::new() }
    }

    /// Runs every step in order inside `tx`. Stops and returns `(step_name,
    /// kind, message)` on the first failure.
    pub async fn run(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        results: &mut Results,
    ) -> Result<(), (&'static str, ErrorKind, String)> {
        for step in &self.steps {
            (step.run)(tx, results).await.map_err(|(kind, msg)| (step.name, kind, msg))?;
        }
        Ok(())
    }
}

pub struct PipelineBuilder<Results> {
    steps: Vec<Step<Results>>,
}

impl<Results> PipelineBuilder<Results> {
    pub fn step<F>(mut self, name: &'static str, run: F) -> Self
    where
        F: for<'a> Fn(&'a mut Transaction<'_, Postgres>, &'a mut Results) -> TxResult<'a, ()>
            + Send
            + 'static,
    {
        self.steps.push(Step { name, run: Box::new(run) });
        self
    }

    pub fn build(self) -> Pipeline<Results> {
        Pipeline { steps: self.steps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Acc {
        seen: Vec<&'static str>,
    }

    #[test]
    fn records_step_names_in_order() {
        // Pipeline execution itself needs a live DB transaction, so this
        // only exercises the builder's bookkeeping, not `.run()`.
        let pipeline = Pipeline::<Acc>::builder()
            .step("occable_item", |_tx, _r| Box::pin(async { Ok(()) }))
            .step("idempotency", |_tx, _r| Box::pin(async { Ok(()) }))
            .step(TRANSACTION_STEP, |_tx, _r| Box::pin(async { Ok(()) }))
            .build();
        let names: Vec<&str> = pipeline.steps.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["occable_item", "idempotency", "transaction"]);
    }
}
