use std::future::Future;
use std::pin::Pin;

use crate::error::{Result, SagaError, StepError};

type CompensationFuture = Pin<Box<dyn Future<Output = std::result::Result<(), StepError>> + Send>>;
type Compensation = Box<dyn FnOnce() -> CompensationFuture + Send>;

struct CompletedStep {
    name: String,
    compensate: Compensation,
}

/// Orchestrates an ordered multi-step operation with compensation on failure.
///
/// Each call to [`step`](Saga::step) runs an execute closure; on success the
/// step's result is cloned into its compensation closure and returned to the
/// caller, so the next step can use it. On the first failure, compensations
/// for the already-completed steps run in strict reverse order and the
/// original error is surfaced.
///
/// The saga is ephemeral: it holds state only for one run, and its
/// completed-steps list is cleared unconditionally after any compensation
/// pass.
pub struct Saga {
    saga_id: String,
    completed: Vec<CompletedStep>,
}

impl Saga {
    /// Creates a saga with a caller-supplied identifier (used in logs).
    pub fn new(saga_id: impl Into<String>) -> Self {
        Self {
            saga_id: saga_id.into(),
            completed: Vec::new(),
        }
    }

    /// Returns the saga identifier.
    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    /// Names of the completed steps, in completion order.
    pub fn completed_steps(&self) -> Vec<&str> {
        self.completed.iter().map(|s| s.name.as_str()).collect()
    }

    /// Runs one step.
    ///
    /// On success, records `compensate` (capturing a clone of the result) for
    /// a potential later rollback and returns the result. On failure, rolls
    /// back the already-completed steps — not the failing one — and returns
    /// [`SagaError::StepFailed`] carrying the execute closure's original
    /// error. Compensation errors never mask it.
    pub async fn step<T, F, Fut, C, CFut>(&mut self, name: &str, execute: F, compensate: C) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, StepError>>,
        C: FnOnce(T) -> CFut + Send + 'static,
        CFut: Future<Output = std::result::Result<(), StepError>> + Send + 'static,
    {
        tracing::debug!(saga_id = %self.saga_id, step = name, "executing saga step");

        match execute().await {
            Ok(result) => {
                let captured = result.clone();
                self.completed.push(CompletedStep {
                    name: name.to_string(),
                    compensate: Box::new(move || Box::pin(compensate(captured))),
                });
                metrics::counter!("saga_steps_completed_total").increment(1);
                Ok(result)
            }
            Err(source) => {
                tracing::warn!(
                    saga_id = %self.saga_id,
                    step = name,
                    error = %source,
                    "saga step failed, compensating completed steps"
                );
                metrics::counter!("saga_steps_failed_total").increment(1);

                self.compensate().await;

                Err(SagaError::StepFailed {
                    step: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Runs the recorded compensations in strict reverse of completion order.
    ///
    /// Compensation is best-effort: a failing compensation is logged and the
    /// remaining ones still run. The completed-steps list is cleared
    /// unconditionally, success or not.
    #[tracing::instrument(skip(self), fields(saga_id = %self.saga_id))]
    pub async fn compensate(&mut self) {
        let steps: Vec<CompletedStep> = self.completed.drain(..).collect();
        if steps.is_empty() {
            return;
        }

        metrics::counter!("saga_compensations_total").increment(1);

        for step in steps.into_iter().rev() {
            tracing::info!(step = %step.name, "compensating saga step");
            if let Err(e) = (step.compensate)().await {
                tracing::error!(
                    step = %step.name,
                    error = %e,
                    "compensation failed, continuing with remaining steps"
                );
                metrics::counter!("saga_compensation_failures_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop_compensation(_: ()) -> std::result::Result<(), StepError> {
        Ok(())
    }

    #[tokio::test]
    async fn step_returns_result_to_caller() {
        let mut saga = Saga::new("saga-1");

        let reservation = saga
            .step(
                "reserve_bin",
                || async { Ok::<_, StepError>("RES-42".to_string()) },
                |_res| async { Ok(()) },
            )
            .await
            .unwrap();

        assert_eq!(reservation, "RES-42");
        assert_eq!(saga.completed_steps(), vec!["reserve_bin"]);
    }

    #[tokio::test]
    async fn later_step_can_use_earlier_result() {
        let mut saga = Saga::new("saga-2");

        let first = saga
            .step(
                "a",
                || async { Ok::<_, StepError>(21_u32) },
                |_| async { Ok(()) },
            )
            .await
            .unwrap();

        let second = saga
            .step(
                "b",
                move || async move { Ok::<_, StepError>(first * 2) },
                |_| async { Ok(()) },
            )
            .await
            .unwrap();

        assert_eq!(second, 42);
        assert_eq!(saga.completed_steps(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failed_step_surfaces_its_own_error() {
        let mut saga = Saga::new("saga-3");

        saga.step("a", || async { Ok::<_, StepError>(()) }, noop_compensation)
            .await
            .unwrap();

        let err = saga
            .step(
                "b",
                || async { Err::<(), StepError>("b exploded".into()) },
                noop_compensation,
            )
            .await
            .unwrap_err();

        assert_eq!(err.step(), "b");
        assert!(err.to_string().contains("b exploded"));
    }

    #[tokio::test]
    async fn completed_list_cleared_after_compensation() {
        let mut saga = Saga::new("saga-4");

        saga.step("a", || async { Ok::<_, StepError>(()) }, noop_compensation)
            .await
            .unwrap();
        assert_eq!(saga.completed_steps().len(), 1);

        saga.compensate().await;
        assert!(saga.completed_steps().is_empty());

        // A second pass has nothing to do.
        saga.compensate().await;
        assert!(saga.completed_steps().is_empty());
    }
}
