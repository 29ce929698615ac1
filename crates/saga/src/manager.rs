//! Runs saga definitions and unwinds them on failure.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::ExecutionId;
use event_bus::{EventBus, kinds};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::definition::SagaDefinition;
use crate::error::{CompensationError, SagaFailure, StepError};
use crate::events::SagaEvent;
use crate::state::SagaState;
use crate::step::{ErasedStep, Value, downcast};

/// Number of finished executions kept for introspection.
pub const DEFAULT_EXECUTION_HISTORY: usize = 50;

/// How many times a failing compensation is attempted.
///
/// The default is a single attempt: one compensation failure is final and
/// the execution ends in `CompensationFailed`. Step `execute` actions are
/// never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Record of one saga run.
#[derive(Debug, Clone, Serialize)]
pub struct SagaExecution {
    pub execution_id: ExecutionId,
    pub saga_name: String,
    pub state: SagaState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    pub journal: Vec<SagaEvent>,
}

impl SagaExecution {
    fn new(saga_name: &str) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            saga_name: saga_name.to_string(),
            state: SagaState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            failed_step: None,
            journal: Vec::new(),
        }
    }

    fn record(&mut self, event: SagaEvent) {
        self.journal.push(event);
    }

    fn transition(&mut self, next: SagaState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal saga transition {} -> {next}",
            self.state
        );
        tracing::debug!(from = %self.state, to = %next, "saga state changed");
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }
}

#[derive(Serialize)]
struct SagaCompletedPayload<'a> {
    saga_name: &'a str,
    execution_id: ExecutionId,
    steps: Vec<&'a str>,
}

#[derive(Serialize)]
struct CompensationErrorPayload<'a> {
    step: &'a str,
    attempts: u32,
    error: String,
}

#[derive(Serialize)]
struct SagaFailedPayload<'a> {
    saga_name: &'a str,
    compensated: bool,
    execution_id: ExecutionId,
    failed_step: &'a str,
    error: String,
    compensation_errors: Vec<CompensationErrorPayload<'a>>,
}

/// Executes sagas for one service.
///
/// Steps of one execution run sequentially on the caller's task. Separate
/// executions share nothing but the bus and the execution history, so any
/// number may run concurrently.
#[derive(Clone)]
pub struct SagaManager {
    bus: EventBus,
    retry: RetryPolicy,
    history_capacity: usize,
    executions: Arc<Mutex<VecDeque<SagaExecution>>>,
}

impl SagaManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            retry: RetryPolicy::default(),
            history_capacity: DEFAULT_EXECUTION_HISTORY,
            executions: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Sets the compensation retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs `definition` with `input`.
    ///
    /// On success returns the last step's output. On a step failure, the
    /// steps that already succeeded are compensated in reverse order and
    /// the original step error is returned inside a [`SagaFailure`].
    #[tracing::instrument(
        skip(self, definition, input),
        fields(saga = definition.name(), execution_id = tracing::field::Empty)
    )]
    pub async fn run<I, O>(
        &self,
        definition: &SagaDefinition<I, O>,
        input: I,
    ) -> Result<O, SagaFailure>
    where
        I: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
    {
        metrics::counter!("saga_executions_total").increment(1);
        let timer = Instant::now();

        let mut execution = SagaExecution::new(definition.name());
        tracing::Span::current().record(
            "execution_id",
            tracing::field::display(execution.execution_id),
        );
        execution.record(SagaEvent::saga_started(
            execution.execution_id,
            definition.name(),
        ));
        execution.transition(SagaState::Running);
        tracing::info!(steps = definition.len(), "saga started");

        let mut current: Value = Arc::new(input);
        let mut completed: Vec<Completed<'_>> = Vec::with_capacity(definition.len());

        for step in definition.steps() {
            execution.record(SagaEvent::step_started(step.name()));
            tracing::info!(step = step.name(), "saga step started");

            match run_step(step, Arc::clone(&current)).await {
                Ok(output) => {
                    execution.record(SagaEvent::step_completed(step.name()));
                    tracing::info!(step = step.name(), "saga step completed");
                    completed.push(Completed {
                        step,
                        input: current,
                        output: Arc::clone(&output),
                    });
                    current = output;
                }
                Err(error) => {
                    let failure = self
                        .fail(execution, step.name(), error, completed, timer)
                        .await;
                    return Err(failure);
                }
            }
        }

        let output = match downcast::<O>(&current, definition.name()) {
            Ok(output) => output,
            Err(error) => {
                let last = definition
                    .step_names()
                    .last()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| definition.name().to_string());
                let failure = self.fail(execution, &last, error, completed, timer).await;
                return Err(failure);
            }
        };

        execution.record(SagaEvent::saga_completed());
        execution.transition(SagaState::Completed);

        let duration = timer.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(duration, "saga completed");

        let payload = SagaCompletedPayload {
            saga_name: definition.name(),
            execution_id: execution.execution_id,
            steps: definition.step_names(),
        };
        self.publish(kinds::SAGA_COMPLETED, &payload, execution.execution_id)
            .await;
        self.remember(execution).await;

        Ok(output)
    }

    /// Finished executions, oldest first.
    pub async fn recent_executions(&self) -> Vec<SagaExecution> {
        self.executions.lock().await.iter().cloned().collect()
    }

    pub async fn execution(&self, execution_id: ExecutionId) -> Option<SagaExecution> {
        self.executions
            .lock()
            .await
            .iter()
            .find(|e| e.execution_id == execution_id)
            .cloned()
    }

    async fn fail(
        &self,
        mut execution: SagaExecution,
        failed_step: &str,
        error: StepError,
        completed: Vec<Completed<'_>>,
        timer: Instant,
    ) -> SagaFailure {
        tracing::warn!(step = failed_step, error = %error, "saga step failed");
        execution.record(SagaEvent::step_failed(failed_step, error.to_string()));
        execution.failed_step = Some(failed_step.to_string());

        execution.record(SagaEvent::compensation_started(failed_step));
        execution.transition(SagaState::Compensating);

        let compensation_errors = self.compensate(&mut execution, completed).await;
        let compensated = compensation_errors.is_empty();

        execution.record(SagaEvent::saga_failed(failed_step, compensated));
        execution.transition(if compensated {
            SagaState::Compensated
        } else {
            SagaState::CompensationFailed
        });

        metrics::histogram!("saga_duration_seconds").record(timer.elapsed().as_secs_f64());
        metrics::counter!("saga_failed").increment(1);
        if compensated {
            tracing::warn!(step = failed_step, "saga failed, compensation complete");
        } else {
            tracing::error!(
                step = failed_step,
                failures = compensation_errors.len(),
                "saga failed and compensation failed, manual reconciliation required"
            );
        }

        let payload = SagaFailedPayload {
            saga_name: &execution.saga_name,
            compensated,
            execution_id: execution.execution_id,
            failed_step,
            error: error.to_string(),
            compensation_errors: compensation_errors
                .iter()
                .map(|e| CompensationErrorPayload {
                    step: &e.step,
                    attempts: e.attempts,
                    error: e.error.to_string(),
                })
                .collect(),
        };
        self.publish(kinds::SAGA_FAILED, &payload, execution.execution_id)
            .await;

        let failure = SagaFailure {
            saga_name: execution.saga_name.clone(),
            execution_id: execution.execution_id,
            failed_step: failed_step.to_string(),
            error,
            state: execution.state,
            compensation_errors,
        };
        self.remember(execution).await;
        failure
    }

    /// Undoes `completed` in reverse order. A failing compensation never
    /// stops the ones before it from running.
    async fn compensate(
        &self,
        execution: &mut SagaExecution,
        completed: Vec<Completed<'_>>,
    ) -> Vec<CompensationError> {
        let mut errors = Vec::new();

        for done in completed.into_iter().rev() {
            let name = done.step.name();
            let mut attempt = 0;

            loop {
                attempt += 1;
                let Some(compensation) = done
                    .step
                    .compensation(Arc::clone(&done.input), Arc::clone(&done.output))
                else {
                    execution.record(SagaEvent::compensation_step_skipped(name));
                    tracing::debug!(step = name, "no compensation defined, skipped");
                    break;
                };

                match catch_panic(compensation, name).await {
                    Ok(()) => {
                        execution.record(SagaEvent::compensation_step_completed(name));
                        tracing::info!(step = name, attempt, "compensation completed");
                        break;
                    }
                    Err(error) => {
                        execution.record(SagaEvent::compensation_step_failed(
                            name,
                            attempt,
                            error.to_string(),
                        ));
                        if attempt < self.retry.max_attempts {
                            tracing::warn!(step = name, attempt, error = %error, "compensation failed, retrying");
                            tokio::time::sleep(self.retry.backoff).await;
                            continue;
                        }

                        metrics::counter!("saga_compensation_failures").increment(1);
                        tracing::error!(step = name, attempt, error = %error, "compensation failed");
                        errors.push(CompensationError {
                            step: name.to_string(),
                            attempts: attempt,
                            error,
                        });
                        break;
                    }
                }
            }
        }

        errors
    }

    async fn remember(&self, execution: SagaExecution) {
        if self.history_capacity == 0 {
            return;
        }
        let mut executions = self.executions.lock().await;
        while executions.len() >= self.history_capacity {
            executions.pop_front();
        }
        executions.push_back(execution);
    }

    async fn publish<T: Serialize>(&self, event_type: &str, data: &T, execution_id: ExecutionId) {
        if let Err(err) = self
            .bus
            .emit_with_correlation(event_type, data, &execution_id.to_string())
            .await
        {
            tracing::warn!(event_type, error = %err, "failed to emit saga event");
        }
    }
}

/// A step that succeeded, with the values needed to compensate it.
struct Completed<'a> {
    step: &'a ErasedStep,
    input: Value,
    output: Value,
}

async fn run_step(step: &ErasedStep, input: Value) -> Result<Value, StepError> {
    catch_panic(step.execute(input), step.name()).await
}

/// Turns a panic inside a step action into a step error.
async fn catch_panic<T: 'static>(
    future: futures_util::future::BoxFuture<'static, Result<T, StepError>>,
    step: &str,
) -> Result<T, StepError> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(StepError::new(format!("step '{step}' panicked: {message}")))
        }
    }
}
