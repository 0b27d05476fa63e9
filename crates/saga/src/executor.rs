//! Step execution with per-attempt timeouts and retry backoff.

use common::{Clock, SagaId, run_with_timeout};
use serde_json::Value;

use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::invoker::{CallKind, StepCall, StepInvoker};
use crate::plan::{StepDefinition, StepResult};
use crate::registry::{InFlightStep, SagaEntry};

/// Result of running one operation through its retry policy.
#[derive(Debug)]
pub(crate) struct StepOutcome {
    /// Attempts made, including the final one.
    pub attempts: u32,
    pub result: Result<Value, SagaError>,
}

/// How the forward phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ForwardOutcome {
    Completed,
    Failed { index: usize, error: SagaError },
}

/// Runs the steps of one saga against a [`StepInvoker`].
pub(crate) struct StepExecutor<'a> {
    saga_id: SagaId,
    entry: &'a SagaEntry,
    invoker: &'a dyn StepInvoker,
    clock: &'a dyn Clock,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        saga_id: SagaId,
        entry: &'a SagaEntry,
        invoker: &'a dyn StepInvoker,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            saga_id,
            entry,
            invoker,
            clock,
        }
    }

    pub fn entry(&self) -> &'a SagaEntry {
        self.entry
    }

    /// Runs every forward action in order, stopping at the first step that
    /// exhausts its retries.
    pub async fn run_forward(&self) -> ForwardOutcome {
        let steps = self.entry.read(|r| r.steps.clone());

        for (index, step) in steps.iter().enumerate() {
            self.entry.update(|r| r.current_step_index = index);
            tracing::info!(step = %step.name, index, service = %step.service, "saga step started");

            let outcome = self.invoke_with_retry(index, step, CallKind::Action).await;
            match outcome.result {
                Ok(response) => {
                    self.entry.update(|r| {
                        r.results[index] = Some(StepResult::Succeeded {
                            response,
                            attempts: outcome.attempts,
                        });
                        r.record(SagaEvent::step_completed(index, &step.name, outcome.attempts));
                    });
                }
                Err(error) => {
                    let reason = error.to_string();
                    tracing::warn!(step = %step.name, index, error = %reason, "saga step failed");
                    self.entry.update(|r| {
                        r.results[index] = Some(StepResult::Failed {
                            error: reason.clone(),
                            attempts: outcome.attempts,
                        });
                        r.failed_step_index = Some(index);
                        r.failure_reason = Some(reason.clone());
                        r.record(SagaEvent::step_failed(index, &step.name, reason));
                    });
                    return ForwardOutcome::Failed { index, error };
                }
            }
        }

        ForwardOutcome::Completed
    }

    /// Invokes the step's action or compensation until it succeeds or the
    /// retry policy gives up.
    ///
    /// Every attempt is bounded by the step timeout. The in-flight marker is
    /// cleared before a failure is reported.
    pub async fn invoke_with_retry(
        &self,
        index: usize,
        step: &StepDefinition,
        kind: CallKind,
    ) -> StepOutcome {
        let operation = match kind {
            CallKind::Action => &step.action,
            CallKind::Compensation => &step.compensation,
        };
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.entry.update(|r| {
                r.in_flight = Some(InFlightStep {
                    step_index: index,
                    kind,
                    attempt,
                });
                r.record(SagaEvent::step_started(index, &step.name, kind, attempt));
            });
            metrics::counter!("saga_step_attempts_total", "kind" => kind.as_str()).increment(1);

            let call = StepCall {
                saga_id: self.saga_id,
                step_index: index,
                step_name: step.name.clone(),
                service: step.service.clone(),
                operation: operation.clone(),
                kind,
                payload: step.payload.clone(),
                attempt,
            };
            let result = match run_with_timeout(self.clock, step.timeout, self.invoker.invoke(call)).await {
                Ok(result) => result,
                Err(elapsed) => Err(SagaError::StepTimeout {
                    step: step.name.clone(),
                    timeout: elapsed.timeout,
                }),
            };
            self.entry.update(|r| r.in_flight = None);

            let error = match result {
                Ok(response) => {
                    return StepOutcome {
                        attempts: attempt,
                        result: Ok(response),
                    };
                }
                Err(error) => error,
            };

            let message = error.to_string();
            tracing::debug!(step = %step.name, %kind, attempt, error = %message, "attempt failed");
            self.entry.update(|r| {
                r.record(SagaEvent::attempt_failed(index, &step.name, kind, attempt, &message));
            });

            if !step.retry_policy.allows_retry(attempt) {
                let error = match kind {
                    CallKind::Action => SagaError::StepFailedExhaustedRetries {
                        step: step.name.clone(),
                        attempts: attempt,
                        last_error: message,
                    },
                    CallKind::Compensation => SagaError::CompensationFailed {
                        step: step.name.clone(),
                        attempts: attempt,
                        last_error: message,
                    },
                };
                return StepOutcome {
                    attempts: attempt,
                    result: Err(error),
                };
            }

            let delay = step.retry_policy.delay_for(attempt);
            if !delay.is_zero() {
                self.clock.sleep(delay).await;
            }
        }
    }
}
