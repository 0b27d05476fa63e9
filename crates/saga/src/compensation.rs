//! Reverse-order compensation of completed steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::SagaEvent;
use crate::executor::StepExecutor;
use crate::invoker::CallKind;
use crate::plan::StepResult;

/// Outcome of one compensating action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationOutcome {
    Compensated,
    Failed,
}

/// A single line of a saga's compensation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationEntry {
    pub step_index: usize,
    pub step_name: String,
    pub outcome: CompensationOutcome,
    pub attempts: u32,
    /// Last error when the compensation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl CompensationEntry {
    pub fn is_compensated(&self) -> bool {
        self.outcome == CompensationOutcome::Compensated
    }
}

/// Result of a full compensation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CompensationSummary {
    pub compensated: usize,
    pub skipped: usize,
    /// Names of steps whose compensation exhausted its retries.
    pub failed_steps: Vec<String>,
}

/// Walks the saga's steps backwards and undoes the ones that succeeded.
pub(crate) struct CompensationRunner<'a> {
    executor: &'a StepExecutor<'a>,
}

impl<'a> CompensationRunner<'a> {
    pub fn new(executor: &'a StepExecutor<'a>) -> Self {
        Self { executor }
    }

    /// Compensates steps `from_index` down to 0.
    ///
    /// A failing compensation is recorded and the pass moves on to the
    /// next step.
    pub async fn run(&self, from_index: usize) -> CompensationSummary {
        let entry = self.executor.entry();
        let steps = entry.read(|r| r.steps.clone());
        let mut summary = CompensationSummary::default();

        for index in (0..=from_index.min(steps.len().saturating_sub(1))).rev() {
            let step = &steps[index];
            let succeeded = entry.read(|r| {
                r.results
                    .get(index)
                    .and_then(Option::as_ref)
                    .is_some_and(StepResult::is_success)
            });
            if !succeeded {
                tracing::debug!(step = %step.name, index, "no successful action, skipping compensation");
                summary.skipped += 1;
                continue;
            }

            entry.update(|r| r.current_step_index = index);
            tracing::info!(step = %step.name, index, "compensating step");

            let outcome = self
                .executor
                .invoke_with_retry(index, step, CallKind::Compensation)
                .await;

            let (log_entry, event) = match outcome.result {
                Ok(_) => {
                    summary.compensated += 1;
                    (
                        CompensationEntry {
                            step_index: index,
                            step_name: step.name.clone(),
                            outcome: CompensationOutcome::Compensated,
                            attempts: outcome.attempts,
                            error: None,
                            finished_at: Utc::now(),
                        },
                        SagaEvent::compensation_step_completed(index, &step.name, outcome.attempts),
                    )
                }
                Err(e) => {
                    let error = e.to_string();
                    tracing::warn!(step = %step.name, index, error = %error, "compensation failed");
                    summary.failed_steps.push(step.name.clone());
                    (
                        CompensationEntry {
                            step_index: index,
                            step_name: step.name.clone(),
                            outcome: CompensationOutcome::Failed,
                            attempts: outcome.attempts,
                            error: Some(error.clone()),
                            finished_at: Utc::now(),
                        },
                        SagaEvent::compensation_step_failed(index, &step.name, error),
                    )
                }
            };

            entry.update(|r| {
                r.compensation_log.push(log_entry);
                r.record(event);
            });
        }

        summary
    }
}
