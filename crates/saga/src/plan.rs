//! Saga plans: the immutable list of steps a saga executes.

use std::time::Duration;

use common::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SagaError};

/// Timeout applied to a step when the caller does not choose one.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest step timeout accepted unless the orchestrator is configured otherwise.
pub const MAX_STEP_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// One step of a saga: a forward action and the action that undoes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Human-readable step name.
    pub name: String,
    /// Target service, passed through to the step invoker.
    pub service: String,
    /// Forward action name.
    pub action: String,
    /// Compensating action name.
    pub compensation: String,
    /// Limit on a single invocation of either action.
    pub timeout: Duration,
    /// Attempts and backoff for both the action and its compensation.
    pub retry_policy: RetryPolicy,
    /// Opaque data handed to the invoker unchanged.
    pub payload: Value,
}

impl StepDefinition {
    /// Creates a step with the default timeout, a single attempt and no payload.
    pub fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        action: impl Into<String>,
        compensation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            action: action.into(),
            compensation: compensation.into(),
            timeout: DEFAULT_STEP_TIMEOUT,
            retry_policy: RetryPolicy::none(),
            payload: Value::Null,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    fn validate(&self, index: usize, max_timeout: Duration) -> Result<()> {
        if self.action.trim().is_empty() {
            return Err(SagaError::InvalidSagaPlan(format!(
                "step {index} ('{}') has no action",
                self.name
            )));
        }
        if self.compensation.trim().is_empty() {
            return Err(SagaError::InvalidSagaPlan(format!(
                "step {index} ('{}') has no compensation",
                self.name
            )));
        }
        if self.timeout.is_zero() {
            return Err(SagaError::InvalidSagaPlan(format!(
                "step {index} ('{}') has a zero timeout",
                self.name
            )));
        }
        if self.timeout > max_timeout {
            return Err(SagaError::InvalidSagaPlan(format!(
                "step {index} ('{}') timeout {:?} exceeds the limit of {max_timeout:?}",
                self.name, self.timeout
            )));
        }
        Ok(())
    }
}

/// Request to start a new saga.
#[derive(Debug, Clone, PartialEq)]
pub struct StartSaga {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    /// Opaque caller data kept with the saga.
    pub metadata: Value,
}

impl StartSaga {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Checks that the plan has at least one step and every step is runnable.
    pub fn validate(&self) -> Result<()> {
        self.validate_within(MAX_STEP_TIMEOUT)
    }

    /// Like [`validate`](Self::validate), with a custom step timeout ceiling.
    pub fn validate_within(&self, max_step_timeout: Duration) -> Result<()> {
        if self.steps.is_empty() {
            return Err(SagaError::InvalidSagaPlan(
                "saga must have at least one step".to_string(),
            ));
        }
        self.steps
            .iter()
            .enumerate()
            .try_for_each(|(index, step)| step.validate(index, max_step_timeout))
    }
}

/// Outcome of a step's forward action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepResult {
    Succeeded { response: Value, attempts: u32 },
    Failed { error: String, attempts: u32 },
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Succeeded { .. })
    }
}
