//! Saga error types.

use std::time::Duration;

use common::SagaId;
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SagaError {
    /// No saga is registered under the given ID.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// The submitted plan cannot be executed.
    #[error("Invalid saga plan: {0}")]
    InvalidSagaPlan(String),

    /// A single invocation did not finish within the step timeout.
    #[error("Step '{step}' timed out after {timeout:?}")]
    StepTimeout { step: String, timeout: Duration },

    /// The step invoker reported a failure.
    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// A forward step failed on every attempt its retry policy allowed.
    #[error("Step '{step}' failed after {attempts} attempt(s): {last_error}")]
    StepFailedExhaustedRetries {
        step: String,
        attempts: u32,
        last_error: String,
    },

    /// A compensating action failed on every attempt its retry policy allowed.
    #[error("Compensation for step '{step}' failed after {attempts} attempt(s): {last_error}")]
    CompensationFailed {
        step: String,
        attempts: u32,
        last_error: String,
    },

    /// Saga is in an invalid state for the requested transition.
    #[error("Invalid saga transition: {from} -> {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },
}

impl SagaError {
    /// Short, stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaError::SagaNotFound(_) => "SagaNotFound",
            SagaError::InvalidSagaPlan(_) => "InvalidSagaPlan",
            SagaError::StepTimeout { .. } => "StepTimeout",
            SagaError::StepFailed { .. } => "StepFailed",
            SagaError::StepFailedExhaustedRetries { .. } => "StepFailedExhaustedRetries",
            SagaError::CompensationFailed { .. } => "CompensationFailed",
            SagaError::InvalidTransition { .. } => "InvalidTransition",
        }
    }

    /// Convenience constructor for invoker failures.
    pub fn step_failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        SagaError::StepFailed {
            step: step.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
