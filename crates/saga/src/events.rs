//! Saga timeline events.
//!
//! Every saga keeps an ordered history of what happened to it. The history
//! is append-only and is exposed alongside the saga status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::invoker::CallKind;

/// Events that can occur during saga execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// An attempt of an action or compensation was dispatched.
    StepStarted(StepAttemptData),

    /// An attempt failed or timed out (a retry may follow).
    StepAttemptFailed(StepAttemptFailedData),

    /// A forward step succeeded.
    StepCompleted(StepCompletedData),

    /// A forward step exhausted its retries.
    StepFailed(StepFailedData),

    /// Compensation started after a step failure.
    CompensationStarted(CompensationData),

    /// A compensation step completed successfully.
    CompensationStepCompleted(StepCompletedData),

    /// A compensation step exhausted its retries (compensation continues).
    CompensationStepFailed(StepFailedData),

    /// Saga completed successfully.
    SagaCompleted,

    /// Every applicable compensation succeeded.
    SagaCompensated,

    /// One or more compensations failed.
    SagaCompensationFailed(CompensationFailedData),
}

impl SagaEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepAttemptFailed(_) => "StepAttemptFailed",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted => "SagaCompleted",
            SagaEvent::SagaCompensated => "SagaCompensated",
            SagaEvent::SagaCompensationFailed(_) => "SagaCompensationFailed",
        }
    }
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStartedData {
    /// The saga name.
    pub name: String,
    /// Number of steps in the plan.
    pub step_count: usize,
}

/// Data for StepStarted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttemptData {
    pub step_index: usize,
    pub step_name: String,
    pub kind: CallKind,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Data for StepAttemptFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttemptFailedData {
    pub step_index: usize,
    pub step_name: String,
    pub kind: CallKind,
    pub attempt: u32,
    /// Error message describing the failure.
    pub error: String,
}

/// Data for StepCompleted and CompensationStepCompleted events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step_index: usize,
    pub step_name: String,
    pub attempts: u32,
}

/// Data for StepFailed and CompensationStepFailed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_index: usize,
    pub step_name: String,
    /// Error message describing the final failure.
    pub error: String,
}

/// Data for CompensationStarted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationData {
    /// Index of the step that triggered compensation.
    pub from_step_index: usize,
    /// Name of the step that triggered compensation.
    pub from_step: String,
}

/// Data for SagaCompensationFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailedData {
    /// Names of the steps whose compensation failed.
    pub failed_steps: Vec<String>,
}

/// An event as stored in a saga's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedEvent {
    /// Position in the history, starting at 1.
    pub sequence: u64,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SagaEvent,
}

// Convenience constructors
impl SagaEvent {
    /// Creates a SagaStarted event.
    pub fn saga_started(name: impl Into<String>, step_count: usize) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            name: name.into(),
            step_count,
        })
    }

    /// Creates a StepStarted event.
    pub fn step_started(
        step_index: usize,
        step_name: impl Into<String>,
        kind: CallKind,
        attempt: u32,
    ) -> Self {
        SagaEvent::StepStarted(StepAttemptData {
            step_index,
            step_name: step_name.into(),
            kind,
            attempt,
        })
    }

    /// Creates a StepAttemptFailed event.
    pub fn attempt_failed(
        step_index: usize,
        step_name: impl Into<String>,
        kind: CallKind,
        attempt: u32,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::StepAttemptFailed(StepAttemptFailedData {
            step_index,
            step_name: step_name.into(),
            kind,
            attempt,
            error: error.into(),
        })
    }

    /// Creates a StepCompleted event.
    pub fn step_completed(step_index: usize, step_name: impl Into<String>, attempts: u32) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_index,
            step_name: step_name.into(),
            attempts,
        })
    }

    /// Creates a StepFailed event.
    pub fn step_failed(step_index: usize, step_name: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_index,
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    /// Creates a CompensationStarted event.
    pub fn compensation_started(from_step_index: usize, from_step: impl Into<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationData {
            from_step_index,
            from_step: from_step.into(),
        })
    }

    /// Creates a CompensationStepCompleted event.
    pub fn compensation_step_completed(
        step_index: usize,
        step_name: impl Into<String>,
        attempts: u32,
    ) -> Self {
        SagaEvent::CompensationStepCompleted(StepCompletedData {
            step_index,
            step_name: step_name.into(),
            attempts,
        })
    }

    /// Creates a CompensationStepFailed event.
    pub fn compensation_step_failed(
        step_index: usize,
        step_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepFailed(StepFailedData {
            step_index,
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    /// Creates a SagaCompensationFailed event.
    pub fn compensation_failed(failed_steps: Vec<String>) -> Self {
        SagaEvent::SagaCompensationFailed(CompensationFailedData { failed_steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(SagaEvent::saga_started("s", 3).event_type(), "SagaStarted");
        assert_eq!(
            SagaEvent::step_started(0, "a", CallKind::Action, 1).event_type(),
            "StepStarted"
        );
        assert_eq!(
            SagaEvent::compensation_step_failed(0, "a", "boom").event_type(),
            "CompensationStepFailed"
        );
        assert_eq!(SagaEvent::SagaCompensated.event_type(), "SagaCompensated");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let event = SagaEvent::attempt_failed(1, "charge", CallKind::Action, 2, "timeout");
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: SagaEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_recorded_event_is_flattened() {
        let recorded = RecordedEvent {
            sequence: 4,
            recorded_at: Utc::now(),
            event: SagaEvent::step_completed(0, "reserve", 1),
        };
        let json = serde_json::to_value(&recorded).unwrap();
        assert_eq!(json["sequence"], 4);
        assert_eq!(json["type"], "StepCompleted");
        assert_eq!(json["data"]["step_name"], "reserve");
    }

    #[test]
    fn test_unit_variant_serialization() {
        let json = serde_json::to_value(SagaEvent::SagaCompleted).unwrap();
        assert_eq!(json["type"], "SagaCompleted");
    }
}
