//! Saga orchestration.
//!
//! A saga is an ordered list of steps, each pairing a forward action with a
//! compensating action. Steps run strictly in order; every invocation is
//! bounded by the step timeout and retried according to the step's retry
//! policy. When a step exhausts its retries the saga is compensated: the
//! steps that succeeded are undone in reverse order.
//!
//! Concrete work is delegated to a host-supplied [`StepInvoker`].

pub mod compensation;
pub mod error;
pub mod events;
mod executor;
pub mod invoker;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod state;

pub use compensation::{CompensationEntry, CompensationOutcome};
pub use error::SagaError;
pub use events::{RecordedEvent, SagaEvent};
pub use invoker::{CallKind, InMemoryStepInvoker, StepCall, StepInvoker};
pub use orchestrator::SagaOrchestrator;
pub use plan::{DEFAULT_STEP_TIMEOUT, MAX_STEP_TIMEOUT, StartSaga, StepDefinition, StepResult};
pub use registry::{InFlightStep, SagaSnapshot, StepProgress};
pub use state::SagaStatus;
