//! Step invoker capability and an in-memory implementation.
//!
//! The orchestrator never interprets a step's service, action or payload.
//! It hands them to a [`StepInvoker`] supplied by the host application.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::SagaId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::SagaError;

/// Whether an invocation runs a step's forward action or its compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Action,
    Compensation,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Action => "action",
            CallKind::Compensation => "compensation",
        }
    }
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCall {
    pub saga_id: SagaId,
    pub step_index: usize,
    pub step_name: String,
    /// Target service named by the step.
    pub service: String,
    /// The action or compensation name, depending on `kind`.
    pub operation: String,
    pub kind: CallKind,
    pub payload: Value,
    /// 1-based attempt number for this operation.
    pub attempt: u32,
}

/// Performs the concrete work behind a saga step.
///
/// Implementations must tolerate being called more than once for the same
/// step, since failed or timed-out attempts are retried.
#[async_trait]
pub trait StepInvoker: Send + Sync {
    /// Runs the named operation and returns its response.
    async fn invoke(&self, call: StepCall) -> Result<Value, SagaError>;
}

#[derive(Debug, Clone, Copy, Default)]
enum Failures {
    #[default]
    Never,
    Next(u32),
    Always,
}

impl Failures {
    /// Consumes one failure if any remain.
    fn take(&mut self) -> bool {
        match self {
            Failures::Never | Failures::Next(0) => false,
            Failures::Next(n) => {
                *n -= 1;
                true
            }
            Failures::Always => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    failures: Failures,
    delay: Option<Duration>,
    response: Option<Value>,
}

/// Number of calls an invoker remembers unless told otherwise.
pub const DEFAULT_CALL_HISTORY: usize = 1024;

#[derive(Debug)]
struct InMemoryInvokerState {
    behaviors: HashMap<(String, String), Behavior>,
    calls: VecDeque<StepCall>,
    call_history: usize,
}

impl InMemoryInvokerState {
    fn remember(&mut self, call: &StepCall) {
        if self.call_history == 0 {
            return;
        }
        if self.calls.len() == self.call_history {
            self.calls.pop_front();
        }
        self.calls.push_back(call.clone());
    }
}

/// In-memory step invoker for tests and local runs.
///
/// Every operation succeeds by default and echoes its call back. Failures,
/// delays and canned responses can be configured per `(service, operation)`.
/// Only the most recent calls are kept, so a long-running server does not
/// accumulate payloads.
#[derive(Debug, Clone)]
pub struct InMemoryStepInvoker {
    state: Arc<RwLock<InMemoryInvokerState>>,
}

impl Default for InMemoryStepInvoker {
    fn default() -> Self {
        Self::with_call_history(DEFAULT_CALL_HISTORY)
    }
}

impl InMemoryStepInvoker {
    /// Creates a new in-memory invoker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an invoker that remembers at most `capacity` calls.
    pub fn with_call_history(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryInvokerState {
                behaviors: HashMap::new(),
                calls: VecDeque::with_capacity(capacity.min(DEFAULT_CALL_HISTORY)),
                call_history: capacity,
            })),
        }
    }

    /// Makes every call to the operation fail.
    pub fn fail_always(&self, service: &str, operation: &str) {
        self.behavior_mut(service, operation, |b| b.failures = Failures::Always);
    }

    /// Makes the next `times` calls to the operation fail.
    pub fn fail_times(&self, service: &str, operation: &str, times: u32) {
        self.behavior_mut(service, operation, |b| b.failures = Failures::Next(times));
    }

    /// Makes every call to the operation take `delay` before answering.
    pub fn delay(&self, service: &str, operation: &str, delay: Duration) {
        self.behavior_mut(service, operation, |b| b.delay = Some(delay));
    }

    /// Sets the response returned by successful calls to the operation.
    pub fn respond(&self, service: &str, operation: &str, response: Value) {
        self.behavior_mut(service, operation, |b| b.response = Some(response));
    }

    /// Returns the remembered calls, oldest first.
    pub fn calls(&self) -> Vec<StepCall> {
        self.state.read().calls.iter().cloned().collect()
    }

    /// Returns how many remembered calls went to the operation.
    pub fn call_count(&self, service: &str, operation: &str) -> usize {
        self.state
            .read()
            .calls
            .iter()
            .filter(|c| c.service == service && c.operation == operation)
            .count()
    }

    fn behavior_mut(&self, service: &str, operation: &str, f: impl FnOnce(&mut Behavior)) {
        let mut state = self.state.write();
        let behavior = state
            .behaviors
            .entry((service.to_string(), operation.to_string()))
            .or_default();
        f(behavior);
    }
}

#[async_trait]
impl StepInvoker for InMemoryStepInvoker {
    async fn invoke(&self, call: StepCall) -> Result<Value, SagaError> {
        let (delay, outcome) = {
            let mut state = self.state.write();
            state.remember(&call);

            let key = (call.service.clone(), call.operation.clone());
            match state.behaviors.get_mut(&key) {
                None => (None, Ok(None)),
                Some(b) => {
                    let outcome = if b.failures.take() {
                        Err(SagaError::step_failed(
                            &call.step_name,
                            format!("{}.{} rejected the request", call.service, call.operation),
                        ))
                    } else {
                        Ok(b.response.clone())
                    };
                    (b.delay, outcome)
                }
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        outcome.map(|response| {
            response.unwrap_or_else(|| {
                json!({
                    "service": call.service,
                    "operation": call.operation,
                    "attempt": call.attempt,
                    "payload": call.payload,
                })
            })
        })
    }
}
