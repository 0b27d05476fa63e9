//! Saga orchestrator: registers sagas and drives them in the background.

use std::sync::Arc;
use std::time::Duration;

use common::{SagaId, SharedClock, SystemClock};

use crate::compensation::CompensationRunner;
use crate::error::Result;
use crate::events::{RecordedEvent, SagaEvent};
use crate::executor::{ForwardOutcome, StepExecutor};
use crate::invoker::StepInvoker;
use crate::plan::{MAX_STEP_TIMEOUT, StartSaga};
use crate::registry::{SagaEntry, SagaRecord, SagaRegistry, SagaSnapshot};
use crate::state::SagaStatus;

/// Starts sagas and answers status queries.
///
/// Cloning is cheap; clones share the same registry, invoker and clock.
#[derive(Clone)]
pub struct SagaOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SagaRegistry,
    invoker: Arc<dyn StepInvoker>,
    clock: SharedClock,
    max_step_timeout: Duration,
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaOrchestrator")
            .field("sagas", &self.inner.registry.len())
            .field("clock", &self.inner.clock)
            .field("max_step_timeout", &self.inner.max_step_timeout)
            .finish_non_exhaustive()
    }
}

impl SagaOrchestrator {
    /// Creates an orchestrator that dispatches steps to `invoker`.
    pub fn new(invoker: Arc<dyn StepInvoker>, clock: SharedClock) -> Self {
        Self::with_max_step_timeout(invoker, clock, MAX_STEP_TIMEOUT)
    }

    /// Creates an orchestrator that rejects plans with a step timeout above
    /// `max_step_timeout`.
    pub fn with_max_step_timeout(
        invoker: Arc<dyn StepInvoker>,
        clock: SharedClock,
        max_step_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SagaRegistry::default(),
                invoker,
                clock,
                max_step_timeout,
            }),
        }
    }

    /// Creates an orchestrator on the system clock.
    pub fn with_system_clock(invoker: Arc<dyn StepInvoker>) -> Self {
        Self::new(invoker, SystemClock::shared())
    }

    /// Validates and registers a saga, then executes it in the background.
    ///
    /// Returns as soon as the saga is `Running`; progress is observed through
    /// [`status`](Self::status). Must be called from within a tokio runtime.
    #[tracing::instrument(skip(self, request), fields(saga = %request.name, steps = request.steps.len()))]
    pub fn start(&self, request: StartSaga) -> Result<SagaId> {
        request.validate_within(self.inner.max_step_timeout)?;

        let saga_id = SagaId::new();
        let mut record = SagaRecord::new(saga_id, request);
        let started = SagaEvent::saga_started(&record.name, record.steps.len());
        record.record(started);
        let entry = Arc::new(SagaEntry::new(record));
        entry.transition(SagaStatus::Running, None)?;
        self.inner.registry.insert(Arc::clone(&entry));

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(%saga_id, "saga started");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive(saga_id, entry).await });

        Ok(saga_id)
    }

    /// Returns the current state of a saga.
    pub fn status(&self, saga_id: SagaId) -> Result<SagaSnapshot> {
        let entry = self.inner.registry.get(saga_id)?;
        Ok(entry.read(SagaRecord::snapshot))
    }

    /// Returns the saga's timeline, oldest first.
    pub fn events(&self, saga_id: SagaId) -> Result<Vec<RecordedEvent>> {
        let entry = self.inner.registry.get(saga_id)?;
        Ok(entry.read(|r| r.history.clone()))
    }

    /// Waits until the saga reaches a terminal status and returns its state.
    pub async fn wait_for_terminal(&self, saga_id: SagaId) -> Result<SagaSnapshot> {
        let entry = self.inner.registry.get(saga_id)?;
        let mut status_rx = entry.subscribe();
        // The sender lives as long as the entry, so this only errors if the
        // entry is gone, in which case the snapshot below is still valid.
        let _ = status_rx.wait_for(SagaStatus::is_terminal).await;
        Ok(entry.read(SagaRecord::snapshot))
    }

    /// Number of sagas registered.
    pub fn saga_count(&self) -> usize {
        self.inner.registry.len()
    }
}

impl Inner {
    #[tracing::instrument(skip(self, entry), fields(%saga_id))]
    async fn drive(&self, saga_id: SagaId, entry: Arc<SagaEntry>) {
        let started = self.clock.now();
        let executor = StepExecutor::new(saga_id, &entry, self.invoker.as_ref(), self.clock.as_ref());

        let terminal = match executor.run_forward().await {
            ForwardOutcome::Completed => {
                Self::advance(&entry, SagaStatus::Completed, Some(SagaEvent::SagaCompleted));
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!("saga completed");
                SagaStatus::Completed
            }
            ForwardOutcome::Failed { index, error } => {
                let step_name = entry.read(|r| r.steps[index].name.clone());
                tracing::warn!(step = %step_name, error = %error, "saga failed, compensating");
                Self::advance(&entry, SagaStatus::Failed, None);
                Self::advance(
                    &entry,
                    SagaStatus::Compensating,
                    Some(SagaEvent::compensation_started(index, step_name)),
                );

                let summary = CompensationRunner::new(&executor).run(index).await;
                tracing::debug!(
                    compensated = summary.compensated,
                    skipped = summary.skipped,
                    failed = summary.failed_steps.len(),
                    "compensation pass finished"
                );

                if summary.failed_steps.is_empty() {
                    Self::advance(&entry, SagaStatus::Compensated, Some(SagaEvent::SagaCompensated));
                    metrics::counter!("saga_compensated_total").increment(1);
                    tracing::info!("saga compensated");
                    SagaStatus::Compensated
                } else {
                    tracing::error!(failed_steps = ?summary.failed_steps, "saga compensation incomplete");
                    Self::advance(
                        &entry,
                        SagaStatus::CompensationFailed,
                        Some(SagaEvent::compensation_failed(summary.failed_steps)),
                    );
                    metrics::counter!("saga_compensation_failed_total").increment(1);
                    SagaStatus::CompensationFailed
                }
            }
        };

        let elapsed = self.clock.now().saturating_duration_since(started);
        metrics::histogram!("saga_duration_seconds", "status" => terminal.as_str())
            .record(elapsed.as_secs_f64());
    }

    fn advance(entry: &SagaEntry, to: SagaStatus, event: Option<SagaEvent>) {
        if let Err(e) = entry.transition(to, event) {
            tracing::error!(error = %e, "saga state transition rejected");
        }
    }
}
