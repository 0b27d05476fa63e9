//! In-memory saga registry.
//!
//! Each saga lives behind its own lock; the registry map itself is sharded,
//! so work on one saga never blocks another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::SagaId;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::compensation::CompensationEntry;
use crate::error::{Result, SagaError};
use crate::events::{RecordedEvent, SagaEvent};
use crate::invoker::CallKind;
use crate::plan::{StartSaga, StepDefinition, StepResult};
use crate::state::SagaStatus;

/// The invocation a saga is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InFlightStep {
    pub step_index: usize,
    pub kind: CallKind,
    pub attempt: u32,
}

/// Mutable state of one saga.
#[derive(Debug)]
pub(crate) struct SagaRecord {
    pub id: SagaId,
    pub name: String,
    pub metadata: Value,
    pub steps: Arc<[StepDefinition]>,
    pub results: Vec<Option<StepResult>>,
    pub current_step_index: usize,
    pub failed_step_index: Option<usize>,
    pub in_flight: Option<InFlightStep>,
    pub status: SagaStatus,
    pub compensation_log: Vec<CompensationEntry>,
    pub failure_reason: Option<String>,
    pub history: Vec<RecordedEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    pub fn new(id: SagaId, request: StartSaga) -> Self {
        let now = Utc::now();
        let results = vec![None; request.steps.len()];
        Self {
            id,
            name: request.name,
            metadata: request.metadata,
            steps: request.steps.into(),
            results,
            current_step_index: 0,
            failed_step_index: None,
            in_flight: None,
            status: SagaStatus::Pending,
            compensation_log: Vec::new(),
            failure_reason: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends an event to the saga's history.
    pub fn record(&mut self, event: SagaEvent) {
        self.history.push(RecordedEvent {
            sequence: self.history.len() as u64 + 1,
            recorded_at: Utc::now(),
            event,
        });
    }

    pub fn snapshot(&self) -> SagaSnapshot {
        let steps = self
            .steps
            .iter()
            .zip(&self.results)
            .map(|(step, result)| StepProgress {
                name: step.name.clone(),
                service: step.service.clone(),
                action: step.action.clone(),
                compensation: step.compensation.clone(),
                result: result.clone(),
            })
            .collect();

        SagaSnapshot {
            saga_id: self.id,
            name: self.name.clone(),
            status: self.status,
            current_step_index: self.current_step_index,
            failed_step_index: self.failed_step_index,
            in_flight: self.in_flight,
            steps,
            compensation_log: self.compensation_log.clone(),
            failure_reason: self.failure_reason.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time view of a saga.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SagaSnapshot {
    pub saga_id: SagaId,
    pub name: String,
    pub status: SagaStatus,
    pub current_step_index: usize,
    pub failed_step_index: Option<usize>,
    pub in_flight: Option<InFlightStep>,
    pub steps: Vec<StepProgress>,
    pub compensation_log: Vec<CompensationEntry>,
    pub failure_reason: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A step and the outcome of its forward action, if it ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepProgress {
    pub name: String,
    pub service: String,
    pub action: String,
    pub compensation: String,
    pub result: Option<StepResult>,
}

/// A registered saga and its status broadcast.
#[derive(Debug)]
pub(crate) struct SagaEntry {
    record: RwLock<SagaRecord>,
    status_tx: watch::Sender<SagaStatus>,
}

impl SagaEntry {
    pub fn new(record: SagaRecord) -> Self {
        let (status_tx, _) = watch::channel(record.status);
        Self {
            record: RwLock::new(record),
            status_tx,
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&SagaRecord) -> R) -> R {
        f(&self.record.read())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut SagaRecord) -> R) -> R {
        let mut record = self.record.write();
        let out = f(&mut record);
        record.updated_at = Utc::now();
        out
    }

    /// Moves the saga to `to`, recording `event` in the same critical section.
    pub fn transition(&self, to: SagaStatus, event: Option<SagaEvent>) -> Result<()> {
        {
            let mut record = self.record.write();
            let from = record.status;
            if !from.can_transition_to(to) {
                return Err(SagaError::InvalidTransition { from, to });
            }
            record.status = to;
            record.updated_at = Utc::now();
            if let Some(event) = event {
                record.record(event);
            }
        }
        self.status_tx.send_replace(to);
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<SagaStatus> {
        self.status_tx.subscribe()
    }
}

/// All sagas known to an orchestrator.
#[derive(Debug, Default)]
pub(crate) struct SagaRegistry {
    sagas: DashMap<SagaId, Arc<SagaEntry>>,
}

impl SagaRegistry {
    pub fn insert(&self, entry: Arc<SagaEntry>) {
        let id = entry.read(|r| r.id);
        self.sagas.insert(id, entry);
    }

    pub fn get(&self, id: SagaId) -> Result<Arc<SagaEntry>> {
        self.sagas
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(SagaError::SagaNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.sagas.len()
    }
}
