//! Saga start, status and timeline endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{BackoffStrategy, RetryPolicy, SagaId};
use saga::{RecordedEvent, SagaSnapshot, StartSaga, StepDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct StartSagaRequest {
    pub name: String,
    pub steps: Vec<SagaStepRequest>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct SagaStepRequest {
    pub name: String,
    pub service: String,
    pub action: String,
    pub compensation: String,
    /// Falls back to the configured default when absent.
    pub timeout_seconds: Option<u64>,
    pub retry_policy: Option<RetryPolicyRequest>,
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RetryPolicyRequest {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    /// `"fixed"`, `"linear"` or `"exponential"`.
    #[serde(default)]
    pub backoff_strategy: Option<String>,
    #[serde(default)]
    pub initial_delay_ms: u64,
}

impl RetryPolicyRequest {
    fn into_policy(self) -> Result<RetryPolicy, ApiError> {
        let backoff = match self.backoff_strategy {
            Some(s) => s
                .parse::<BackoffStrategy>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            None => BackoffStrategy::default(),
        };
        Ok(RetryPolicy::with_retries(
            self.max_retries,
            backoff,
            Duration::from_millis(self.initial_delay_ms),
        ))
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct SagaStartedResponse {
    pub saga_id: String,
    pub status: String,
}

// -- Handlers --

/// POST /api/v1/sagas — validate a plan and start executing it.
#[tracing::instrument(skip(state, req), fields(saga = %req.name, steps = req.steps.len()))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<SagaStartedResponse>), ApiError> {
    let steps = req
        .steps
        .into_iter()
        .map(|step| -> Result<StepDefinition, ApiError> {
            let timeout = step
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(state.default_step_timeout);
            let mut definition =
                StepDefinition::new(step.name, step.service, step.action, step.compensation)
                    .with_timeout(timeout);
            if let Some(policy) = step.retry_policy {
                definition = definition.with_retry_policy(policy.into_policy()?);
            }
            if let Some(payload) = step.payload {
                definition = definition.with_payload(payload);
            }
            Ok(definition)
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let mut request = StartSaga::new(req.name, steps);
    if let Some(metadata) = req.metadata {
        request = request.with_metadata(metadata);
    }

    let saga_id = state.sagas.start(request)?;
    let status = state.sagas.status(saga_id)?.status;

    Ok((
        StatusCode::ACCEPTED,
        Json(SagaStartedResponse {
            saga_id: saga_id.to_string(),
            status: status.to_string(),
        }),
    ))
}

/// GET /api/v1/sagas/{id} — current saga state.
#[tracing::instrument(skip(state))]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaSnapshot>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    Ok(Json(state.sagas.status(saga_id)?))
}

/// GET /api/v1/sagas/{id}/events — the saga's timeline.
#[tracing::instrument(skip(state))]
pub async fn events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<RecordedEvent>>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    Ok(Json(state.sagas.events(saga_id)?))
}

fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga ID: {e}")))
}
