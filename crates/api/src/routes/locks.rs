//! Lock acquire, release and status endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use common::LockId;
use lock_manager::AcquireRequest;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct AcquireLockRequest {
    pub key: String,
    pub owner: String,
    pub ttl_seconds: u64,
    pub metadata: Option<String>,
    /// Absent means fail immediately if the key is held.
    pub wait_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseLockRequest {
    pub lock_id: String,
    pub owner: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct LockResponse {
    pub lock_id: String,
    pub key: String,
    pub owner: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseLockResponse {
    pub released: bool,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct LockStatusResponse {
    pub key: String,
    pub is_locked: bool,
    pub lock_id: Option<String>,
    pub owner: Option<String>,
    pub acquired_at: Option<String>,
    pub expires_at: Option<String>,
    pub metadata: Option<String>,
    pub remaining_ttl_ms: Option<u64>,
    pub waiters: usize,
}

// -- Handlers --

/// POST /api/v1/locks — acquire a lock, optionally waiting for it.
#[tracing::instrument(skip(state, req), fields(key = %req.key, owner = %req.owner))]
pub async fn acquire(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AcquireLockRequest>,
) -> Result<Json<LockResponse>, ApiError> {
    if req.key.is_empty() {
        return Err(ApiError::BadRequest("key must not be empty".to_string()));
    }
    if req.owner.is_empty() {
        return Err(ApiError::BadRequest("owner must not be empty".to_string()));
    }

    let mut request = AcquireRequest::new(
        req.key,
        req.owner.clone(),
        Duration::from_secs(req.ttl_seconds),
    );
    if let Some(metadata) = req.metadata {
        request = request.with_metadata(metadata);
    }
    if let Some(wait) = req.wait_timeout_seconds {
        request = request.wait_up_to(Duration::from_secs(wait));
    }

    let grant = state.locks.acquire(request).await?;

    Ok(Json(LockResponse {
        lock_id: grant.lock_id.to_string(),
        key: grant.key,
        owner: req.owner,
        expires_at: grant.expires_at_utc.to_rfc3339(),
    }))
}

/// DELETE /api/v1/locks/{key} — release a lock with its fencing token.
#[tracing::instrument(skip(state, req), fields(owner = %req.owner))]
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<ReleaseLockRequest>,
) -> Result<Json<ReleaseLockResponse>, ApiError> {
    let lock_id: LockId = req
        .lock_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid lock_id: {e}")))?;

    state.locks.release(&key, lock_id, &req.owner).await?;

    Ok(Json(ReleaseLockResponse {
        released: true,
        key,
    }))
}

/// GET /api/v1/locks/{key} — current holder and queue depth.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Json<LockStatusResponse> {
    let status = state.locks.status(&key);
    let is_locked = status.is_held();

    let response = match status.holder {
        Some(holder) => LockStatusResponse {
            key: status.key,
            is_locked,
            lock_id: Some(holder.lock_id.to_string()),
            owner: Some(holder.owner),
            acquired_at: Some(holder.acquired_at.to_rfc3339()),
            expires_at: Some(holder.expires_at.to_rfc3339()),
            metadata: holder.metadata,
            remaining_ttl_ms: Some(holder.remaining_ttl.as_millis().try_into().unwrap_or(u64::MAX)),
            waiters: status.waiters,
        },
        None => LockStatusResponse {
            key: status.key,
            is_locked,
            lock_id: None,
            owner: None,
            acquired_at: None,
            expires_at: None,
            metadata: None,
            remaining_ttl_ms: None,
            waiters: status.waiters,
        },
    };

    Json(response)
}
