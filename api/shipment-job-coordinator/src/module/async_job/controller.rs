use super::crud;
use super::error::AppError;
use super::schema::{
    CreateRpcJobRequest, CreateRpcJobResponse, GetAsyncJobResponse, GetShipmentJobsResponse,
    HealthMetricsView, HealthResponse, JobMessageRequest, JobMessageResponse, QueueStatsResponse,
    RetryAsyncJobResponse, RpcMethodMetricsView, VaultHashUpdateRequest, VaultHashUpdateResponse,
};
use crate::app::AppState;
use crate::service::engine_auth_service::{ENGINE_SIGNATURE_HEADER, verify_engine_signature};
use crate::service::listener_service::{self, RpcJobRequest};
use crate::service::message_service;
use crate::service::metrics_service;
use crate::service::queue_service;
use crate::service::vault_hash_service::{self, VaultHashDecision, VaultHashUpdate};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::{error, info};

pub async fn create_rpc_job(
    State(state): State<AppState>,
    Json(req): Json<CreateRpcJobRequest>,
) -> impl IntoResponse {
    match listener_service::rpc_job_for_listener(&state, RpcJobRequest::from(req)).await {
        Ok(job) => (
            StatusCode::OK,
            Json(CreateRpcJobResponse {
                accepted: true,
                job_id: job.job_id,
                state: Some(job.state),
                error_code: None,
                reason: "async job accepted".to_string(),
            }),
        ),
        Err(err) => error_create(err),
    }
}

pub async fn get_async_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match crud::get_async_job(&state, &job_id).await {
        Ok(resp) if resp.found => (StatusCode::OK, Json(resp)),
        Ok(resp) => (StatusCode::NOT_FOUND, Json(resp)),
        Err(err) => error_get(err),
    }
}

pub async fn get_shipment_jobs(
    State(state): State<AppState>,
    Path(shipment_id): Path<String>,
) -> impl IntoResponse {
    match crud::get_shipment_jobs(&state, &shipment_id).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(AppError {
            status,
            code,
            message,
        }) => {
            error!(error_code = code, reason = %message, shipment_id = %shipment_id, "shipment jobs lookup failed");
            (
                status,
                Json(GetShipmentJobsResponse {
                    found: false,
                    shipment_id,
                    jobs: Vec::new(),
                    error_code: Some(code.to_string()),
                    reason: message,
                }),
            )
        }
    }
}

pub async fn ingest_job_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(req): Json<JobMessageRequest>,
) -> impl IntoResponse {
    if let Err(err) = verify_engine_auth(&state, &headers, &job_id, &req) {
        return error_message(err, job_id);
    }

    let message_type = req.message_type;
    match message_service::ingest_message(&state, &job_id, message_type, req.body).await {
        Ok(outcome) => {
            info!(
                job_id = %job_id,
                message_type = message_type.as_str(),
                duplicate = outcome.duplicate,
                effects = outcome.effects.len(),
                "engine message ingested"
            );
            (
                StatusCode::OK,
                Json(JobMessageResponse {
                    accepted: true,
                    duplicate: outcome.duplicate,
                    job_id: outcome.job_id,
                    state: Some(outcome.state),
                    error_code: None,
                    reason: if outcome.duplicate {
                        "duplicate message ignored".to_string()
                    } else {
                        "message applied".to_string()
                    },
                }),
            )
        }
        Err(err) => error_message(err, job_id),
    }
}

pub async fn retry_async_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match listener_service::refire_async_job(&state, &job_id).await {
        Ok(job) => {
            info!(job_id = %job_id, "async job manually re-fired");
            (
                StatusCode::OK,
                Json(RetryAsyncJobResponse {
                    accepted: true,
                    job_id: job.job_id,
                    state: Some(job.state),
                    error_code: None,
                    reason: "async job re-queued".to_string(),
                }),
            )
        }
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, job_id = %job_id, "async job retry rejected");
            (
                err.status,
                Json(RetryAsyncJobResponse {
                    accepted: false,
                    job_id,
                    state: None,
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                }),
            )
        }
    }
}

pub async fn update_vault_hash(
    State(state): State<AppState>,
    Path(shipment_id): Path<String>,
    Json(req): Json<VaultHashUpdateRequest>,
) -> impl IntoResponse {
    let update = VaultHashUpdate {
        shipment_id: shipment_id.clone(),
        signing_wallet_id: req.signing_wallet_id,
        vault_hash: req.vault_hash,
        rate_limit: req.rate_limit,
    };
    match vault_hash_service::set_vault_hash(&state, update).await {
        Ok(decision) => {
            let name = decision.as_str().to_string();
            let (job_ids, refired_job_ids) = match decision {
                VaultHashDecision::Coalesced { job_ids, refired } => (job_ids, refired),
                VaultHashDecision::Scheduled { job_id } | VaultHashDecision::Fired { job_id } => {
                    (vec![job_id], Vec::new())
                }
            };
            info!(shipment_id = %shipment_id, decision = %name, "vault hash update accepted");
            (
                StatusCode::OK,
                Json(VaultHashUpdateResponse {
                    accepted: true,
                    shipment_id,
                    decision: Some(name),
                    job_ids,
                    refired_job_ids,
                    error_code: None,
                    reason: "vault hash update accepted".to_string(),
                }),
            )
        }
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, shipment_id = %shipment_id, "vault hash update rejected");
            (
                err.status,
                Json(VaultHashUpdateResponse {
                    accepted: false,
                    shipment_id,
                    decision: None,
                    job_ids: Vec::new(),
                    refired_job_ids: Vec::new(),
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                }),
            )
        }
    }
}

pub async fn get_queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(queue_view(&state).await))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let queue = queue_view(&state).await;
    let m = metrics_service::snapshot();
    let metrics = HealthMetricsView {
        jobs_queued: m.jobs_queued,
        jobs_submitted: m.jobs_submitted,
        jobs_completed: m.jobs_completed,
        jobs_failed: m.jobs_failed,
        retries_scheduled: m.retries_scheduled,
        wallet_in_use: m.wallet_in_use,
        transaction_collisions: m.transaction_collisions,
        duplicate_messages: m.duplicate_messages,
        last_error_ts: m.last_error_ts,
        rpc_methods: m
            .rpc_methods
            .into_iter()
            .map(|(method, s)| RpcMethodMetricsView {
                method,
                calls: s.calls,
                errors: s.errors,
                avg_latency_ms: if s.calls > 0 {
                    s.total_latency_ms / s.calls
                } else {
                    0
                },
            })
            .collect(),
    };
    let redis_available = state.infra.is_some() && queue.available;
    let ok = !state.config.worker_enabled || queue.available;
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok,
            redis_available,
            worker_enabled: state.config.worker_enabled,
            queue,
            metrics,
            error_code: None,
            reason: if ok {
                "healthy".to_string()
            } else {
                "worker enabled but queue unavailable".to_string()
            },
        }),
    )
}

async fn queue_view(state: &AppState) -> QueueStatsResponse {
    let backend = if state.infra.is_some() { "redis" } else { "local" }.to_string();
    match queue_service::queue_stats(state).await {
        Ok(depth) => QueueStatsResponse {
            available: true,
            backend,
            queued: depth.queued,
            processing: depth.processing,
            retry_scheduled: depth.retry_scheduled,
            dead_letter: depth.dead_letter,
            error_code: None,
            reason: "queue stats available".to_string(),
        },
        Err(message) => QueueStatsResponse {
            available: false,
            backend,
            queued: 0,
            processing: 0,
            retry_scheduled: 0,
            dead_letter: 0,
            error_code: Some("QUEUE_UNAVAILABLE".to_string()),
            reason: message,
        },
    }
}

fn verify_engine_auth<T: serde::Serialize>(
    state: &AppState,
    headers: &HeaderMap,
    job_id: &str,
    payload: &T,
) -> Result<(), AppError> {
    if !state.config.engine_auth_enabled {
        return Ok(());
    }
    let secret = state
        .config
        .engine_auth_secret
        .as_deref()
        .ok_or_else(|| AppError::internal("AUTH_CONFIG_ERROR", "engine auth secret missing"))?;
    let sig = headers
        .get(ENGINE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::unauthorized("AUTH_MISSING_SIGNATURE", "missing x-engine-signature")
        })?;
    let canonical = serde_json::to_string(payload).map_err(|e| {
        AppError::internal(
            "AUTH_SERIALIZE_ERROR",
            format!("auth payload serialization failed: {e}"),
        )
    })?;
    verify_engine_signature(job_id, &canonical, sig, secret)
        .map_err(|e| AppError::unauthorized("AUTH_INVALID_SIGNATURE", e))
}

fn error_create(err: AppError) -> (StatusCode, Json<CreateRpcJobResponse>) {
    error!(error_code = err.code, reason = %err.message, "async job rejected");
    (
        err.status,
        Json(CreateRpcJobResponse {
            accepted: false,
            job_id: String::new(),
            state: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_get(err: AppError) -> (StatusCode, Json<GetAsyncJobResponse>) {
    error!(error_code = err.code, reason = %err.message, "async job lookup failed");
    (
        err.status,
        Json(GetAsyncJobResponse {
            found: false,
            job: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_message(err: AppError, job_id: String) -> (StatusCode, Json<JobMessageResponse>) {
    error!(error_code = err.code, reason = %err.message, job_id = %job_id, "engine message rejected");
    (
        err.status,
        Json(JobMessageResponse {
            accepted: false,
            duplicate: false,
            job_id,
            state: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
