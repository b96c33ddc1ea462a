//! Entry point for domain changes that need an on-chain transaction.

use crate::app::AppState;
use crate::module::async_job::crud;
use crate::module::async_job::error::AppError;
use crate::module::async_job::model::{AsyncJobRecord, JobParameters, NewAsyncJob};
use crate::module::async_job::schema::CreateRpcJobRequest;
use crate::service::queue_service;
use crate::service::validation_service::validate_rpc_job;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RpcJobRequest {
    pub shipment_id: String,
    pub rpc_method: String,
    pub rpc_parameters: Vec<Value>,
    pub signing_wallet_id: String,
    pub delay_minutes: i64,
}

impl From<CreateRpcJobRequest> for RpcJobRequest {
    fn from(req: CreateRpcJobRequest) -> Self {
        Self {
            shipment_id: req.shipment_id,
            rpc_method: req.rpc_method,
            rpc_parameters: req.rpc_parameters,
            signing_wallet_id: req.signing_wallet_id,
            delay_minutes: req.delay_minutes.unwrap_or(0),
        }
    }
}

/// Persists a PENDING job and only then enqueues it, `delay_minutes` out.
pub async fn rpc_job_for_listener(
    state: &AppState,
    req: RpcJobRequest,
) -> Result<AsyncJobRecord, AppError> {
    validate_rpc_job(&state.registry, &req)?;

    let job = crud::create_async_job(
        state,
        NewAsyncJob {
            shipment_id: req.shipment_id,
            parameters: JobParameters {
                rpc_method: req.rpc_method,
                rpc_parameters: req.rpc_parameters,
                signing_wallet_id: req.signing_wallet_id,
                signed_tx: None,
            },
            delay_minutes: req.delay_minutes,
        },
    )
    .await?;
    fire_async_job(state, &job).await?;

    info!(
        job_id = %job.job_id,
        shipment_id = %job.shipment_id,
        rpc_method = %job.parameters.rpc_method,
        delay_minutes = job.delay_minutes,
        "async job created"
    );
    Ok(job)
}

pub async fn fire_async_job(state: &AppState, job: &AsyncJobRecord) -> Result<(), AppError> {
    queue_service::enqueue_job(state, &job.job_id, job.delay_minutes * 60)
        .await
        .map_err(|e| AppError::internal("QUEUE_ENQUEUE_FAILED", e))
}

/// Queues an existing job for an immediate attempt.
pub async fn refire_async_job(state: &AppState, job_id: &str) -> Result<AsyncJobRecord, AppError> {
    let job = crud::get_async_job_record(state, job_id).await?;
    if job.state.is_in_flight_or_done() {
        return Err(AppError::conflict(
            "JOB_NOT_REFIREABLE",
            format!("job is {}", job.state.as_str()),
        ));
    }
    queue_service::enqueue_job(state, job_id, 0)
        .await
        .map_err(|e| AppError::internal("QUEUE_ENQUEUE_FAILED", e))?;
    info!(job_id = %job_id, state = job.state.as_str(), "async job re-fired");
    Ok(job)
}
