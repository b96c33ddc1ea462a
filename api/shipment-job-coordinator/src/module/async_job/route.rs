use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::{get, post};

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/jobs", post(controller::create_rpc_job))
        .route("/v1/jobs/health", get(controller::health))
        .route("/v1/jobs/queue-stats", get(controller::get_queue_stats))
        .route("/v1/jobs/:job_id", get(controller::get_async_job))
        .route(
            "/v1/jobs/:job_id/message",
            post(controller::ingest_job_message),
        )
        .route("/v1/jobs/:job_id/retry", post(controller::retry_async_job))
        .route(
            "/v1/shipments/:shipment_id/jobs",
            get(controller::get_shipment_jobs),
        )
        .route(
            "/v1/shipments/:shipment_id/vault-hash",
            post(controller::update_vault_hash),
        )
        .with_state(state)
}
