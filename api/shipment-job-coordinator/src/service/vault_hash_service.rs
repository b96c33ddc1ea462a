//! Coalesces frequent vault-hash updates into few on-chain writes.

use crate::app::AppState;
use crate::config::jobs::VaultHashConfig;
use crate::module::async_job::crud;
use crate::module::async_job::error::AppError;
use crate::service::listener_service::{self, RpcJobRequest};
use crate::service::rpc_registry_service::{SET_VAULT_HASH_TX, VAULT_HASH_PARAM_INDEX};
use crate::service::validation_service::validate_vault_hash_update;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct VaultHashUpdate {
    pub shipment_id: String,
    pub signing_wallet_id: String,
    pub vault_hash: String,
    pub rate_limit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VaultHashDecision {
    /// The hash was written into already-pending jobs.
    Coalesced {
        job_ids: Vec<String>,
        refired: Vec<String>,
    },
    Scheduled {
        job_id: String,
    },
    Fired {
        job_id: String,
    },
}

impl VaultHashDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coalesced { .. } => "COALESCED",
            Self::Scheduled { .. } => "SCHEDULED",
            Self::Fired { .. } => "FIRED",
        }
    }
}

pub async fn set_vault_hash(
    state: &AppState,
    update: VaultHashUpdate,
) -> Result<VaultHashDecision, AppError> {
    set_vault_hash_at(state, update, Utc::now().timestamp()).await
}

/// `now` decides which pending jobs are past their stuck deadline.
pub async fn set_vault_hash_at(
    state: &AppState,
    update: VaultHashUpdate,
    now: i64,
) -> Result<VaultHashDecision, AppError> {
    validate_vault_hash_update(&update)?;

    let pending = crud::list_pending_jobs(
        state,
        &update.shipment_id,
        &update.signing_wallet_id,
        SET_VAULT_HASH_TX,
    )
    .await?;

    if !pending.is_empty() {
        let mut job_ids = Vec::with_capacity(pending.len());
        let mut refired = Vec::new();
        for job in pending {
            crud::set_rpc_parameter(
                state,
                &job.job_id,
                VAULT_HASH_PARAM_INDEX,
                Value::String(update.vault_hash.clone()),
            )
            .await?;
            if job.is_stuck(now) {
                warn!(
                    job_id = %job.job_id,
                    deadline = job.stuck_deadline(),
                    now,
                    "pending vault hash job is past its deadline; re-firing"
                );
                listener_service::refire_async_job(state, &job.job_id).await?;
                refired.push(job.job_id.clone());
            }
            job_ids.push(job.job_id);
        }
        info!(shipment_id = %update.shipment_id, jobs = job_ids.len(), refired = refired.len(), "vault hash coalesced");
        return Ok(VaultHashDecision::Coalesced { job_ids, refired });
    }

    let delay_minutes = if update.rate_limit {
        VaultHashConfig::from_app(&state.config).rate_limit_minutes
    } else {
        0
    };
    let job = listener_service::rpc_job_for_listener(
        state,
        RpcJobRequest {
            shipment_id: update.shipment_id.clone(),
            rpc_method: SET_VAULT_HASH_TX.to_string(),
            rpc_parameters: vec![
                Value::String(update.signing_wallet_id.clone()),
                Value::String(update.shipment_id.clone()),
                Value::String(update.vault_hash),
            ],
            signing_wallet_id: update.signing_wallet_id,
            delay_minutes,
        },
    )
    .await?;

    Ok(if delay_minutes > 0 {
        VaultHashDecision::Scheduled { job_id: job.job_id }
    } else {
        VaultHashDecision::Fired { job_id: job.job_id }
    })
}
