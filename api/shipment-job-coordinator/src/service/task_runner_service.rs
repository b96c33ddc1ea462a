//! One end-to-end attempt of an async job: build, sign, record, submit.

use crate::app::AppState;
use crate::config::jobs::TaskRunnerConfig;
use crate::module::async_job::crud;
use crate::module::async_job::error::JobError;
use crate::module::async_job::model::{AsyncJobRecord, OnChainActionRecord, TransactionReceiptRecord};
use crate::module::async_job::schema::JobState;
use crate::service::metrics_service;
use crate::service::rpc_registry_service::RpcMethod;
use crate::service::wallet_lock_service::WalletLockManager;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Submitted { transaction_hash: String },
    Skipped { state: JobState },
}

pub struct AsyncTask {
    state: AppState,
    job: AsyncJobRecord,
    method: Arc<dyn RpcMethod>,
    wallets: WalletLockManager,
    config: TaskRunnerConfig,
}

impl AsyncTask {
    pub async fn load(
        state: AppState,
        job_id: &str,
        config: TaskRunnerConfig,
    ) -> Result<Self, JobError> {
        let job = match crud::get_async_job_record(&state, job_id).await {
            Ok(job) => job,
            Err(err) if err.is_not_found() => return Err(JobError::NotFound(job_id.to_string())),
            Err(err) => return Err(err.into()),
        };

        let params = &job.parameters;
        let method = state.registry.resolve(&params.rpc_method).ok_or_else(|| {
            JobError::InvalidParameters(format!("unknown rpc method {}", params.rpc_method))
        })?;
        if params.signing_wallet_id.trim().is_empty() {
            return Err(JobError::InvalidParameters(
                "signing_wallet_id is empty".to_string(),
            ));
        }
        let (min_args, max_args) = method.arity();
        let count = params.rpc_parameters.len();
        if count < min_args || count > max_args {
            return Err(JobError::InvalidParameters(format!(
                "{} takes {min_args}..={max_args} parameters, got {count}",
                params.rpc_method
            )));
        }

        let wallets = WalletLockManager::new(state.locks.clone(), config.wallet_lock_timeout);
        Ok(Self {
            state,
            job,
            method,
            wallets,
            config,
        })
    }

    pub async fn run(&self) -> Result<RunOutcome, JobError> {
        let job_id = &self.job.job_id;
        if self.job.state.is_in_flight_or_done() {
            info!(job_id = %job_id, state = self.job.state.as_str(), "job already submitted; skipping");
            return Ok(RunOutcome::Skipped {
                state: self.job.state,
            });
        }

        crud::record_last_try(&self.state, job_id, Utc::now().timestamp()).await?;

        let wallet_id = &self.job.parameters.signing_wallet_id;
        let Some(token) = self.wallets.acquire(wallet_id).await? else {
            metrics_service::inc_wallet_in_use();
            return Err(JobError::WalletInUse(wallet_id.clone()));
        };

        match self.submit(&token).await {
            Ok(outcome @ RunOutcome::Submitted { .. }) => Ok(outcome),
            Ok(outcome @ RunOutcome::Skipped { .. }) => {
                self.release_wallet(&token).await;
                Ok(outcome)
            }
            Err(err) => {
                warn!(job_id = %job_id, wallet_id = %wallet_id, error = %err, "job attempt failed; releasing wallet lock");
                self.release_wallet(&token).await;
                Err(err)
            }
        }
    }

    async fn release_wallet(&self, token: &str) {
        let job_id = &self.job.job_id;
        self.wallets
            .release(&self.job.parameters.signing_wallet_id, token)
            .await;
        if let Err(err) = crud::set_wallet_lock_token(&self.state, job_id, None).await {
            warn!(job_id = %job_id, error = %err.message, "wallet lock token not cleared");
        }
    }

    async fn submit(&self, token: &str) -> Result<RunOutcome, JobError> {
        let state = &self.state;
        let job_id = &self.job.job_id;
        let shipment_id = &self.job.shipment_id;
        let wallet_id = &self.job.parameters.signing_wallet_id;

        // Parameters may have been rewritten (vault hash coalescing) since load.
        let locked = crud::set_wallet_lock_token(state, job_id, Some(token.to_string())).await?;

        let prepared = self
            .method
            .build(state.gateway.as_ref(), &locked.parameters.rpc_parameters)
            .await?;
        if let Some(version) = &prepared.contract_version {
            crud::set_contract_version(state, shipment_id, version).await?;
        }

        let signed = state
            .gateway
            .sign_transaction(wallet_id, &prepared.unsigned_tx)
            .await?;
        crud::set_signed_tx(state, job_id, signed.signed_tx.clone()).await?;

        let now = Utc::now().timestamp();
        let created = crud::create_onchain_action(
            state,
            OnChainActionRecord {
                transaction_hash: signed.tx_hash.clone(),
                job_id: job_id.clone(),
                shipment_id: shipment_id.clone(),
                unsigned_tx: prepared.unsigned_tx,
                send_receipt: None,
                created_at: now,
                updated_at: now,
            },
        )
        .await?;
        if !created {
            metrics_service::inc_transaction_collisions();
            return Err(JobError::TransactionCollision(signed.tx_hash));
        }

        let receipt = state
            .gateway
            .send_transaction(&signed.signed_tx, &self.config.callback_url(job_id))
            .await?;
        crud::attach_send_receipt(state, &signed.tx_hash, receipt.clone()).await?;
        crud::upsert_transaction_receipt(
            state,
            TransactionReceiptRecord::from_engine(&signed.tx_hash, &receipt, Utc::now().timestamp()),
        )
        .await?;

        let transition =
            crud::transition_job_state_from(state, job_id, self.job.state, JobState::Running, None)
                .await?;
        if !transition.applied {
            info!(
                job_id = %job_id,
                transaction_hash = %signed.tx_hash,
                state = transition.from_state.as_str(),
                "job settled while the transaction was being sent"
            );
            return Ok(RunOutcome::Skipped {
                state: transition.from_state,
            });
        }
        metrics_service::inc_jobs_submitted();
        info!(
            job_id = %job_id,
            shipment_id = %shipment_id,
            transaction_hash = %signed.tx_hash,
            "transaction submitted"
        );
        Ok(RunOutcome::Submitted {
            transaction_hash: signed.tx_hash,
        })
    }
}
