#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use shipment_job_coordinator::app::AppState;
use shipment_job_coordinator::config::environment::AppConfig;
use shipment_job_coordinator::config::jobs::TaskRunnerConfig;
use shipment_job_coordinator::module::async_job::model::AsyncJobRecord;
use shipment_job_coordinator::service::listener_service::{RpcJobRequest, rpc_job_for_listener};
use shipment_job_coordinator::service::rpc_gateway_service::{EngineGateway, RpcError};
use shipment_job_coordinator::service::rpc_registry_service::{EngineTxMethod, RpcMethodRegistry};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_METHOD: &str = "m";

pub fn test_config() -> AppConfig {
    AppConfig {
        rust_env: "test".to_string(),
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        redis_url: None,
        worker_enabled: false,
        worker_poll_seconds: 1,
        worker_max_retries: 3,
        worker_backoff_base_seconds: 3,
        worker_backoff_max_seconds: 60,
        engine_rpc_url: "http://127.0.0.1:2000".to_string(),
        engine_rpc_timeout_seconds: 5,
        internal_url: "http://127.0.0.1:8000".to_string(),
        wallet_lock_timeout_seconds: 300,
        task_lock_ttl_seconds: 600,
        wallet_in_use_retry_seconds: 30,
        tx_collision_retry_seconds: 60,
        vault_hash_rate_limit_minutes: 5,
        engine_auth_enabled: false,
        engine_auth_secret: None,
    }
}

/// Scripted Engine: builds echo their params, signatures get sequential hashes.
#[derive(Default)]
pub struct MockEngine {
    pub build_calls: AtomicUsize,
    pub sign_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub calls: Mutex<Vec<(String, Value)>>,
    build_delay: Mutex<Option<Duration>>,
    sign_error: Mutex<Option<RpcError>>,
    send_error: Mutex<Option<RpcError>>,
    fixed_hash: Mutex<Option<String>>,
    next_hash: AtomicU64,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_build_delay(&self, delay: Duration) {
        *self.build_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_sign(&self, err: RpcError) {
        *self.sign_error.lock().unwrap() = Some(err);
    }

    pub fn fail_send(&self, err: RpcError) {
        *self.send_error.lock().unwrap() = Some(err);
    }

    pub fn fix_hash(&self, hash: &str) {
        *self.fixed_hash.lock().unwrap() = Some(hash.to_string());
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl EngineGateway for MockEngine {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        match method {
            "transaction.sign" => {
                self.sign_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(err) = self.sign_error.lock().unwrap().clone() {
                    return Err(err);
                }
                let n = self.next_hash.fetch_add(1, Ordering::SeqCst) + 1;
                let hash = self
                    .fixed_hash
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| tx_hash(n));
                Ok(json!({
                    "success": true,
                    "transaction": {"raw": format!("0xsigned{n}")},
                    "hash": hash,
                }))
            }
            "transaction.send" => {
                self.send_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(err) = self.send_error.lock().unwrap().clone() {
                    return Err(err);
                }
                Ok(json!({
                    "success": true,
                    "receipt": {"from": "0x00000000000000000000000000000000000000aa", "status": null},
                }))
            }
            _ => {
                self.build_calls.fetch_add(1, Ordering::SeqCst);
                let delay = *self.build_delay.lock().unwrap();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(json!({
                    "success": true,
                    "transaction": {"method": method, "params": params},
                    "contractVersion": "1.2.0",
                }))
            }
        }
    }
}

pub fn tx_hash(n: u64) -> String {
    format!("0x{n:064x}")
}

pub fn test_registry() -> RpcMethodRegistry {
    let mut registry = RpcMethodRegistry::with_engine_methods();
    registry.register(TEST_METHOD, EngineTxMethod::new("test.m", &["a", "b"]));
    registry
}

pub fn test_state(engine: &Arc<MockEngine>) -> AppState {
    test_state_with(test_config(), engine)
}

pub fn test_state_with(config: AppConfig, engine: &Arc<MockEngine>) -> AppState {
    let gateway: Arc<dyn EngineGateway> = engine.clone();
    AppState::with_engine(config, None, gateway, test_registry())
}

pub fn runner_config(state: &AppState) -> TaskRunnerConfig {
    TaskRunnerConfig::from_app(&state.config)
}

pub async fn create_job(
    state: &AppState,
    shipment_id: &str,
    wallet_id: &str,
    delay_minutes: i64,
) -> AsyncJobRecord {
    rpc_job_for_listener(
        state,
        RpcJobRequest {
            shipment_id: shipment_id.to_string(),
            rpc_method: TEST_METHOD.to_string(),
            rpc_parameters: vec![json!(1), json!(2)],
            signing_wallet_id: wallet_id.to_string(),
            delay_minutes,
        },
    )
    .await
    .expect("job created")
}
