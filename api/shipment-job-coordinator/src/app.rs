use crate::config::environment::AppConfig;
use crate::infra::InfraClients;
use crate::module::async_job::crud::AsyncJobStore;
use crate::module::async_job::route::register_routes;
use crate::service::lock_service::LockService;
use crate::service::queue_service::LocalQueue;
use crate::service::rpc_gateway_service::{EngineGateway, EngineRpcClient};
use crate::service::rpc_registry_service::RpcMethodRegistry;
use axum::Router;
use axum::http::{HeaderValue, Method};
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<AsyncJobStore>,
    pub infra: Option<InfraClients>,
    pub locks: LockService,
    pub gateway: Arc<dyn EngineGateway>,
    pub registry: Arc<RpcMethodRegistry>,
    pub local_queue: Arc<Mutex<LocalQueue>>,
}

impl AppState {
    pub fn new(config: AppConfig, infra: Option<InfraClients>) -> Result<Self, String> {
        let gateway = EngineRpcClient::from_config(&config)?;
        Ok(Self::with_engine(
            config,
            infra,
            Arc::new(gateway),
            RpcMethodRegistry::with_engine_methods(),
        ))
    }

    pub fn with_engine(
        config: AppConfig,
        infra: Option<InfraClients>,
        gateway: Arc<dyn EngineGateway>,
        registry: RpcMethodRegistry,
    ) -> Self {
        Self {
            locks: LockService::from_infra(infra.as_ref()),
            config,
            store: Arc::new(AsyncJobStore::default()),
            infra,
            gateway,
            registry: Arc::new(registry),
            local_queue: Arc::new(Mutex::new(LocalQueue::default())),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    register_routes(state).layer(cors)
}
