pub mod dispatch_service;
pub mod engine_auth_service;
pub mod hash_service;
pub mod listener_service;
pub mod lock_service;
pub mod message_service;
pub mod metrics_service;
pub mod queue_service;
pub mod rpc_gateway_service;
pub mod rpc_registry_service;
pub mod task_runner_service;
pub mod validation_service;
pub mod vault_hash_service;
pub mod wallet_lock_service;
