use crate::module::async_job::error::AppError;
use crate::service::listener_service::RpcJobRequest;
use crate::service::rpc_registry_service::RpcMethodRegistry;
use crate::service::vault_hash_service::VaultHashUpdate;

pub fn validate_rpc_job(registry: &RpcMethodRegistry, req: &RpcJobRequest) -> Result<(), AppError> {
    if req.shipment_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_SHIPMENT_ID",
            "shipment_id is required",
        ));
    }
    if req.signing_wallet_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_SIGNING_WALLET",
            "signing_wallet_id is required",
        ));
    }
    if req.delay_minutes < 0 {
        return Err(AppError::bad_request(
            "INVALID_DELAY",
            "delay_minutes cannot be negative",
        ));
    }

    let Some(method) = registry.resolve(&req.rpc_method) else {
        return Err(AppError::bad_request(
            "UNKNOWN_RPC_METHOD",
            format!("rpc_method {:?} is not registered", req.rpc_method),
        ));
    };
    let (min_args, max_args) = method.arity();
    let count = req.rpc_parameters.len();
    if count < min_args || count > max_args {
        return Err(AppError::bad_request(
            "INVALID_RPC_PARAMETERS",
            format!(
                "{} takes {min_args}..={max_args} parameters, got {count}",
                req.rpc_method
            ),
        ));
    }
    Ok(())
}

pub fn validate_vault_hash_update(update: &VaultHashUpdate) -> Result<(), AppError> {
    if update.shipment_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_SHIPMENT_ID",
            "shipment_id is required",
        ));
    }
    if update.signing_wallet_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_SIGNING_WALLET",
            "signing_wallet_id is required",
        ));
    }
    if update.vault_hash.trim().is_empty() {
        return Err(AppError::bad_request(
            "INVALID_VAULT_HASH",
            "vault_hash is required",
        ));
    }
    Ok(())
}
