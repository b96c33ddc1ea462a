use crate::service::lock_service::LockError;
use crate::service::rpc_gateway_service::RpcError;
use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }
}

/// Failure of one job attempt, classified by how the dispatcher recovers.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("wallet {0} is in use by another job")]
    WalletInUse(String),

    #[error("transaction {0} already recorded; retry later to get another nonce")]
    TransactionCollision(String),

    #[error("engine rpc failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("async job {0} not found")]
    NotFound(String),

    #[error("invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error("lock backend failed: {0}")]
    Lock(#[from] LockError),

    #[error("job store failed: {code}: {message}")]
    Store { code: &'static str, message: String },
}

impl From<AppError> for JobError {
    fn from(err: AppError) -> Self {
        Self::Store {
            code: err.code,
            message: err.message,
        }
    }
}
