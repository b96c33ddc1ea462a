use crate::config::environment::AppConfig;
use crate::service::hash_service::normalize_tx_hash;
use crate::service::metrics_service;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

pub const ENGINE_SIGN_METHOD: &str = "transaction.sign";
pub const ENGINE_SEND_METHOD: &str = "transaction.send";

const JSONRPC_VERSION: &str = "2.0";
const INVALID_RESPONSE: &str = "Invalid response from Engine";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    #[error("engine unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("engine error {code}: {message}")]
    RemoteError { code: i64, message: String },

    #[error("engine protocol error: {0}")]
    ProtocolError(String),
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub signed_tx: Value,
    pub tx_hash: String,
}

/// JSON-RPC access to the Engine.
///
/// Implementors provide `call`; the signing and submission helpers layer the
/// Engine's `{"success": true, ..}` contract on top of it.
#[async_trait]
pub trait EngineGateway: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    async fn sign_transaction(
        &self,
        wallet_id: &str,
        unsigned_tx: &Value,
    ) -> Result<SignedTransaction, RpcError> {
        let result = self
            .call(
                ENGINE_SIGN_METHOD,
                json!({ "signerId": wallet_id, "txUnsigned": unsigned_tx }),
            )
            .await?;
        let signed_tx = expect_success(&result, "transaction")?;
        let raw_hash = result
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::ProtocolError(INVALID_RESPONSE.to_string()))?;
        let tx_hash = normalize_tx_hash(raw_hash).map_err(RpcError::ProtocolError)?;
        Ok(SignedTransaction { signed_tx, tx_hash })
    }

    async fn send_transaction(
        &self,
        signed_tx: &Value,
        callback_url: &str,
    ) -> Result<Value, RpcError> {
        let result = self
            .call(
                ENGINE_SEND_METHOD,
                json!({ "txSigned": signed_tx, "callbackUrl": callback_url }),
            )
            .await?;
        expect_success(&result, "receipt")
    }
}

/// Returns `result[key]` when the Engine reported `success: true` alongside it.
pub fn expect_success(result: &Value, key: &str) -> Result<Value, RpcError> {
    let succeeded = result.get("success").and_then(Value::as_bool) == Some(true);
    match result.get(key) {
        Some(v) if succeeded && !v.is_null() => Ok(v.clone()),
        _ => Err(RpcError::ProtocolError(INVALID_RESPONSE.to_string())),
    }
}

pub fn parse_envelope(body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(-32000);
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| err.to_string());
        return Err(RpcError::RemoteError { code, message });
    }
    match body.get("result") {
        Some(result) if result.is_object() => Ok(result.clone()),
        Some(_) => Err(RpcError::ProtocolError(
            "engine result is not an object".to_string(),
        )),
        None => Err(RpcError::ProtocolError(
            "engine response has neither result nor error".to_string(),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct EngineRpcClient {
    http: Client,
    url: String,
}

impl EngineRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("engine http client init failed: {e}"))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, String> {
        Self::new(
            config.engine_rpc_url.clone(),
            Duration::from_secs(config.engine_rpc_timeout_seconds.max(1)),
        )
    }

    async fn post(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let payload = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": 0,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RpcError::ServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(RpcError::ServiceUnavailable(format!(
                "engine answered http {status}"
            )));
        }
        let body: Value = response.json().await.map_err(|e| {
            RpcError::ProtocolError(format!("undecodable engine response (http {status}): {e}"))
        })?;
        parse_envelope(body)
    }
}

#[async_trait]
impl EngineGateway for EngineRpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let started = Instant::now();
        let outcome = self.post(method, params).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        metrics_service::record_rpc_call(method, elapsed_ms, outcome.is_err());
        debug!(method = %method, elapsed_ms, ok = outcome.is_ok(), "engine rpc call");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Value);

    #[async_trait]
    impl EngineGateway for Canned {
        async fn call(&self, _method: &str, _params: Value) -> Result<Value, RpcError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn error_envelope_becomes_remote_error() {
        let err = parse_envelope(json!({"error": {"code": -32601, "message": "no such method"}}))
            .unwrap_err();
        assert_eq!(
            err,
            RpcError::RemoteError {
                code: -32601,
                message: "no such method".to_string()
            }
        );
    }

    #[test]
    fn missing_result_is_protocol_error() {
        assert!(matches!(
            parse_envelope(json!({"jsonrpc": "2.0", "id": 0})),
            Err(RpcError::ProtocolError(_))
        ));
        assert!(matches!(
            parse_envelope(json!({"result": "ok"})),
            Err(RpcError::ProtocolError(_))
        ));
    }

    #[test]
    fn success_flag_is_required() {
        let result = json!({"success": false, "receipt": {}});
        assert_eq!(
            expect_success(&result, "receipt"),
            Err(RpcError::ProtocolError(INVALID_RESPONSE.to_string()))
        );
        let result = json!({"success": true});
        assert!(expect_success(&result, "receipt").is_err());
    }

    #[tokio::test]
    async fn sign_normalizes_returned_hash() {
        let gateway = Canned(json!({
            "success": true,
            "transaction": {"raw": "0xf86b"},
            "hash": format!("0x{}", "AB".repeat(32)),
        }));
        let signed = gateway
            .sign_transaction("wallet-1", &json!({"nonce": 1}))
            .await
            .unwrap();
        assert_eq!(signed.tx_hash, format!("0x{}", "ab".repeat(32)));
        assert_eq!(signed.signed_tx, json!({"raw": "0xf86b"}));
    }

    #[tokio::test]
    async fn sign_rejects_malformed_hash() {
        let gateway = Canned(json!({"success": true, "transaction": {}, "hash": "0x12"}));
        assert!(matches!(
            gateway.sign_transaction("wallet-1", &json!({})).await,
            Err(RpcError::ProtocolError(_))
        ));
    }
}
