//! Startup-built table of the Engine transaction builders a job may name.

use crate::service::rpc_gateway_service::{EngineGateway, RpcError, expect_success};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const CREATE_SHIPMENT_TRANSACTION: &str = "create_shipment_transaction";
pub const SET_VAULT_HASH_TX: &str = "set_vault_hash_tx";
pub const SET_VAULT_URI_TX: &str = "set_vault_uri_tx";
pub const SET_CARRIER_TX: &str = "set_carrier_tx";
pub const SET_MODERATOR_TX: &str = "set_moderator_tx";

/// Position of the hash in `set_vault_hash_tx` parameters.
pub const VAULT_HASH_PARAM_INDEX: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTransaction {
    pub unsigned_tx: Value,
    pub contract_version: Option<String>,
}

#[async_trait]
pub trait RpcMethod: Send + Sync {
    async fn build(
        &self,
        gateway: &dyn EngineGateway,
        params: &[Value],
    ) -> Result<PreparedTransaction, RpcError>;

    /// Accepted positional parameter count, inclusive.
    fn arity(&self) -> (usize, usize);
}

/// Positional parameters mapped onto named Engine params, one Engine call.
#[derive(Debug, Clone)]
pub struct EngineTxMethod {
    engine_method: String,
    arg_names: Vec<String>,
    min_args: usize,
    records_contract_version: bool,
}

impl EngineTxMethod {
    pub fn new(engine_method: &str, arg_names: &[&str]) -> Self {
        Self {
            engine_method: engine_method.to_string(),
            arg_names: arg_names.iter().map(|s| s.to_string()).collect(),
            min_args: arg_names.len(),
            records_contract_version: false,
        }
    }

    pub fn with_min_args(mut self, min_args: usize) -> Self {
        self.min_args = min_args.min(self.arg_names.len());
        self
    }

    pub fn with_contract_version(mut self) -> Self {
        self.records_contract_version = true;
        self
    }
}

#[async_trait]
impl RpcMethod for EngineTxMethod {
    async fn build(
        &self,
        gateway: &dyn EngineGateway,
        params: &[Value],
    ) -> Result<PreparedTransaction, RpcError> {
        let mut named = Map::new();
        for (name, value) in self.arg_names.iter().zip(params.iter()) {
            named.insert(name.clone(), value.clone());
        }
        let result = gateway.call(&self.engine_method, Value::Object(named)).await?;
        let unsigned_tx = expect_success(&result, "transaction")?;
        let contract_version = if self.records_contract_version {
            let version = expect_success(&result, "contractVersion")?;
            Some(match version {
                Value::String(s) => s,
                other => other.to_string(),
            })
        } else {
            None
        };
        Ok(PreparedTransaction {
            unsigned_tx,
            contract_version,
        })
    }

    fn arity(&self) -> (usize, usize) {
        (self.min_args, self.arg_names.len())
    }
}

#[derive(Clone, Default)]
pub struct RpcMethodRegistry {
    methods: HashMap<String, Arc<dyn RpcMethod>>,
}

impl RpcMethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shipment contract builders exposed by the Engine's `load.*` namespace.
    pub fn with_engine_methods() -> Self {
        let mut registry = Self::new();
        registry.register(
            CREATE_SHIPMENT_TRANSACTION,
            EngineTxMethod::new(
                "load.create_shipment_tx",
                &["senderWallet", "shipmentUuid", "fundingType", "shipmentAmount"],
            )
            .with_min_args(2)
            .with_contract_version(),
        );
        registry.register(
            SET_VAULT_HASH_TX,
            EngineTxMethod::new("load.set_vault_hash_tx", &["senderWallet", "shipmentUuid", "hash"]),
        );
        registry.register(
            SET_VAULT_URI_TX,
            EngineTxMethod::new("load.set_vault_uri_tx", &["senderWallet", "shipmentUuid", "uri"]),
        );
        registry.register(
            SET_CARRIER_TX,
            EngineTxMethod::new(
                "load.set_carrier_tx",
                &["senderWallet", "shipmentUuid", "carrierWallet"],
            ),
        );
        registry.register(
            SET_MODERATOR_TX,
            EngineTxMethod::new(
                "load.set_moderator_tx",
                &["senderWallet", "shipmentUuid", "moderatorWallet"],
            ),
        );
        registry
    }

    pub fn register(&mut self, name: &str, method: impl RpcMethod + 'static) {
        self.methods.insert(name.to_string(), Arc::new(method));
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn RpcMethod>> {
        self.methods.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recording {
        calls: Mutex<Vec<(String, Value)>>,
        reply: Value,
    }

    #[async_trait]
    impl EngineGateway for Recording {
        async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn positional_params_become_named() {
        let gateway = Recording {
            calls: Mutex::new(Vec::new()),
            reply: json!({"success": true, "transaction": {"to": "0xc0ffee"}}),
        };
        let registry = RpcMethodRegistry::with_engine_methods();
        let method = registry.resolve(SET_VAULT_HASH_TX).unwrap();
        let prepared = method
            .build(&gateway, &[json!("w"), json!("s"), json!("0xhash")])
            .await
            .unwrap();
        assert_eq!(prepared.unsigned_tx, json!({"to": "0xc0ffee"}));
        assert_eq!(prepared.contract_version, None);
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls[0].0, "load.set_vault_hash_tx");
        assert_eq!(
            calls[0].1,
            json!({"senderWallet": "w", "shipmentUuid": "s", "hash": "0xhash"})
        );
    }

    #[tokio::test]
    async fn shipment_creation_requires_contract_version() {
        let gateway = Recording {
            calls: Mutex::new(Vec::new()),
            reply: json!({"success": true, "transaction": {}}),
        };
        let method = RpcMethodRegistry::with_engine_methods()
            .resolve(CREATE_SHIPMENT_TRANSACTION)
            .unwrap();
        assert_eq!(method.arity(), (2, 4));
        let err = method
            .build(&gateway, &[json!("w"), json!("s")])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ProtocolError(_)));
    }

    #[test]
    fn unknown_methods_do_not_resolve() {
        assert!(RpcMethodRegistry::with_engine_methods()
            .resolve("load.drop_tables")
            .is_none());
    }
}
