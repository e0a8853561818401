//! JSON-RPC access to a full node.
//!
//! [`ChainRpc`] is the capability the synchronizer, tracker and network
//! control are written against. Every typed call is a default method layered
//! on the single [`ChainRpc::call`] primitive, so a test double only has to
//! answer raw JSON the way a node would.

pub mod mock;
pub mod types;

use crate::config::NodeConfig;
use crate::error::{ReorgError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

pub use types::{
    BlockTx, BlockchainInfo, NetworkInfo, PeerInfo, RawTransaction, RpcBlock, RpcErrorObject,
    RpcRequest, RpcResponse,
};

const JSONRPC_VERSION: &str = "1.0";

/// `getblock` verbosity levels.
pub const VERBOSITY_TXIDS: u8 = 1;
pub const VERBOSITY_FULL: u8 = 2;

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| ReorgError::Serialization(format!("Unexpected {} result: {}", method, e)))
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Issue `method` with positional `params` and return the raw `result`.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value>;

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo> {
        decode("getblockchaininfo", self.call("getblockchaininfo", vec![]).await?)
    }

    async fn get_network_info(&self) -> Result<NetworkInfo> {
        decode("getnetworkinfo", self.call("getnetworkinfo", vec![]).await?)
    }

    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>> {
        decode("getpeerinfo", self.call("getpeerinfo", vec![]).await?)
    }

    async fn get_block_count(&self) -> Result<u64> {
        decode("getblockcount", self.call("getblockcount", vec![]).await?)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String> {
        decode("getblockhash", self.call("getblockhash", vec![json!(height)]).await?)
    }

    async fn get_block(&self, hash: &str, verbosity: u8) -> Result<RpcBlock> {
        decode(
            "getblock",
            self.call("getblock", vec![json!(hash), json!(verbosity)]).await?,
        )
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction> {
        decode(
            "getrawtransaction",
            self.call("getrawtransaction", vec![json!(txid), json!(true)])
                .await?,
        )
    }

    /// Serialized transaction hex (`verbose = false`).
    async fn get_raw_transaction_hex(&self, txid: &str) -> Result<String> {
        decode(
            "getrawtransaction",
            self.call("getrawtransaction", vec![json!(txid), json!(false)])
                .await?,
        )
    }

    /// Broadcast a signed transaction; returns its txid.
    async fn send_raw_transaction(&self, raw_tx: &str) -> Result<String> {
        decode(
            "sendrawtransaction",
            self.call("sendrawtransaction", vec![json!(raw_tx)]).await?,
        )
    }

    /// `addnode <addr> <command>` where command is `add`, `remove` or `onetry`.
    async fn add_node(&self, addr: &str, command: &str) -> Result<()> {
        self.call("addnode", vec![json!(addr), json!(command)])
            .await
            .map(|_| ())
    }

    async fn disconnect_node(&self, addr: &str) -> Result<()> {
        self.call("disconnectnode", vec![json!(addr)])
            .await
            .map(|_| ())
    }
}

/// HTTP(S) client bound to one node.
pub struct NodeRpcClient {
    url: String,
    user: String,
    password: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl NodeRpcClient {
    pub fn new(url: &str, user: &str, password: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ReorgError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        Self::new(
            &config.url(),
            &config.rpc_user,
            &config.rpc_password,
            config.timeout_duration()?,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn correlation_id(&self) -> String {
        format!("reorgwatch-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Turn a decoded response body into the call outcome.
///
/// The body is inspected before the HTTP status: nodes answer rejected
/// requests with 4xx/5xx codes and a structured `error` object.
pub(crate) fn interpret_response(status: u16, body: &str) -> Result<Value> {
    let response: RpcResponse = serde_json::from_str(body).map_err(|e| {
        ReorgError::Transport(format!("HTTP {} with undecodable body: {}", status, e))
    })?;

    if !response.error.is_null() {
        return Err(match serde_json::from_value::<RpcErrorObject>(response.error.clone()) {
            Ok(obj) => ReorgError::Rpc {
                code: obj.code,
                message: obj.message,
            },
            Err(_) => ReorgError::Rpc {
                code: 0,
                message: response.error.to_string(),
            },
        });
    }

    if !(200..300).contains(&status) {
        return Err(ReorgError::Transport(format!("HTTP {}", status)));
    }

    Ok(response.result)
}

#[async_trait]
impl ChainRpc for NodeRpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.correlation_id(),
            method,
            params,
        };
        debug!(url = %self.url, method, id = %request.id, "rpc call");

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        interpret_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_shape() {
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: "reorgwatch-1".to_string(),
            method: "getblockhash",
            params: vec![json!(5)],
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({"jsonrpc": "1.0", "id": "reorgwatch-1", "method": "getblockhash", "params": [5]})
        );
    }

    #[test]
    fn test_error_body_wins_over_status() {
        let body = r#"{"result":null,"error":{"code":-5,"message":"No such mempool or blockchain transaction"},"id":"x"}"#;
        let err = interpret_response(500, body).unwrap_err();
        assert!(err.is_not_found());
        match err {
            ReorgError::Rpc { code, message } => {
                assert_eq!(code, -5);
                assert!(message.starts_with("No such"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unstructured_error_is_kept_verbatim() {
        let err = interpret_response(200, r#"{"result":null,"error":"boom"}"#).unwrap_err();
        assert!(matches!(err, ReorgError::Rpc { code: 0, ref message } if message == "\"boom\""));
    }

    #[test]
    fn test_bad_status_without_error_is_transport() {
        let err = interpret_response(401, r#"{"result":null,"error":null}"#).unwrap_err();
        assert!(err.is_transport());

        let err = interpret_response(401, "Unauthorized").unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_success_returns_result() {
        let value = interpret_response(200, r#"{"result":105,"error":null,"id":"a"}"#).unwrap();
        assert_eq!(value, json!(105));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        let client = NodeRpcClient::new(
            "http://127.0.0.1:9",
            "admin",
            "admin",
            Duration::from_millis(500),
        )
        .unwrap();
        let err = client.get_block_count().await.unwrap_err();
        assert!(err.is_transport());
    }
}
