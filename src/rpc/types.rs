//! Decoded payloads of the node RPC calls used by ReorgWatch.

use crate::pow::HeaderFields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 1.0 request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: &'a str,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Value,
}

/// Structured error object most nodes return.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Subset of `getblockchaininfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainInfo {
    #[serde(default)]
    pub chain: String,
    pub blocks: u64,
    #[serde(default)]
    pub headers: u64,
    pub bestblockhash: String,
    #[serde(default)]
    pub chainwork: Option<String>,
}

/// Subset of `getnetworkinfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub subversion: String,
    #[serde(default)]
    pub connections: u64,
    #[serde(default = "default_true")]
    pub networkactive: bool,
}

fn default_true() -> bool {
    true
}

/// One entry of `getpeerinfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    #[serde(default)]
    pub id: u64,
    pub addr: String,
    #[serde(default)]
    pub inbound: bool,
    #[serde(default)]
    pub subver: String,
    #[serde(default)]
    pub synced_headers: Option<i64>,
}

/// Verbose `getrawtransaction` result, also used for inlined block transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<Value>,
    #[serde(default)]
    pub vout: Vec<Value>,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub time: Option<i64>,
}

/// A block's transaction list entry: a bare txid at verbosity 1, the full body at 2.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BlockTx {
    Full(RawTransaction),
    Id(String),
}

impl BlockTx {
    pub fn txid(&self) -> &str {
        match self {
            BlockTx::Full(tx) => &tx.txid,
            BlockTx::Id(txid) => txid,
        }
    }
}

/// `getblock` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub hash: String,
    pub height: u64,
    pub version: i64,
    #[serde(default)]
    pub version_hex: Option<String>,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: u32,
    pub nonce: u32,
    pub bits: String,
    #[serde(default)]
    pub chainwork: String,
    #[serde(rename = "previousblockhash", default)]
    pub previous_block_hash: Option<String>,
    #[serde(default)]
    pub tx: Vec<BlockTx>,
}

impl RpcBlock {
    pub fn header_fields(&self) -> HeaderFields {
        let version = self
            .version_hex
            .as_deref()
            .and_then(|v| u32::from_str_radix(v, 16).ok())
            .unwrap_or(self.version as u32);

        HeaderFields {
            version,
            previous_block_hash: self.previous_block_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            time: self.time,
            bits: self.bits.clone(),
            nonce: self.nonce,
        }
    }

    /// The inlined coinbase transaction, present only at verbosity 2.
    pub fn coinbase(&self) -> Option<&RawTransaction> {
        match self.tx.first() {
            Some(BlockTx::Full(tx)) => Some(tx),
            _ => None,
        }
    }
}
