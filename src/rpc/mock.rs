//! In-process stand-in for a full node.
//!
//! [`MockNode`] answers the RPC methods ReorgWatch issues from a scripted
//! chain, so sync, tracking and peer control can be exercised without a
//! running daemon. Block hashes are derived from `(fork_id, height)`, which
//! lets two mocks share a prefix and diverge at a chosen height.

use super::{ChainRpc, PeerInfo, RawTransaction};
use crate::error::{ReorgError, Result, RPC_INVALID_ADDRESS_OR_KEY, RPC_INVALID_PARAMETER};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// 2025-09-04T00:00:00Z
pub const MOCK_TIME_BASE: u32 = 1_756_944_000;
/// Seconds between consecutive mock blocks.
pub const MOCK_BLOCK_INTERVAL: u32 = 150;
pub const MOCK_BITS: &str = "1e0ffff0";

const RPC_METHOD_NOT_FOUND: i64 = -32601;
const RPC_CLIENT_NODE_NOT_CONNECTED: i64 = -29;

#[derive(Debug, Clone)]
struct MockBlock {
    hash: String,
    height: u64,
    fork_id: u16,
    prev_hash: Option<String>,
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Default)]
struct MockState {
    chain: Vec<MockBlock>,
    mempool: BTreeMap<String, RawTransaction>,
    peers: Vec<String>,
    offline: bool,
    failing: HashSet<String>,
    /// Successful calls left before the method starts failing.
    fail_after: HashMap<String, usize>,
    broadcast_rejection: Option<(i64, String)>,
    calls: Vec<String>,
}

pub struct MockNode {
    label: String,
    state: Mutex<MockState>,
}

impl MockNode {
    /// A node holding only the genesis block.
    pub fn new(label: &str) -> Self {
        Self::with_chain(label, 0)
    }

    /// A node whose active chain runs from genesis to `tip` on fork 0.
    pub fn with_chain(label: &str, tip: u64) -> Self {
        let node = Self {
            label: label.to_string(),
            state: Mutex::new(MockState::default()),
        };
        {
            let mut state = node.state();
            for height in 0..=tip {
                let block = node.make_block(&state.chain, height, 0);
                state.chain.push(block);
            }
        }
        node
    }

    /// Deterministic block hash for `height` on fork `fork_id`.
    pub fn block_hash_for(fork_id: u16, height: u64) -> String {
        format!("{:04x}{:060x}", fork_id, height)
    }

    /// Deterministic txid a broadcast of `raw_tx` is assigned.
    pub fn txid_for_raw(raw_tx: &str) -> String {
        let mut words = [0xcbf2_9ce4_8422_2325u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word ^= i as u64;
            for byte in raw_tx.bytes() {
                *word ^= byte as u64;
                *word = word.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }
        words.iter().map(|w| format!("{:016x}", w)).collect()
    }

    /// A plain spend transaction suitable for [`MockNode::include_transaction`].
    pub fn sample_transaction(txid: &str) -> RawTransaction {
        RawTransaction {
            txid: txid.to_string(),
            vin: vec![json!({"txid": "5a".repeat(32), "vout": 0, "sequence": 4294967294u32})],
            vout: vec![json!({
                "value": 0.5,
                "n": 0,
                "scriptPubKey": {"address": "rltc1qmockaddress", "type": "witness_v0_keyhash"}
            })],
            blockhash: None,
            confirmations: None,
            time: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn make_block(&self, chain: &[MockBlock], height: u64, fork_id: u16) -> MockBlock {
        let hash = Self::block_hash_for(fork_id, height);
        let message = format!("/{} fork {}/", self.label, fork_id);
        let coinbase = RawTransaction {
            txid: format!("c0{:02x}{:060x}", fork_id as u8, height),
            vin: vec![json!({
                "coinbase": format!("0100ff{}", hex::encode(message)),
                "sequence": 4294967295u32
            })],
            vout: vec![json!({"value": 12.5, "n": 0})],
            blockhash: None,
            confirmations: None,
            time: None,
        };

        MockBlock {
            hash,
            height,
            fork_id,
            prev_hash: height
                .checked_sub(1)
                .and_then(|h| chain.get(h as usize))
                .map(|b| b.hash.clone()),
            transactions: vec![coinbase],
        }
    }

    /// Mine `count` more blocks on top of the current tip.
    pub fn extend(&self, count: u64) {
        let mut state = self.state();
        let fork_id = state.chain.last().map(|b| b.fork_id).unwrap_or(0);
        for _ in 0..count {
            let height = state.chain.len() as u64;
            let block = self.make_block(&state.chain, height, fork_id);
            state.chain.push(block);
        }
    }

    /// Replace every block from `height` upward with a fork `fork_id` branch ending at `new_tip`.
    pub fn fork_at(&self, height: u64, fork_id: u16, new_tip: u64) {
        let mut state = self.state();
        state.chain.truncate(height as usize);
        for h in height..=new_tip {
            let block = self.make_block(&state.chain, h, fork_id);
            state.chain.push(block);
        }
    }

    /// Place `tx` in the active block at `height`, removing it from the mempool.
    pub fn include_transaction(&self, height: u64, tx: RawTransaction) {
        let mut state = self.state();
        state.mempool.remove(&tx.txid);
        if let Some(block) = state.chain.get_mut(height as usize) {
            block.transactions.push(tx);
        }
    }

    pub fn add_mempool_transaction(&self, tx: RawTransaction) {
        self.state().mempool.insert(tx.txid.clone(), tx);
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make `method` fail with a transport error.
    pub fn fail_method(&self, method: &str) {
        self.state().failing.insert(method.to_string());
    }

    /// Let `method` succeed `successes` more times, then fail like [`MockNode::fail_method`].
    pub fn fail_method_after(&self, method: &str, successes: usize) {
        self.state().fail_after.insert(method.to_string(), successes);
    }

    pub fn restore_method(&self, method: &str) {
        let mut state = self.state();
        state.failing.remove(method);
        state.fail_after.remove(method);
    }

    /// Reject every `sendrawtransaction` with the given node error.
    pub fn reject_broadcasts(&self, code: i64, message: &str) {
        self.state().broadcast_rejection = Some((code, message.to_string()));
    }

    pub fn add_peer(&self, addr: &str) {
        let mut state = self.state();
        if !state.peers.iter().any(|p| p == addr) {
            state.peers.push(addr.to_string());
        }
    }

    pub fn peers(&self) -> Vec<String> {
        self.state().peers.clone()
    }

    pub fn tip_height(&self) -> u64 {
        self.state().chain.len().saturating_sub(1) as u64
    }

    pub fn block_hash(&self, height: u64) -> Option<String> {
        self.state().chain.get(height as usize).map(|b| b.hash.clone())
    }

    pub fn in_mempool(&self, txid: &str) -> bool {
        self.state().mempool.contains_key(txid)
    }

    /// Methods called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state().calls.iter().filter(|c| c.as_str() == method).count()
    }

    fn unreachable(&self, method: &str) -> ReorgError {
        ReorgError::Transport(format!("{}: connection refused during {}", self.label, method))
    }
}

fn param_str(params: &[Value], index: usize) -> Result<String> {
    params
        .get(index)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ReorgError::Rpc {
            code: RPC_INVALID_PARAMETER,
            message: format!("Expected string parameter at position {}", index),
        })
}

fn chainwork_at(height: u64) -> String {
    format!("{:064x}", (height + 1) * 2)
}

fn block_json(block: &MockBlock, verbosity: u64, tip: u64) -> Value {
    let txs: Vec<Value> = if verbosity >= 2 {
        block.transactions.iter().map(|tx| json!(tx)).collect()
    } else {
        block.transactions.iter().map(|tx| json!(tx.txid)).collect()
    };

    let mut value = json!({
        "hash": block.hash,
        "confirmations": tip.saturating_sub(block.height) + 1,
        "height": block.height,
        "version": 536870912u32,
        "versionHex": "20000000",
        "merkleroot": format!("{:04x}{:060x}", 0xeeee - block.fork_id as u32, block.height),
        "time": MOCK_TIME_BASE + block.height as u32 * MOCK_BLOCK_INTERVAL + block.fork_id as u32,
        "nonce": block.height as u32,
        "bits": MOCK_BITS,
        "chainwork": chainwork_at(block.height),
        "nTx": block.transactions.len(),
        "tx": txs,
    });
    if let Some(prev) = &block.prev_hash {
        value["previousblockhash"] = json!(prev);
    }
    value
}

#[async_trait]
impl ChainRpc for MockNode {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut state = self.state();
        state.calls.push(method.to_string());
        if state.offline || state.failing.contains(method) {
            return Err(self.unreachable(method));
        }
        if let Some(remaining) = state.fail_after.get_mut(method) {
            if *remaining == 0 {
                return Err(self.unreachable(method));
            }
            *remaining -= 1;
        }

        let tip = state.chain.len().saturating_sub(1) as u64;
        match method {
            "getblockcount" => Ok(json!(tip)),
            "getblockchaininfo" => {
                let best = state.chain.last().map(|b| b.hash.clone()).unwrap_or_default();
                Ok(json!({
                    "chain": "regtest",
                    "blocks": tip,
                    "headers": tip,
                    "bestblockhash": best,
                    "chainwork": chainwork_at(tip),
                }))
            }
            "getnetworkinfo" => Ok(json!({
                "version": 210300,
                "subversion": "/LitecoinCore:0.21.3/",
                "connections": state.peers.len(),
                "networkactive": true,
            })),
            "getpeerinfo" => {
                let peers: Vec<PeerInfo> = state
                    .peers
                    .iter()
                    .enumerate()
                    .map(|(id, addr)| PeerInfo {
                        id: id as u64,
                        addr: addr.clone(),
                        inbound: false,
                        subver: "/LitecoinCore:0.21.3/".to_string(),
                        synced_headers: Some(tip as i64),
                    })
                    .collect();
                Ok(json!(peers))
            }
            "getblockhash" => {
                let height = params.first().and_then(|v| v.as_u64()).unwrap_or(u64::MAX);
                state
                    .chain
                    .get(height as usize)
                    .map(|b| json!(b.hash))
                    .ok_or_else(|| ReorgError::Rpc {
                        code: RPC_INVALID_PARAMETER,
                        message: "Block height out of range".to_string(),
                    })
            }
            "getblock" => {
                let hash = param_str(&params, 0)?;
                let verbosity = params.get(1).and_then(|v| v.as_u64()).unwrap_or(1);
                state
                    .chain
                    .iter()
                    .find(|b| b.hash == hash)
                    .map(|b| block_json(b, verbosity, tip))
                    .ok_or_else(|| ReorgError::Rpc {
                        code: RPC_INVALID_ADDRESS_OR_KEY,
                        message: "Block not found".to_string(),
                    })
            }
            "getrawtransaction" => {
                let txid = param_str(&params, 0)?;
                let verbose = params.get(1).and_then(|v| v.as_bool()).unwrap_or(false);

                let found = state.mempool.get(&txid).cloned().or_else(|| {
                    state.chain.iter().find_map(|block| {
                        block.transactions.iter().find(|tx| tx.txid == txid).map(|tx| {
                            let mut tx = tx.clone();
                            tx.blockhash = Some(block.hash.clone());
                            tx.confirmations = Some(tip - block.height + 1);
                            tx.time = Some(
                                (MOCK_TIME_BASE + block.height as u32 * MOCK_BLOCK_INTERVAL) as i64,
                            );
                            tx
                        })
                    })
                });

                match found {
                    Some(tx) if verbose => Ok(json!(tx)),
                    Some(tx) => Ok(json!(format!("02000000{}", tx.txid))),
                    None => Err(ReorgError::Rpc {
                        code: RPC_INVALID_ADDRESS_OR_KEY,
                        message: "No such mempool or blockchain transaction. Use gettransaction for wallet transactions.".to_string(),
                    }),
                }
            }
            "sendrawtransaction" => {
                let raw_tx = param_str(&params, 0)?;
                if let Some((code, message)) = state.broadcast_rejection.clone() {
                    return Err(ReorgError::Rpc { code, message });
                }
                let txid = Self::txid_for_raw(&raw_tx);
                state
                    .mempool
                    .insert(txid.clone(), Self::sample_transaction(&txid));
                Ok(json!(txid))
            }
            "addnode" => {
                let addr = param_str(&params, 0)?;
                let command = param_str(&params, 1)?;
                match command.as_str() {
                    "add" | "onetry" => {
                        if !state.peers.contains(&addr) {
                            state.peers.push(addr);
                        }
                        Ok(Value::Null)
                    }
                    "remove" => {
                        state.peers.retain(|p| p != &addr);
                        Ok(Value::Null)
                    }
                    other => Err(ReorgError::Rpc {
                        code: RPC_INVALID_PARAMETER,
                        message: format!("Unknown addnode command {}", other),
                    }),
                }
            }
            "disconnectnode" => {
                let addr = param_str(&params, 0)?;
                if state.peers.contains(&addr) {
                    state.peers.retain(|p| p != &addr);
                    Ok(Value::Null)
                } else {
                    Err(ReorgError::Rpc {
                        code: RPC_CLIENT_NODE_NOT_CONNECTED,
                        message: "Node not found in connected nodes".to_string(),
                    })
                }
            }
            other => Err(ReorgError::Rpc {
                code: RPC_METHOD_NOT_FOUND,
                message: format!("Method not found: {}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::VERBOSITY_FULL;

    #[tokio::test]
    async fn test_chain_queries() {
        let node = MockNode::with_chain("private", 10);
        assert_eq!(node.get_block_count().await.unwrap(), 10);

        let hash = node.get_block_hash(7).await.unwrap();
        assert_eq!(hash, MockNode::block_hash_for(0, 7));

        let block = node.get_block(&hash, VERBOSITY_FULL).await.unwrap();
        assert_eq!(block.height, 7);
        assert_eq!(block.previous_block_hash, Some(MockNode::block_hash_for(0, 6)));
        assert!(block.coinbase().is_some());

        let err = node.get_block_hash(11).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fork_shares_prefix() {
        let a = MockNode::with_chain("a", 20);
        let b = MockNode::with_chain("b", 20);
        b.fork_at(15, 1, 22);

        assert_eq!(a.block_hash(14), b.block_hash(14));
        assert_ne!(a.block_hash(15), b.block_hash(15));
        assert_eq!(b.tip_height(), 22);

        let block = b.get_block(&MockNode::block_hash_for(1, 15), 1).await.unwrap();
        assert_eq!(block.previous_block_hash, a.block_hash(14));
    }

    #[tokio::test]
    async fn test_transactions_and_broadcast() {
        let node = MockNode::with_chain("public", 5);
        let txid = "ab".repeat(32);
        node.include_transaction(3, MockNode::sample_transaction(&txid));

        let tx = node.get_raw_transaction(&txid).await.unwrap();
        assert_eq!(tx.blockhash, node.block_hash(3));
        assert_eq!(tx.confirmations, Some(3));

        let err = node.get_raw_transaction(&"cd".repeat(32)).await.unwrap_err();
        assert!(err.is_not_found());

        let sent = node.send_raw_transaction("0200aa").await.unwrap();
        assert_eq!(sent, MockNode::txid_for_raw("0200aa"));
        assert_eq!(sent.len(), 64);
        assert!(node.in_mempool(&sent));
    }

    #[tokio::test]
    async fn test_peer_commands() {
        let node = MockNode::new("private");
        node.add_node("public:19335", "onetry").await.unwrap();
        node.add_node("public:19335", "onetry").await.unwrap();
        assert_eq!(node.get_peer_info().await.unwrap().len(), 1);

        node.disconnect_node("public:19335").await.unwrap();
        let err = node.disconnect_node("public:19335").await.unwrap_err();
        assert!(matches!(err, ReorgError::Rpc { code: -29, .. }));
    }

    #[tokio::test]
    async fn test_offline_and_failing_methods() {
        let node = MockNode::with_chain("private", 3);
        node.fail_method("getblock");
        assert!(node.get_block_count().await.is_ok());
        assert!(node
            .get_block(&MockNode::block_hash_for(0, 1), 2)
            .await
            .unwrap_err()
            .is_transport());

        node.set_offline(true);
        assert!(node.get_block_count().await.unwrap_err().is_transport());
        assert_eq!(node.call_count("getblockcount"), 2);
    }

    #[tokio::test]
    async fn test_fail_method_after_successes() {
        let node = MockNode::with_chain("public", 3);
        node.fail_method_after("getblockhash", 2);

        assert!(node.get_block_hash(1).await.is_ok());
        assert!(node.get_block_hash(2).await.is_ok());
        assert!(node.get_block_hash(3).await.unwrap_err().is_transport());
        assert!(node.get_block_hash(3).await.unwrap_err().is_transport());

        node.restore_method("getblockhash");
        assert!(node.get_block_hash(3).await.is_ok());
    }
}
