//! Ledger records: blocks seen on either node, tracked transactions and
//! the linkage between them.

use crate::error::ReorgError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which of the two nodes a piece of data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Public,
    Private,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Private, Side::Public];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Public => "public",
            Side::Private => "private",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ReorgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Side::Public),
            "private" => Ok(Side::Private),
            other => Err(ReorgError::Validation(format!("Unknown side: {}", other))),
        }
    }
}

/// A block header as observed from one of the nodes. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub height: u64,
    pub hash: String,
    /// Parent hash, or `"genesis"` at height 0.
    pub prev_hash: String,
    pub coinbase_message: String,
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
    /// `HH:MM:SS`, UTC.
    pub time: String,
    pub scrypt_hash: String,
    /// log2 of the node-reported cumulative chainwork.
    pub chainwork: f64,
    /// Side whose sync first ingested this hash.
    pub first_seen_by: Side,
}

pub const GENESIS_PREV_HASH: &str = "genesis";
pub const DEFAULT_COLOR: &str = "blue";

/// A transaction under observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTransaction {
    pub txid: String,
    pub inputs: Vec<Value>,
    pub outputs: Vec<Value>,
    pub color: String,
    /// Node that supplied the inputs/outputs snapshot; `None` if neither knew the tx.
    pub snapshot_source: Option<Side>,
}

impl TrackedTransaction {
    pub fn pending(txid: &str, color: &str) -> Self {
        Self {
            txid: txid.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            color: color.to_string(),
            snapshot_source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInBlock {
    pub txid: String,
    pub block_hash: String,
}

/// A tracked transaction joined with every block it was found in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTransactionView {
    pub txid: String,
    pub color: String,
    pub blocks: Vec<String>,
    pub inputs: Vec<Value>,
    pub outputs: Vec<Value>,
    pub snapshot_source: Option<Side>,
}

impl TrackedTransactionView {
    /// Not yet linked to any block.
    pub fn is_pending(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightRange {
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: String,
    pub latest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryTotals {
    pub count: u64,
    pub height_range: Option<HeightRange>,
    pub date_range: Option<DateRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseGroup {
    pub count: u64,
    pub height_range: HeightRange,
}

/// Store-wide block statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksSummary {
    pub total: SummaryTotals,
    /// Blocks grouped by coinbase message, a rough proxy for which miner produced them.
    pub by_coinbase: BTreeMap<String, CoinbaseGroup>,
    pub by_side: BTreeMap<Side, SummaryTotals>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSummary {
    pub date: String,
    pub public_blocks: u64,
    pub private_blocks: u64,
    pub total_blocks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideStats {
    pub total_blocks: u64,
    pub min_height: Option<u64>,
    pub max_height: Option<u64>,
    pub height_span: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub public_network: SideStats,
    pub private_network: SideStats,
    pub total_transactions_tracked: u64,
    pub total_tx_block_links: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_round_trips_through_text() {
        for side in Side::BOTH {
            assert_eq!(side.as_str().parse::<Side>().unwrap(), side);
        }
        assert_eq!("PUBLIC".parse::<Side>().unwrap(), Side::Public);
        assert!("testnet".parse::<Side>().is_err());
    }

    #[test]
    fn test_block_serializes_camel_case() {
        let block = Block {
            height: 3,
            hash: "aa".repeat(32),
            prev_hash: GENESIS_PREV_HASH.to_string(),
            coinbase_message: "hi".to_string(),
            date: "2025-09-04".to_string(),
            time: "12:00:00".to_string(),
            scrypt_hash: "00".repeat(32),
            chainwork: 4.5,
            first_seen_by: Side::Private,
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["prevHash"], "genesis");
        assert_eq!(value["scryptHash"], "00".repeat(32));
        assert_eq!(value["firstSeenBy"], "private");
    }
}
