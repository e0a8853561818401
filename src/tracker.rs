//! Follows tracked transactions into blocks on either node.
//!
//! A lookup distinguishes "the node does not know this txid" from "the node
//! could not be asked"; both are per-transaction outcomes and never abort a
//! refresh. Linkage rows are only ever added.

use crate::error::{ReorgError, Result};
use crate::ledger::{Side, TxInBlock};
use crate::persistence::Database;
use crate::rpc::{ChainRpc, RawTransaction};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum TxLookup {
    Found(RawTransaction),
    NotFound,
    Failed(ReorgError),
}

impl TxLookup {
    pub fn found(self) -> Option<RawTransaction> {
        match self {
            TxLookup::Found(tx) => Some(tx),
            _ => None,
        }
    }
}

/// Ask one node about `txid`.
pub async fn lookup_transaction(rpc: &dyn ChainRpc, txid: &str) -> TxLookup {
    match rpc.get_raw_transaction(txid).await {
        Ok(tx) => TxLookup::Found(tx),
        Err(e) if e.is_not_found() => TxLookup::NotFound,
        Err(e) => TxLookup::Failed(e),
    }
}

/// Outcome of checking the tracked set against one node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackingReport {
    pub checked: usize,
    /// Linkage rows added by this refresh.
    pub linked: Vec<TxInBlock>,
    /// Known to the node but not yet mined.
    pub in_mempool: Vec<String>,
    pub unknown: Vec<String>,
    /// `(txid, error)` for lookups that could not be completed.
    pub failed: Vec<(String, String)>,
}

pub struct TransactionTracker {
    store: Arc<Database>,
}

impl TransactionTracker {
    pub fn new(store: Arc<Database>) -> Self {
        Self { store }
    }

    /// Record a block link for every tracked transaction `rpc` reports as mined.
    ///
    /// Only a store write failure fails the whole refresh.
    pub async fn refresh(
        &self,
        side: Side,
        rpc: &dyn ChainRpc,
        txids: &[String],
    ) -> Result<TrackingReport> {
        let mut report = TrackingReport {
            checked: txids.len(),
            ..Default::default()
        };

        for txid in txids {
            match lookup_transaction(rpc, txid).await {
                TxLookup::Found(tx) => match tx.blockhash {
                    Some(block_hash) => {
                        if self.store.link_transaction(txid, &block_hash)? {
                            debug!(side = %side, txid = %txid, block = %block_hash, "Linked transaction");
                            report.linked.push(TxInBlock {
                                txid: txid.clone(),
                                block_hash,
                            });
                        }
                    }
                    None => report.in_mempool.push(txid.clone()),
                },
                TxLookup::NotFound => report.unknown.push(txid.clone()),
                TxLookup::Failed(e) => {
                    warn!(side = %side, txid = %txid, "Transaction lookup failed: {}", e);
                    report.failed.push((txid.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Refresh every transaction currently in the tracked set.
    pub async fn refresh_all(&self, side: Side, rpc: &dyn ChainRpc) -> Result<TrackingReport> {
        let txids = self.store.tracked_txids()?;
        self.refresh(side, rpc, &txids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TrackedTransaction;
    use crate::rpc::mock::MockNode;

    fn tracked_store(txids: &[&str]) -> Arc<Database> {
        let store = Arc::new(Database::open_in_memory().unwrap());
        for txid in txids {
            store
                .upsert_tracked_transaction(&TrackedTransaction::pending(txid, "blue"))
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_lookup_classifies_outcomes() {
        let node = MockNode::with_chain("public", 3);
        let txid = "aa".repeat(32);
        node.include_transaction(2, MockNode::sample_transaction(&txid));

        assert!(matches!(lookup_transaction(&node, &txid).await, TxLookup::Found(_)));
        assert!(matches!(
            lookup_transaction(&node, &"bb".repeat(32)).await,
            TxLookup::NotFound
        ));

        node.set_offline(true);
        assert!(matches!(lookup_transaction(&node, &txid).await, TxLookup::Failed(_)));
    }

    #[tokio::test]
    async fn test_refresh_links_mined_transactions_once() {
        let mined = "aa".repeat(32);
        let pending = "bb".repeat(32);
        let missing = "cc".repeat(32);
        let store = tracked_store(&[&mined, &pending, &missing]);

        let node = MockNode::with_chain("private", 5);
        node.include_transaction(4, MockNode::sample_transaction(&mined));
        node.add_mempool_transaction(MockNode::sample_transaction(&pending));

        let tracker = TransactionTracker::new(store.clone());
        let report = tracker.refresh_all(Side::Private, &node).await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.linked.len(), 1);
        assert_eq!(report.linked[0].block_hash, node.block_hash(4).unwrap());
        assert_eq!(report.in_mempool, vec![pending.clone()]);
        assert_eq!(report.unknown, vec![missing.clone()]);

        let again = tracker.refresh_all(Side::Private, &node).await.unwrap();
        assert!(again.linked.is_empty());
        assert_eq!(store.linked_blocks(&mined).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_per_transaction() {
        let txid = "dd".repeat(32);
        let store = tracked_store(&[&txid]);
        let node = MockNode::with_chain("public", 2);
        node.fail_method("getrawtransaction");

        let tracker = TransactionTracker::new(store.clone());
        let report = tracker.refresh_all(Side::Public, &node).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(store.links().unwrap().is_empty());
    }
}
