//! Orchestration of both nodes, the ledger and peer control.
//!
//! Every operation here is self-contained: a failure on one node bounds the
//! result instead of blocking it, and only malformed input or an unusable
//! store fails a call outright.

use crate::config::{Config, NetworkControlConfig};
use crate::error::{ReorgError, Result};
use crate::ledger::{
    Block, BlocksSummary, DatabaseStats, DateSummary, Side, TrackedTransaction,
    TrackedTransactionView,
};
use crate::network::{fetch_tip, ChainTip, ConnectionStatus, DisconnectOutcome, NetworkControl};
use crate::persistence::Database;
use crate::rpc::{ChainRpc, NodeRpcClient, RawTransaction};
use crate::sync::{ChainSynchronizer, SyncContext, SyncReport, SyncStats};
use crate::tracker::{lookup_transaction, TrackingReport, TransactionTracker, TxLookup};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const MAX_COLOR_LEN: usize = 32;

/// Per-side result of a sync or tracking pass.
#[derive(Debug, Clone, Serialize)]
pub struct SideOutcome {
    pub side: Side,
    pub success: bool,
    pub blocks_inserted: usize,
    /// Blocks already stored from the other node that this node now also reports.
    pub blocks_adopted: usize,
    pub links_added: usize,
    pub error: Option<String>,
}

impl SideOutcome {
    fn new(side: Side) -> Self {
        Self {
            side,
            success: true,
            blocks_inserted: 0,
            blocks_adopted: 0,
            links_added: 0,
            error: None,
        }
    }

    fn record_sync(&mut self, result: Result<SyncReport>) {
        match result {
            Ok(report) => {
                self.blocks_inserted = report.inserted_count();
                self.blocks_adopted = report.adopted.len();
            }
            Err(e) => self.fail(e),
        }
    }

    fn record_tracking(&mut self, result: Result<TrackingReport>) {
        match result {
            Ok(report) => self.links_added = report.linked.len(),
            Err(e) => {
                warn!(side = %self.side, "Tracking refresh failed: {}", e);
                self.fail(e)
            }
        }
    }

    fn fail(&mut self, e: ReorgError) {
        self.success = false;
        let message = e.to_string();
        self.error = Some(match self.error.take() {
            Some(previous) => format!("{}; {}", previous, message),
            None => message,
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainTips {
    pub public: Option<ChainTip>,
    pub private: Option<ChainTip>,
}

/// Everything the visualization needs for one calendar date.
#[derive(Debug, Clone, Serialize)]
pub struct BlockchainData {
    pub date: String,
    pub chain_blocks: Vec<Block>,
    pub chain_tips: ChainTips,
    pub transactions: Vec<TrackedTransactionView>,
    pub sync: Vec<SideOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    /// Private node's view of its peers and tip.
    pub connection: ConnectionStatus,
    pub public_tip: Option<ChainTip>,
    pub summary: BlocksSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub txid: String,
    pub tracked: bool,
    pub tracking_error: Option<String>,
}

/// One node's view of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxSnapshot {
    pub blockhash: Option<String>,
    pub inputs: Vec<Value>,
    pub outputs: Vec<Value>,
}

impl From<RawTransaction> for TxSnapshot {
    fn from(tx: RawTransaction) -> Self {
        Self {
            blockhash: tx.blockhash,
            inputs: tx.vin,
            outputs: tx.vout,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TxInfo {
    pub txid: String,
    pub private: Option<TxSnapshot>,
    pub public: Option<TxSnapshot>,
}

/// Require a 64-character hex transaction id or block hash.
pub fn validate_txid(txid: &str) -> Result<()> {
    if txid.len() != 64 || !txid.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ReorgError::Validation(format!(
            "Expected 64 hex characters, got '{}'",
            txid
        )));
    }
    Ok(())
}

pub fn validate_raw_transaction(raw_tx: &str) -> Result<()> {
    if raw_tx.is_empty() {
        return Err(ReorgError::Validation("Raw transaction is empty".to_string()));
    }
    if raw_tx.len() % 2 != 0 || !raw_tx.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ReorgError::Validation(
            "Raw transaction must be even-length hex".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_color(color: &str) -> Result<()> {
    if color.trim().is_empty() || color.chars().count() > MAX_COLOR_LEN {
        return Err(ReorgError::Validation(format!(
            "Color must be 1 to {} characters",
            MAX_COLOR_LEN
        )));
    }
    Ok(())
}

/// Normalize `YYYY-MM-DD`; `None` means today (UTC).
pub fn resolve_date(date: Option<&str>) -> Result<String> {
    match date {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(|d| d.format("%Y-%m-%d").to_string())
            .map_err(|e| ReorgError::Validation(format!("Invalid date '{}': {}", date, e))),
        None => Ok(Utc::now().format("%Y-%m-%d").to_string()),
    }
}

async fn optional_tip(side: Side, rpc: &dyn ChainRpc) -> Option<ChainTip> {
    match fetch_tip(rpc).await {
        Ok(tip) => Some(tip),
        Err(e) => {
            warn!(side = %side, "Tip unavailable: {}", e);
            None
        }
    }
}

pub struct ReorgManager {
    public: Arc<dyn ChainRpc>,
    private: Arc<dyn ChainRpc>,
    store: Arc<Database>,
    synchronizer: ChainSynchronizer,
    tracker: TransactionTracker,
    network: NetworkControl,
    depth: u64,
}

impl ReorgManager {
    pub fn new(
        public: Arc<dyn ChainRpc>,
        private: Arc<dyn ChainRpc>,
        store: Arc<Database>,
        network: &NetworkControlConfig,
        depth: u64,
    ) -> Self {
        Self {
            synchronizer: ChainSynchronizer::new(store.clone()),
            tracker: TransactionTracker::new(store.clone()),
            network: NetworkControl::new(private.clone(), network),
            public,
            private,
            store,
            depth,
        }
    }

    /// Build RPC clients and open the store described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let public = Arc::new(NodeRpcClient::from_config(&config.public)?);
        let private = Arc::new(NodeRpcClient::from_config(&config.private)?);
        let store = Arc::new(Database::open(&config.database.path)?);

        info!(
            public = %public.url(),
            private = %private.url(),
            database = %config.database.path,
            depth = config.sync.depth,
            "Reorg manager ready"
        );

        Ok(Self::new(public, private, store, &config.network, config.sync.depth))
    }

    pub fn store(&self) -> &Arc<Database> {
        &self.store
    }

    fn rpc(&self, side: Side) -> &dyn ChainRpc {
        match side {
            Side::Public => self.public.as_ref(),
            Side::Private => self.private.as_ref(),
        }
    }

    fn sync_context(&self, side: Side) -> SyncContext<'_> {
        SyncContext {
            side,
            rpc: self.rpc(side),
            depth: self.depth,
        }
    }

    /// Sync both nodes, then refresh every tracked transaction against both.
    async fn sync_and_track(&self) -> Vec<SideOutcome> {
        let (private_sync, public_sync) = tokio::join!(
            self.synchronizer.sync_recent_blocks(self.sync_context(Side::Private)),
            self.synchronizer.sync_recent_blocks(self.sync_context(Side::Public)),
        );

        let mut private = SideOutcome::new(Side::Private);
        let mut public = SideOutcome::new(Side::Public);
        private.record_sync(private_sync);
        public.record_sync(public_sync);

        match self.store.tracked_txids() {
            Ok(txids) if !txids.is_empty() => {
                let (private_links, public_links) = tokio::join!(
                    self.tracker.refresh(Side::Private, self.rpc(Side::Private), &txids),
                    self.tracker.refresh(Side::Public, self.rpc(Side::Public), &txids),
                );
                private.record_tracking(private_links);
                public.record_tracking(public_links);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Cannot list tracked transactions: {}", e);
                private.fail(e.clone());
                public.fail(e);
            }
        }

        vec![private, public]
    }

    /// Sync both sides and return the blocks stored for `date` (today when `None`),
    /// both tips and the tracked transactions.
    pub async fn get_blockchain_data(&self, date: Option<&str>) -> Result<BlockchainData> {
        let date = resolve_date(date)?;
        let sync = self.sync_and_track().await;

        let (private_tip, public_tip) = tokio::join!(
            optional_tip(Side::Private, self.rpc(Side::Private)),
            optional_tip(Side::Public, self.rpc(Side::Public)),
        );

        Ok(BlockchainData {
            chain_blocks: self.store.blocks_by_date(&date)?,
            transactions: self.store.all_tracked_transactions()?,
            chain_tips: ChainTips {
                public: public_tip,
                private: private_tip,
            },
            sync,
            date,
        })
    }

    /// Sync and refresh tracking without assembling a payload.
    pub async fn sync_recent_data(&self) -> Vec<SideOutcome> {
        self.sync_and_track().await
    }

    pub async fn get_network_status(&self) -> Result<NetworkStatus> {
        let connection = self.network.get_connection_status().await?;
        let public_tip = optional_tip(Side::Public, self.rpc(Side::Public)).await;

        Ok(NetworkStatus {
            connection,
            public_tip,
            summary: self.store.blocks_summary()?,
        })
    }

    /// Broadcast through the private node and start tracking the result.
    pub async fn send_raw_transaction(&self, raw_tx: &str, color: &str) -> Result<SendOutcome> {
        validate_raw_transaction(raw_tx)?;
        validate_color(color)?;

        let txid = self.private.send_raw_transaction(raw_tx).await?;
        info!(txid = %txid, "Broadcast transaction to private node");

        match self.track_transaction(&txid, color).await {
            Ok(_) => Ok(SendOutcome {
                txid,
                tracked: true,
                tracking_error: None,
            }),
            Err(e) => {
                warn!(txid = %txid, "Broadcast succeeded but tracking failed: {}", e);
                Ok(SendOutcome {
                    txid,
                    tracked: false,
                    tracking_error: Some(e.to_string()),
                })
            }
        }
    }

    /// Start (or refresh) tracking `txid`. Both nodes are asked; the private
    /// node's snapshot wins when both answer.
    pub async fn track_transaction(&self, txid: &str, color: &str) -> Result<TrackedTransactionView> {
        validate_txid(txid)?;
        validate_color(color)?;

        let (private, public) = tokio::join!(
            lookup_transaction(self.rpc(Side::Private), txid),
            lookup_transaction(self.rpc(Side::Public), txid),
        );

        let mut tracked = TrackedTransaction::pending(txid, color);
        let mut found_blocks = Vec::new();

        for (side, lookup) in [(Side::Private, private), (Side::Public, public)] {
            match lookup {
                TxLookup::Found(tx) => {
                    if tracked.snapshot_source.is_none() {
                        tracked.inputs = tx.vin.clone();
                        tracked.outputs = tx.vout.clone();
                        tracked.snapshot_source = Some(side);
                    }
                    if let Some(block_hash) = tx.blockhash {
                        if !found_blocks.contains(&block_hash) {
                            found_blocks.push(block_hash);
                        }
                    }
                }
                TxLookup::NotFound => info!(side = %side, txid = %txid, "Transaction not known yet"),
                TxLookup::Failed(e) => warn!(side = %side, txid = %txid, "Lookup failed: {}", e),
            }
        }

        // Keep the previous snapshot rather than blanking it when neither node answered.
        if tracked.snapshot_source.is_none() {
            if let Some(existing) = self.store.get_tracked_transaction(txid)? {
                tracked.inputs = existing.inputs;
                tracked.outputs = existing.outputs;
                tracked.snapshot_source = existing.snapshot_source;
            }
        }

        self.store.record_tracking(&tracked, &found_blocks)?;
        self.store
            .get_tracked_transaction(txid)?
            .ok_or_else(|| ReorgError::Persistence(format!("Tracked transaction {} vanished", txid)))
    }

    /// Stop tracking `txid` and drop its block links.
    pub async fn untrack_transaction(&self, txid: &str) -> Result<()> {
        validate_txid(txid)?;
        if self.store.remove_tracked_transaction(txid)? {
            info!(txid = %txid, "Stopped tracking transaction");
            Ok(())
        } else {
            Err(ReorgError::NotFound(format!("Transaction {} is not tracked", txid)))
        }
    }

    /// Each node's current view of `txid`.
    pub async fn fetch_tx_info(&self, txid: &str) -> Result<TxInfo> {
        validate_txid(txid)?;
        let (private, public) = tokio::join!(
            lookup_transaction(self.rpc(Side::Private), txid),
            lookup_transaction(self.rpc(Side::Public), txid),
        );

        let snapshot = |side: Side, lookup: TxLookup| match lookup {
            TxLookup::Failed(e) => {
                warn!(side = %side, txid = %txid, "Lookup failed: {}", e);
                None
            }
            other => other.found().map(TxSnapshot::from),
        };

        Ok(TxInfo {
            txid: txid.to_string(),
            private: snapshot(Side::Private, private),
            public: snapshot(Side::Public, public),
        })
    }

    pub async fn connect(&self) -> Result<()> {
        self.network.connect().await
    }

    pub async fn disconnect(&self) -> DisconnectOutcome {
        self.network.disconnect().await
    }

    pub async fn get_peer_addresses(&self) -> Result<Vec<String>> {
        self.network.peer_addresses().await
    }

    pub async fn sync_status(&self) -> BTreeMap<Side, SyncStats> {
        let mut status = BTreeMap::new();
        for side in Side::BOTH {
            status.insert(side, self.synchronizer.get_stats(side).await);
        }
        status
    }

    pub fn list_tracked_transactions(&self) -> Result<Vec<TrackedTransactionView>> {
        self.store.all_tracked_transactions()
    }

    pub fn available_dates(&self) -> Result<Vec<DateSummary>> {
        self.store.available_dates()
    }

    pub fn database_stats(&self) -> Result<DatabaseStats> {
        self.store.database_stats()
    }

    /// Stored blocks, optionally limited to one side and one date.
    pub fn blocks(&self, side: Option<Side>, date: Option<&str>) -> Result<Vec<Block>> {
        let date = match date {
            Some(d) => Some(resolve_date(Some(d))?),
            None => None,
        };
        match (side, date) {
            (Some(side), date) => self.store.blocks_by_side(side, date.as_deref()),
            (None, Some(date)) => self.store.blocks_by_date(&date),
            (None, None) => self.store.all_blocks(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockNode;

    fn manager(public: Arc<MockNode>, private: Arc<MockNode>) -> ReorgManager {
        ReorgManager::new(
            public,
            private,
            Arc::new(Database::open_in_memory().unwrap()),
            &NetworkControlConfig::default(),
            100,
        )
    }

    #[test]
    fn test_validation_helpers() {
        assert!(validate_txid(&"ab".repeat(32)).is_ok());
        assert!(validate_txid("abc").is_err());
        assert!(validate_txid(&"zz".repeat(32)).is_err());

        assert!(validate_raw_transaction("0200").is_ok());
        assert!(validate_raw_transaction("").is_err());
        assert!(validate_raw_transaction("020").is_err());

        assert!(validate_color("blue").is_ok());
        assert!(validate_color(" ").is_err());
        assert!(validate_color(&"r".repeat(33)).is_err());

        assert_eq!(resolve_date(Some("2025-09-04")).unwrap(), "2025-09-04");
        assert!(matches!(
            resolve_date(Some("04/09/2025")),
            Err(ReorgError::Validation(_))
        ));
        assert_eq!(resolve_date(None).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_track_prefers_private_snapshot() {
        let public = Arc::new(MockNode::with_chain("public", 5));
        let private = Arc::new(MockNode::with_chain("private", 5));
        let txid = "ab".repeat(32);

        let mut public_tx = MockNode::sample_transaction(&txid);
        public_tx.vout.clear();
        public.include_transaction(3, public_tx);
        private.add_mempool_transaction(MockNode::sample_transaction(&txid));

        let manager = manager(public.clone(), private);
        let view = manager.track_transaction(&txid, "red").await.unwrap();

        assert_eq!(view.snapshot_source, Some(Side::Private));
        assert_eq!(view.outputs.len(), 1);
        assert_eq!(view.blocks, vec![public.block_hash(3).unwrap()]);
        assert_eq!(view.color, "red");
    }

    #[tokio::test]
    async fn test_track_unknown_transaction_is_pending() {
        let manager = manager(
            Arc::new(MockNode::with_chain("public", 2)),
            Arc::new(MockNode::with_chain("private", 2)),
        );
        let view = manager.track_transaction(&"cd".repeat(32), "blue").await.unwrap();
        assert!(view.is_pending());
        assert!(view.snapshot_source.is_none());
    }

    #[tokio::test]
    async fn test_untrack_unknown_is_not_found() {
        let manager = manager(
            Arc::new(MockNode::new("public")),
            Arc::new(MockNode::new("private")),
        );
        let err = manager.untrack_transaction(&"ef".repeat(32)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_send_rejected_by_node() {
        let private = Arc::new(MockNode::with_chain("private", 1));
        private.reject_broadcasts(-26, "bad-txns-inputs-missingorspent");
        let manager = manager(Arc::new(MockNode::new("public")), private);

        let err = manager.send_raw_transaction("0200ab", "blue").await.unwrap_err();
        assert!(matches!(err, ReorgError::Rpc { code: -26, .. }));
        assert!(manager.list_tracked_transactions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_tx_info_per_side() {
        let public = Arc::new(MockNode::with_chain("public", 4));
        let private = Arc::new(MockNode::with_chain("private", 4));
        let txid = "12".repeat(32);
        private.include_transaction(2, MockNode::sample_transaction(&txid));
        public.set_offline(true);

        let info = manager(public, private.clone()).fetch_tx_info(&txid).await.unwrap();
        assert_eq!(info.private.unwrap().blockhash, private.block_hash(2));
        assert!(info.public.is_none());
    }
}
