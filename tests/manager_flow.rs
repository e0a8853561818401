//! Integration tests for the orchestrator against two scripted nodes

use reorgwatch::config::NetworkControlConfig;
use reorgwatch::network::DisconnectOutcome;
use reorgwatch::persistence::Database;
use reorgwatch::response::Envelope;
use reorgwatch::rpc::mock::MockNode;
use reorgwatch::{ReorgError, ReorgManager, Side};
use std::sync::Arc;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const DAY: &str = "2025-09-04";

struct Harness {
    public: Arc<MockNode>,
    private: Arc<MockNode>,
    manager: ReorgManager,
}

fn harness(public_tip: u64, private_tip: u64, depth: u64) -> Result<Harness, Box<dyn std::error::Error>> {
    let public = Arc::new(MockNode::with_chain("public", public_tip));
    let private = Arc::new(MockNode::with_chain("private", private_tip));
    let store = Arc::new(Database::open_in_memory()?);
    let network = NetworkControlConfig {
        counterpart_peer: "faucet-litecoind-public:19335".to_string(),
        dummy_peer: Some("127.0.0.1:1".to_string()),
    };
    let manager = ReorgManager::new(public.clone(), private.clone(), store, &network, depth);
    Ok(Harness {
        public,
        private,
        manager,
    })
}

#[tokio::test]
async fn test_blockchain_data_for_divergent_nodes() -> TestResult {
    let h = harness(59, 59, 60)?;
    h.public.fork_at(50, 1, 59);

    let txid = "a1".repeat(32);
    h.private.include_transaction(50, MockNode::sample_transaction(&txid));
    h.public.include_transaction(50, MockNode::sample_transaction(&txid));
    h.manager.track_transaction(&txid, "purple").await?;

    let data = h.manager.get_blockchain_data(Some(DAY)).await?;

    assert!(data.sync.iter().all(|s| s.success));
    assert_eq!(data.chain_blocks.len(), 69);
    assert!(data.chain_blocks.windows(2).all(|w| w[0].height <= w[1].height));
    assert_eq!(data.chain_tips.private.as_ref().map(|t| t.height), Some(59));
    assert_eq!(data.chain_tips.public.as_ref().map(|t| &t.hash), h.public.block_hash(59).as_ref());

    assert_eq!(data.transactions.len(), 1);
    assert_eq!(data.transactions[0].color, "purple");
    assert_eq!(data.transactions[0].blocks.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_repeated_fetch_is_idempotent() -> TestResult {
    let h = harness(20, 20, 100)?;

    let first = h.manager.get_blockchain_data(Some(DAY)).await?;
    let second = h.manager.get_blockchain_data(Some(DAY)).await?;

    assert_eq!(first.chain_blocks.len(), 20);
    assert_eq!(second.chain_blocks, first.chain_blocks);
    assert!(second.sync.iter().all(|s| s.blocks_inserted == 0));

    let stats = h.manager.database_stats()?;
    assert_eq!(stats.public_network.total_blocks, 20);
    assert_eq!(stats.private_network.total_blocks, 20);

    let status = h.manager.sync_status().await;
    assert_eq!(status[&Side::Private].runs, 2);
    assert_eq!(status[&Side::Public].runs, 2);
    assert_eq!(status[&Side::Private].blocks_synced_last_run, 0);
    Ok(())
}

#[tokio::test]
async fn test_public_failure_bounds_result() -> TestResult {
    let h = harness(30, 30, 100)?;
    h.public.set_offline(true);

    let data = h.manager.get_blockchain_data(Some(DAY)).await?;

    let public = data.sync.iter().find(|s| s.side == Side::Public).ok_or("no public outcome")?;
    let private = data.sync.iter().find(|s| s.side == Side::Private).ok_or("no private outcome")?;
    assert!(!public.success);
    assert!(public.error.is_some());
    assert!(private.success);
    assert_eq!(data.chain_blocks.len(), 30);
    assert!(data.chain_tips.public.is_none());
    assert!(data.chain_tips.private.is_some());
    Ok(())
}

#[tokio::test]
async fn test_other_date_is_empty() -> TestResult {
    let h = harness(5, 5, 100)?;
    let data = h.manager.get_blockchain_data(Some("2025-09-05")).await?;
    assert!(data.chain_blocks.is_empty());
    assert_eq!(h.manager.available_dates()?[0].date, DAY);

    let err = h.manager.get_blockchain_data(Some("yesterday")).await.unwrap_err();
    assert!(matches!(err, ReorgError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn test_send_track_mine_untrack() -> TestResult {
    let h = harness(10, 10, 100)?;

    let sent = h.manager.send_raw_transaction("0200000001ab", "green").await?;
    assert!(sent.tracked);
    assert!(h.private.in_mempool(&sent.txid));

    let pending = h.manager.list_tracked_transactions()?;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].is_pending());
    assert_eq!(pending[0].snapshot_source, Some(Side::Private));

    h.private.extend(1);
    h.private.include_transaction(11, MockNode::sample_transaction(&sent.txid));
    let data = h.manager.get_blockchain_data(Some(DAY)).await?;
    assert_eq!(data.transactions[0].blocks, vec![h.private.block_hash(11).ok_or("no block")?]);

    // Retracking replaces color and snapshot but keeps the link.
    let view = h.manager.track_transaction(&sent.txid, "yellow").await?;
    assert_eq!(view.color, "yellow");
    assert_eq!(view.blocks.len(), 1);

    h.manager.untrack_transaction(&sent.txid).await?;
    assert!(h.manager.list_tracked_transactions()?.is_empty());
    assert_eq!(h.manager.database_stats()?.total_tx_block_links, 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_rpc() -> TestResult {
    let h = harness(1, 1, 100)?;

    assert!(matches!(
        h.manager.send_raw_transaction("xyz", "blue").await,
        Err(ReorgError::Validation(_))
    ));
    assert!(matches!(
        h.manager.track_transaction("deadbeef", "blue").await,
        Err(ReorgError::Validation(_))
    ));
    assert_eq!(h.private.call_count("sendrawtransaction"), 0);
    assert_eq!(h.private.call_count("getrawtransaction"), 0);

    let envelope: Envelope<()> = h.manager.untrack_transaction("nope").await.into();
    assert!(!envelope.success);
    Ok(())
}

#[tokio::test]
async fn test_partition_controls() -> TestResult {
    let h = harness(3, 7, 100)?;
    h.private.add_peer("127.0.0.1:1");

    let status = h.manager.get_network_status().await?;
    assert!(!status.connection.is_connected);
    assert_eq!(status.connection.tip.height, 7);
    assert_eq!(status.public_tip.map(|t| t.height), Some(3));

    h.manager.connect().await?;
    assert_eq!(h.manager.get_peer_addresses().await?, vec!["faucet-litecoind-public:19335"]);
    assert!(h.manager.get_network_status().await?.connection.is_connected);

    assert_eq!(h.manager.disconnect().await, DisconnectOutcome::Disconnected);
    assert!(matches!(h.manager.disconnect().await, DisconnectOutcome::Ignored(_)));
    assert!(h.manager.get_peer_addresses().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_fetch_tx_info_and_blocks_by_side() -> TestResult {
    let h = harness(12, 12, 100)?;
    h.public.fork_at(10, 3, 12);
    let txid = "b2".repeat(32);
    h.public.include_transaction(11, MockNode::sample_transaction(&txid));

    h.manager.sync_recent_data().await;
    assert_eq!(h.manager.blocks(Some(Side::Public), None)?.len(), 12);
    assert_eq!(h.manager.blocks(Some(Side::Private), None)?.len(), 12);
    let dates = h.manager.available_dates()?;
    assert_eq!((dates[0].public_blocks, dates[0].private_blocks, dates[0].total_blocks), (12, 12, 15));
    assert_eq!(h.manager.blocks(None, Some(DAY))?.len(), 15);

    let info = h.manager.fetch_tx_info(&txid).await?;
    assert!(info.private.is_none());
    assert_eq!(info.public.ok_or("no public view")?.blockhash, h.public.block_hash(11));
    Ok(())
}

#[tokio::test]
async fn test_ledger_survives_restart() -> TestResult {
    let dir = TempDir::new()?;
    let path = dir.path().join("data").join("reorg.db");
    let path = path.to_str().ok_or("non-utf8 path")?;
    let public = Arc::new(MockNode::with_chain("public", 8));
    let private = Arc::new(MockNode::with_chain("private", 8));

    {
        let store = Arc::new(Database::open(path)?);
        let manager = ReorgManager::new(
            public.clone(),
            private.clone(),
            store,
            &NetworkControlConfig::default(),
            100,
        );
        manager.sync_recent_data().await;
    }

    let reopened = Database::open(path)?;
    assert_eq!(reopened.block_count()?, 8);
    Ok(())
}
