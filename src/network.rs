//! Peer control on the private node.
//!
//! Connecting and disconnecting the counterpart (public) node is how a
//! partition is opened and healed, and therefore how a reorg is staged.

use crate::config::NetworkControlConfig;
use crate::error::Result;
use crate::rpc::{ChainRpc, PeerInfo};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A node's best block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainTip {
    pub hash: String,
    pub height: u64,
}

pub async fn fetch_tip(rpc: &dyn ChainRpc) -> Result<ChainTip> {
    let info = rpc.get_blockchain_info().await?;
    Ok(ChainTip {
        hash: info.bestblockhash,
        height: info.blocks,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub peer_count: usize,
    pub peers: Vec<PeerInfo>,
    /// Set when the peer listing failed; the status is then reported as disconnected.
    pub peer_error: Option<String>,
    pub tip: ChainTip,
}

/// Result of a best-effort disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectOutcome {
    Disconnected,
    /// The node refused or could not be asked; usually the peer was already gone.
    Ignored(String),
}

pub struct NetworkControl {
    rpc: Arc<dyn ChainRpc>,
    counterpart_peer: String,
    dummy_peer: Option<String>,
}

impl NetworkControl {
    pub fn new(rpc: Arc<dyn ChainRpc>, config: &NetworkControlConfig) -> Self {
        Self {
            rpc,
            counterpart_peer: config.counterpart_peer.clone(),
            dummy_peer: config.dummy_peer.clone(),
        }
    }

    pub fn counterpart_peer(&self) -> &str {
        &self.counterpart_peer
    }

    /// Ask the node to try the counterpart peer once.
    pub async fn connect(&self) -> Result<()> {
        self.rpc.add_node(&self.counterpart_peer, "onetry").await?;
        info!(peer = %self.counterpart_peer, "Requested connection to counterpart");
        Ok(())
    }

    /// Drop the counterpart peer. Never fails.
    pub async fn disconnect(&self) -> DisconnectOutcome {
        match self.rpc.disconnect_node(&self.counterpart_peer).await {
            Ok(()) => {
                info!(peer = %self.counterpart_peer, "Disconnected counterpart");
                DisconnectOutcome::Disconnected
            }
            Err(e) => {
                debug!(peer = %self.counterpart_peer, "Ignoring disconnect error: {}", e);
                DisconnectOutcome::Ignored(e.to_string())
            }
        }
    }

    /// Connected peers, without the placeholder peer.
    pub async fn get_peer_info(&self) -> Result<Vec<PeerInfo>> {
        let mut peers = self.rpc.get_peer_info().await?;
        if let Some(dummy) = &self.dummy_peer {
            peers.retain(|p| &p.addr != dummy);
        }
        Ok(peers)
    }

    pub async fn peer_addresses(&self) -> Result<Vec<String>> {
        Ok(self
            .get_peer_info()
            .await?
            .into_iter()
            .map(|p| p.addr)
            .collect())
    }

    /// Peer count and tip in one view. A failed peer listing reads as "not connected";
    /// a failed tip lookup fails the call.
    pub async fn get_connection_status(&self) -> Result<ConnectionStatus> {
        let (peers, peer_error) = match self.get_peer_info().await {
            Ok(peers) => (peers, None),
            Err(e) => {
                warn!("Peer listing failed: {}", e);
                (Vec::new(), Some(e.to_string()))
            }
        };
        let tip = fetch_tip(self.rpc.as_ref()).await?;

        Ok(ConnectionStatus {
            is_connected: !peers.is_empty(),
            peer_count: peers.len(),
            peers,
            peer_error,
            tip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockNode;

    fn control(node: Arc<MockNode>, dummy: Option<&str>) -> NetworkControl {
        NetworkControl::new(
            node,
            &NetworkControlConfig {
                counterpart_peer: "public:19335".to_string(),
                dummy_peer: dummy.map(str::to_string),
            },
        )
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let node = Arc::new(MockNode::with_chain("private", 4));
        let network = control(node.clone(), None);

        network.connect().await.unwrap();
        assert_eq!(node.peers(), vec!["public:19335".to_string()]);

        let status = network.get_connection_status().await.unwrap();
        assert!(status.is_connected);
        assert_eq!(status.tip.height, 4);
        assert_eq!(Some(status.tip.hash), node.block_hash(4));

        assert_eq!(network.disconnect().await, DisconnectOutcome::Disconnected);
        assert!(!network.get_connection_status().await.unwrap().is_connected);
    }

    #[tokio::test]
    async fn test_disconnect_absent_peer_is_swallowed() {
        let node = Arc::new(MockNode::new("private"));
        let network = control(node, None);
        assert!(matches!(network.disconnect().await, DisconnectOutcome::Ignored(_)));
    }

    #[tokio::test]
    async fn test_dummy_peer_is_hidden() {
        let node = Arc::new(MockNode::new("private"));
        node.add_peer("127.0.0.1:1");
        node.add_peer("10.0.0.2:19335");
        let network = control(node, Some("127.0.0.1:1"));

        assert_eq!(network.peer_addresses().await.unwrap(), vec!["10.0.0.2:19335"]);
    }

    #[tokio::test]
    async fn test_status_survives_peer_listing_failure() {
        let node = Arc::new(MockNode::with_chain("private", 2));
        node.add_peer("public:19335");
        node.fail_method("getpeerinfo");
        let network = control(node.clone(), None);

        let status = network.get_connection_status().await.unwrap();
        assert!(!status.is_connected);
        assert!(status.peer_error.is_some());

        node.fail_method("getblockchaininfo");
        assert!(network.get_connection_status().await.is_err());
    }
}
