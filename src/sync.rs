//! Chain synchronization for ReorgWatch
//!
//! This module pulls recent block headers from a node into the ledger:
//! - Bounded scan from the node's tip down to `max(1, tip - depth + 1)`
//! - Early stop at the first hash already recorded for this side
//! - Blocks the other side already stored are marked, not refetched
//! - Independent proof-of-work recomputation per block
//! - All-or-nothing commit of the newly found blocks, ascending by height
//! - Per-side sync state and statistics

use crate::coinbase::extract_coinbase_message;
use crate::error::{ReorgError, Result};
use crate::ledger::{Block, Side, GENESIS_PREV_HASH};
use crate::persistence::Database;
use crate::pow::{chainwork_log2, meets_target, scrypt_hash};
use crate::rpc::{ChainRpc, RpcBlock, VERBOSITY_FULL};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Which node to sync from and how far back to look.
pub struct SyncContext<'a> {
    pub side: Side,
    pub rpc: &'a dyn ChainRpc,
    pub depth: u64,
}

/// Outcome of one bounded scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub side: Side,
    pub tip_height: u64,
    /// Lowest height the scan was allowed to reach.
    pub start_height: u64,
    /// Heights whose hash was fetched, including the known one that stopped the scan.
    pub scanned: u64,
    /// Heights of the newly stored blocks, ascending.
    pub inserted: Vec<u64>,
    /// Heights of blocks already stored from the other side and now marked for this one, ascending.
    pub adopted: Vec<u64>,
    /// Height of the block this side had already reported that ended the scan, if any.
    pub stopped_at_known: Option<u64>,
}

impl SyncReport {
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }
}

/// Sync state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
    Failed,
}

/// Sync statistics for one side
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub state: SyncState,
    pub runs: u64,
    pub failures: u64,
    pub total_blocks_synced: u64,
    pub blocks_synced_last_run: u64,
    pub last_tip_height: Option<u64>,
    pub last_error: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            runs: 0,
            failures: 0,
            total_blocks_synced: 0,
            blocks_synced_last_run: 0,
            last_tip_height: None,
            last_error: None,
            last_sync: None,
        }
    }
}

/// Lowest height a scan of `depth` heights below `tip` may visit. Height 0 is never scanned.
pub fn scan_start(tip: u64, depth: u64) -> u64 {
    (tip + 1).saturating_sub(depth).max(1)
}

fn format_timestamp(unix_time: u32) -> Result<(String, String)> {
    let stamp = DateTime::<Utc>::from_timestamp(unix_time as i64, 0).ok_or_else(|| {
        ReorgError::Validation(format!("Block time {} is out of range", unix_time))
    })?;
    Ok((
        stamp.format("%Y-%m-%d").to_string(),
        stamp.format("%H:%M:%S").to_string(),
    ))
}

/// Derive a ledger block from a node's `getblock` answer.
pub fn build_block(side: Side, rpc_block: &RpcBlock) -> Result<Block> {
    let header = rpc_block.header_fields();
    let pow_hash = scrypt_hash(&header)?;

    match meets_target(&pow_hash, &header.bits) {
        Ok(true) => {}
        Ok(false) => warn!(
            side = %side,
            height = rpc_block.height,
            hash = %rpc_block.hash,
            pow = %pow_hash,
            "Proof-of-work hash is above the block's target"
        ),
        Err(e) => warn!(side = %side, height = rpc_block.height, "Cannot check target: {}", e),
    }

    let coinbase_message = rpc_block
        .coinbase()
        .map(extract_coinbase_message)
        .unwrap_or_else(|| format!("Block #{}", rpc_block.height));
    let (date, time) = format_timestamp(rpc_block.time)?;

    Ok(Block {
        height: rpc_block.height,
        hash: rpc_block.hash.clone(),
        prev_hash: rpc_block
            .previous_block_hash
            .clone()
            .unwrap_or_else(|| GENESIS_PREV_HASH.to_string()),
        coinbase_message,
        date,
        time,
        scrypt_hash: pow_hash,
        chainwork: chainwork_log2(&rpc_block.chainwork)?,
        first_seen_by: side,
    })
}

/// Scan the node's recent history and store every block not yet known.
///
/// Nothing is written unless the whole scan succeeds.
pub async fn scan_new_blocks(ctx: &SyncContext<'_>, store: &Database) -> Result<SyncReport> {
    let tip = ctx.rpc.get_block_count().await?;
    let start = scan_start(tip, ctx.depth);

    let mut fresh: Vec<Block> = Vec::new();
    let mut adopted: Vec<(u64, String)> = Vec::new();
    let mut scanned = 0;
    let mut stopped_at_known = None;

    for height in (start..=tip).rev() {
        let hash = ctx.rpc.get_block_hash(height).await?;
        scanned += 1;

        if store.block_seen_by(&hash, ctx.side)? {
            debug!(side = %ctx.side, height, "Reached known block {}", hash);
            stopped_at_known = Some(height);
            break;
        }

        if store.block_exists(&hash)? {
            adopted.push((height, hash));
            continue;
        }

        let rpc_block = ctx.rpc.get_block(&hash, VERBOSITY_FULL).await?;
        fresh.push(build_block(ctx.side, &rpc_block)?);
    }

    fresh.reverse();
    adopted.reverse();
    let adopted_hashes: Vec<String> = adopted.iter().map(|(_, hash)| hash.clone()).collect();
    store.record_scan(ctx.side, &fresh, &adopted_hashes)?;

    Ok(SyncReport {
        side: ctx.side,
        tip_height: tip,
        start_height: start,
        scanned,
        inserted: fresh.iter().map(|b| b.height).collect(),
        adopted: adopted.into_iter().map(|(height, _)| height).collect(),
        stopped_at_known,
    })
}

/// Chain synchronizer
pub struct ChainSynchronizer {
    store: Arc<Database>,
    stats: Arc<RwLock<HashMap<Side, SyncStats>>>,
}

impl ChainSynchronizer {
    pub fn new(store: Arc<Database>) -> Self {
        Self {
            store,
            stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sync one side, recording the outcome in that side's statistics.
    pub async fn sync_recent_blocks(&self, ctx: SyncContext<'_>) -> Result<SyncReport> {
        self.set_sync_state(ctx.side, SyncState::Syncing).await;

        let result = scan_new_blocks(&ctx, &self.store).await;

        let mut stats = self.stats.write().await;
        let entry = stats.entry(ctx.side).or_default();
        entry.runs += 1;
        entry.last_sync = Some(Utc::now());

        match &result {
            Ok(report) => {
                entry.state = SyncState::Synced;
                entry.blocks_synced_last_run = report.inserted.len() as u64;
                entry.total_blocks_synced += report.inserted.len() as u64;
                entry.last_tip_height = Some(report.tip_height);
                entry.last_error = None;

                if report.inserted.is_empty() && report.adopted.is_empty() {
                    debug!(side = %ctx.side, tip = report.tip_height, "Already up to date");
                } else {
                    info!(
                        side = %ctx.side,
                        tip = report.tip_height,
                        inserted = report.inserted.len(),
                        adopted = report.adopted.len(),
                        "Stored new blocks"
                    );
                }
            }
            Err(e) => {
                entry.state = SyncState::Failed;
                entry.failures += 1;
                entry.blocks_synced_last_run = 0;
                entry.last_error = Some(e.to_string());
                warn!(side = %ctx.side, "Sync failed: {}", e);
            }
        }

        result
    }

    async fn set_sync_state(&self, side: Side, state: SyncState) {
        self.stats.write().await.entry(side).or_default().state = state;
    }

    /// Get current sync state
    pub async fn get_sync_state(&self, side: Side) -> SyncState {
        self.stats
            .read()
            .await
            .get(&side)
            .map(|s| s.state)
            .unwrap_or(SyncState::Idle)
    }

    /// Check if sync is in progress
    pub async fn is_syncing(&self, side: Side) -> bool {
        self.get_sync_state(side).await == SyncState::Syncing
    }

    /// Get sync statistics
    pub async fn get_stats(&self, side: Side) -> SyncStats {
        self.stats
            .read()
            .await
            .get(&side)
            .cloned()
            .unwrap_or_default()
    }
}
