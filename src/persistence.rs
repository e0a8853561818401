//! Database persistence layer for ReorgWatch
//!
//! Four tables: `blocks` keyed by hash, `block_sides` recording which
//! node reported each block on its active chain, `tracked_transactions`
//! keyed by txid, and the additive `tx_in_blocks` linkage. This module is
//! the only writer of all four.

use crate::error::{ReorgError, Result};
use crate::ledger::{
    Block, BlocksSummary, CoinbaseGroup, DatabaseStats, DateRange, DateSummary, HeightRange,
    Side, SideStats, SummaryTotals, TrackedTransaction, TrackedTransactionView, TxInBlock,
};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        hash TEXT PRIMARY KEY,
        height INTEGER NOT NULL,
        prev_hash TEXT NOT NULL,
        coinbase_message TEXT NOT NULL,
        date TEXT NOT NULL,
        time TEXT NOT NULL,
        scrypt_hash TEXT NOT NULL,
        chainwork REAL NOT NULL,
        first_seen_by TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_blocks_date_height ON blocks (date, height);
    CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks (height);

    CREATE TABLE IF NOT EXISTS block_sides (
        hash TEXT NOT NULL,
        side TEXT NOT NULL,
        UNIQUE (hash, side)
    );
    CREATE INDEX IF NOT EXISTS idx_block_sides_side ON block_sides (side);
    INSERT OR IGNORE INTO block_sides (hash, side) SELECT hash, first_seen_by FROM blocks;

    CREATE TABLE IF NOT EXISTS tracked_transactions (
        txid TEXT PRIMARY KEY,
        inputs TEXT NOT NULL,
        outputs TEXT NOT NULL,
        color TEXT NOT NULL DEFAULT 'blue',
        snapshot_source TEXT
    );

    CREATE TABLE IF NOT EXISTS tx_in_blocks (
        txid TEXT NOT NULL,
        block_hash TEXT NOT NULL,
        UNIQUE (txid, block_hash)
    );
";

const BLOCK_COLUMNS: &str =
    "height, hash, prev_hash, coinbase_message, date, time, scrypt_hash, chainwork, first_seen_by";

const ON_SIDE: &str = "hash IN (SELECT hash FROM block_sides WHERE side = ?1)";

// `first_seen_by` keeps the value from the first insert.
const UPSERT_BLOCK: &str = "
    INSERT INTO blocks (height, hash, prev_hash, coinbase_message, date, time, scrypt_hash, chainwork, first_seen_by)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(hash) DO UPDATE SET
        height = excluded.height,
        prev_hash = excluded.prev_hash,
        coinbase_message = excluded.coinbase_message,
        date = excluded.date,
        time = excluded.time,
        scrypt_hash = excluded.scrypt_hash,
        chainwork = excluded.chainwork
";

impl ToSql for Side {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Side {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ReorgError| FromSqlError::Other(Box::new(e)))
    }
}

fn block_from_row(row: &Row) -> rusqlite::Result<Block> {
    let height: i64 = row.get(0)?;
    Ok(Block {
        height: height as u64,
        hash: row.get(1)?,
        prev_hash: row.get(2)?,
        coinbase_message: row.get(3)?,
        date: row.get(4)?,
        time: row.get(5)?,
        scrypt_hash: row.get(6)?,
        chainwork: row.get(7)?,
        first_seen_by: row.get(8)?,
    })
}

fn execute_mark(conn: &Connection, hash: &str, side: Side) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO block_sides (hash, side) VALUES (?1, ?2)",
        params![hash, side],
    )
}

/// Upsert the block row and record it for the side that fetched it.
fn execute_upsert(conn: &Connection, block: &Block) -> rusqlite::Result<()> {
    conn.execute(
        UPSERT_BLOCK,
        params![
            block.height as i64,
            block.hash,
            block.prev_hash,
            block.coinbase_message,
            block.date,
            block.time,
            block.scrypt_hash,
            block.chainwork,
            block.first_seen_by,
        ],
    )?;
    execute_mark(conn, &block.hash, block.first_seen_by)?;
    Ok(())
}

fn decode_json_list(raw: &str) -> Result<Vec<Value>> {
    serde_json::from_str(raw)
        .map_err(|e| ReorgError::Persistence(format!("Corrupt stored JSON: {}", e)))
}

fn height_range(min: Option<i64>, max: Option<i64>) -> Option<HeightRange> {
    match (min, max) {
        (Some(min), Some(max)) => Some(HeightRange {
            min: min as u64,
            max: max as u64,
        }),
        _ => None,
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the store at `path`. `":memory:"` gives a private in-memory store.
    pub fn open(path: &str) -> Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ReorgError::Persistence(format!(
                            "Failed to create data dir {:?}: {}",
                            parent, e
                        ))
                    })?;
                }
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| ReorgError::Persistence(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| ReorgError::Persistence(format!("Failed to create tables: {}", e)))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ReorgError::Persistence("Mutex poisoned".to_string()))
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Insert or replace a block keyed by hash.
    pub fn upsert_block(&self, block: &Block) -> Result<()> {
        let conn = self.conn()?;
        execute_upsert(&conn, block)
            .map_err(|e| ReorgError::Persistence(format!("Failed to save block: {}", e)))?;
        Ok(())
    }

    /// Upsert a batch of blocks atomically: either all become visible or none do.
    pub fn insert_blocks(&self, blocks: &[Block]) -> Result<usize> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            ReorgError::Persistence(format!("Failed to start transaction: {}", e))
        })?;

        for block in blocks {
            execute_upsert(&tx, block).map_err(|e| {
                ReorgError::Persistence(format!(
                    "Failed to save block {} at height {}: {}",
                    block.hash, block.height, e
                ))
            })?;
        }

        tx.commit().map_err(|e| {
            ReorgError::Persistence(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(blocks.len())
    }

    /// Commit one side's scan atomically: store the newly fetched blocks and
    /// mark already-stored `adopted` hashes as present on `side` too.
    pub fn record_scan(&self, side: Side, fresh: &[Block], adopted: &[String]) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            ReorgError::Persistence(format!("Failed to start transaction: {}", e))
        })?;

        for block in fresh {
            execute_upsert(&tx, block)
                .and_then(|_| execute_mark(&tx, &block.hash, side))
                .map_err(|e| {
                    ReorgError::Persistence(format!(
                        "Failed to save block {} at height {}: {}",
                        block.hash, block.height, e
                    ))
                })?;
        }
        for hash in adopted {
            execute_mark(&tx, hash, side).map_err(|e| {
                ReorgError::Persistence(format!("Failed to mark block {} for {}: {}", hash, side, e))
            })?;
        }

        tx.commit().map_err(|e| {
            ReorgError::Persistence(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    /// Whether `side` has already reported `hash` on its chain.
    pub fn block_seen_by(&self, hash: &str, side: Side) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM block_sides WHERE hash = ?1 AND side = ?2",
                params![hash, side],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Sides that have reported `hash`.
    pub fn block_sides(&self, hash: &str) -> Result<Vec<Side>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT side FROM block_sides WHERE hash = ?1 ORDER BY side ASC")?;
        let sides = stmt
            .query_map(params![hash], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<Side>>>()?;
        Ok(sides)
    }

    pub fn block_exists(&self, hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM blocks WHERE hash = ?1", params![hash], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_block(&self, hash: &str) -> Result<Option<Block>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM blocks WHERE hash = ?1", BLOCK_COLUMNS);
        Ok(conn
            .query_row(&sql, params![hash], block_from_row)
            .optional()?)
    }

    fn query_blocks(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<Block>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ReorgError::Persistence(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(args, block_from_row)
            .map_err(|e| ReorgError::Persistence(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(
                row.map_err(|e| ReorgError::Persistence(format!("Failed to load block: {}", e)))?,
            );
        }
        Ok(blocks)
    }

    pub fn all_blocks(&self) -> Result<Vec<Block>> {
        let sql = format!("SELECT {} FROM blocks ORDER BY height ASC, hash ASC", BLOCK_COLUMNS);
        self.query_blocks(&sql, &[])
    }

    /// All blocks stamped with `date`, ascending by height.
    pub fn blocks_by_date(&self, date: &str) -> Result<Vec<Block>> {
        let sql = format!(
            "SELECT {} FROM blocks WHERE date = ?1 ORDER BY height ASC, hash ASC",
            BLOCK_COLUMNS
        );
        self.query_blocks(&sql, &[&date])
    }

    pub fn blocks_in_height_range(&self, min: u64, max: u64) -> Result<Vec<Block>> {
        let sql = format!(
            "SELECT {} FROM blocks WHERE height BETWEEN ?1 AND ?2 ORDER BY height ASC, hash ASC",
            BLOCK_COLUMNS
        );
        self.query_blocks(&sql, &[&(min as i64), &(max as i64)])
    }

    /// Blocks `side` has reported on its chain, optionally restricted to one date.
    pub fn blocks_by_side(&self, side: Side, date: Option<&str>) -> Result<Vec<Block>> {
        match date {
            Some(date) => {
                let sql = format!(
                    "SELECT {} FROM blocks WHERE {} AND date = ?2 ORDER BY height ASC",
                    BLOCK_COLUMNS, ON_SIDE
                );
                self.query_blocks(&sql, &[&side, &date])
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM blocks WHERE {} ORDER BY height ASC",
                    BLOCK_COLUMNS, ON_SIDE
                );
                self.query_blocks(&sql, &[&side])
            }
        }
    }

    /// Hashes stored for `date`, highest block first.
    pub fn get_existing_block_hashes(&self, date: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT hash FROM blocks WHERE date = ?1 ORDER BY height DESC")?;
        let hashes = stmt
            .query_map(params![date], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(hashes)
    }

    pub fn block_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // Tracked transactions
    // ------------------------------------------------------------------

    /// Insert or replace the tracked transaction's snapshot and color.
    /// Existing linkage rows are untouched.
    pub fn upsert_tracked_transaction(&self, tracked: &TrackedTransaction) -> Result<()> {
        let conn = self.conn()?;
        Self::write_tracked(&conn, tracked)
    }

    fn write_tracked(conn: &Connection, tracked: &TrackedTransaction) -> Result<()> {
        let inputs = serde_json::to_string(&tracked.inputs)?;
        let outputs = serde_json::to_string(&tracked.outputs)?;
        conn.execute(
            "INSERT OR REPLACE INTO tracked_transactions (txid, inputs, outputs, color, snapshot_source)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tracked.txid, inputs, outputs, tracked.color, tracked.snapshot_source],
        )
        .map_err(|e| ReorgError::Persistence(format!("Failed to save tracked transaction: {}", e)))?;
        Ok(())
    }

    /// Record that `txid` was seen in `block_hash`. Returns false if the pair already existed.
    pub fn link_transaction(&self, txid: &str, block_hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO tx_in_blocks (txid, block_hash) VALUES (?1, ?2)",
                params![txid, block_hash],
            )
            .map_err(|e| ReorgError::Persistence(format!("Failed to link transaction: {}", e)))?;
        Ok(inserted > 0)
    }

    /// Upsert a tracked transaction and add its linkages in one transaction.
    pub fn record_tracking(&self, tracked: &TrackedTransaction, block_hashes: &[String]) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            ReorgError::Persistence(format!("Failed to start transaction: {}", e))
        })?;

        Self::write_tracked(&tx, tracked)?;
        for block_hash in block_hashes {
            tx.execute(
                "INSERT OR IGNORE INTO tx_in_blocks (txid, block_hash) VALUES (?1, ?2)",
                params![tracked.txid, block_hash],
            )
            .map_err(|e| ReorgError::Persistence(format!("Failed to link transaction: {}", e)))?;
        }

        tx.commit().map_err(|e| {
            ReorgError::Persistence(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    pub fn tracked_txids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT txid FROM tracked_transactions ORDER BY rowid ASC")?;
        let txids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(txids)
    }

    pub fn linked_blocks(&self, txid: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT block_hash FROM tx_in_blocks WHERE txid = ?1 ORDER BY rowid ASC")?;
        let hashes = stmt
            .query_map(params![txid], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(hashes)
    }

    pub fn links(&self) -> Result<Vec<TxInBlock>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT txid, block_hash FROM tx_in_blocks ORDER BY rowid ASC")?;
        let links = stmt
            .query_map([], |row| {
                Ok(TxInBlock {
                    txid: row.get(0)?,
                    block_hash: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    pub fn get_tracked_transaction(&self, txid: &str) -> Result<Option<TrackedTransactionView>> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT txid, inputs, outputs, color, snapshot_source
                 FROM tracked_transactions WHERE txid = ?1",
                params![txid],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<Side>>(4)?,
                    ))
                },
            )
            .optional()?
        };

        match row {
            Some((txid, inputs, outputs, color, snapshot_source)) => {
                let blocks = self.linked_blocks(&txid)?;
                Ok(Some(TrackedTransactionView {
                    txid,
                    color,
                    blocks,
                    inputs: decode_json_list(&inputs)?,
                    outputs: decode_json_list(&outputs)?,
                    snapshot_source,
                }))
            }
            None => Ok(None),
        }
    }

    /// Every tracked transaction with the blocks it is linked to.
    pub fn all_tracked_transactions(&self) -> Result<Vec<TrackedTransactionView>> {
        let mut views = Vec::new();
        for txid in self.tracked_txids()? {
            if let Some(view) = self.get_tracked_transaction(&txid)? {
                views.push(view);
            }
        }
        Ok(views)
    }

    /// Delete a tracked transaction and all of its linkage rows. Returns false if it was not tracked.
    pub fn remove_tracked_transaction(&self, txid: &str) -> Result<bool> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            ReorgError::Persistence(format!("Failed to start transaction: {}", e))
        })?;

        tx.execute("DELETE FROM tx_in_blocks WHERE txid = ?1", params![txid])?;
        let removed = tx.execute(
            "DELETE FROM tracked_transactions WHERE txid = ?1",
            params![txid],
        )?;

        tx.commit().map_err(|e| {
            ReorgError::Persistence(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(removed > 0)
    }

    // ------------------------------------------------------------------
    // Summaries
    // ------------------------------------------------------------------

    fn totals(conn: &Connection, side: Option<Side>) -> Result<SummaryTotals> {
        let sql = "SELECT COUNT(*), MIN(height), MAX(height), MIN(date), MAX(date) FROM blocks";
        let map = |row: &Row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        };
        let (count, min_h, max_h, min_d, max_d) = match side {
            Some(side) => conn.query_row(
                &format!("{} WHERE {}", sql, ON_SIDE),
                params![side],
                map,
            )?,
            None => conn.query_row(sql, [], map)?,
        };

        Ok(SummaryTotals {
            count: count as u64,
            height_range: height_range(min_h, max_h),
            date_range: match (min_d, max_d) {
                (Some(earliest), Some(latest)) => Some(DateRange { earliest, latest }),
                _ => None,
            },
        })
    }

    pub fn blocks_summary(&self) -> Result<BlocksSummary> {
        let conn = self.conn()?;
        let total = Self::totals(&conn, None)?;

        let mut by_side = BTreeMap::new();
        for side in Side::BOTH {
            by_side.insert(side, Self::totals(&conn, Some(side))?);
        }

        let mut stmt = conn.prepare(
            "SELECT coinbase_message, COUNT(*), MIN(height), MAX(height)
             FROM blocks GROUP BY coinbase_message ORDER BY COUNT(*) DESC",
        )?;
        let groups = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let by_coinbase = groups
            .into_iter()
            .map(|(message, count, min, max)| {
                (
                    message,
                    CoinbaseGroup {
                        count: count as u64,
                        height_range: HeightRange {
                            min: min as u64,
                            max: max as u64,
                        },
                    },
                )
            })
            .collect();

        Ok(BlocksSummary {
            total,
            by_coinbase,
            by_side,
        })
    }

    /// Dates that have blocks, newest first, with per-side counts.
    ///
    /// A block both nodes report counts once in `total_blocks`.
    pub fn available_dates(&self) -> Result<Vec<DateSummary>> {
        let conn = self.conn()?;

        let mut totals = conn.prepare("SELECT date, COUNT(*) FROM blocks GROUP BY date")?;
        let mut dates: BTreeMap<String, DateSummary> = totals
            .query_map([], |row| {
                let date: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((
                    date.clone(),
                    DateSummary {
                        date,
                        public_blocks: 0,
                        private_blocks: 0,
                        total_blocks: count as u64,
                    },
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut per_side = conn.prepare(
            "SELECT b.date, s.side, COUNT(*) FROM block_sides s
             JOIN blocks b ON b.hash = s.hash
             GROUP BY b.date, s.side",
        )?;
        let rows = per_side
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Side>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (date, side, count) in rows {
            if let Some(entry) = dates.get_mut(&date) {
                match side {
                    Side::Public => entry.public_blocks = count as u64,
                    Side::Private => entry.private_blocks = count as u64,
                }
            }
        }
        Ok(dates.into_values().rev().collect())
    }

    pub fn database_stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn()?;
        let side_stats = |side: Side| -> Result<SideStats> {
            let totals = Self::totals(&conn, Some(side))?;
            Ok(match totals.height_range {
                Some(range) => SideStats {
                    total_blocks: totals.count,
                    min_height: Some(range.min),
                    max_height: Some(range.max),
                    height_span: range.max - range.min + 1,
                },
                None => SideStats::default(),
            })
        };

        let public_network = side_stats(Side::Public)?;
        let private_network = side_stats(Side::Private)?;
        let tracked: i64 =
            conn.query_row("SELECT COUNT(*) FROM tracked_transactions", [], |row| row.get(0))?;
        let links: i64 = conn.query_row("SELECT COUNT(*) FROM tx_in_blocks", [], |row| row.get(0))?;

        Ok(DatabaseStats {
            public_network,
            private_network,
            total_transactions_tracked: tracked as u64,
            total_tx_block_links: links as u64,
        })
    }
}
