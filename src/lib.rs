//! ReorgWatch - dual-node chain sync and reorganization tracking
//!
//! Two full nodes of the same scrypt proof-of-work chain (a "public" and a
//! "private" instance) are polled into one local ledger, so that a private
//! chain built while partitioned can be watched replacing the public one.
//!
//! # Architecture
//!
//! ## Node Access
//! - [`rpc`] - JSON-RPC client and the [`rpc::ChainRpc`] capability
//! - [`network`] - Peer connect/disconnect and connection status
//!
//! ## Verification
//! - [`pow`] - Header serialization, scrypt hash, chainwork
//! - [`coinbase`] - Coinbase message extraction
//!
//! ## Ledger
//! - [`ledger`] - Block and tracked transaction records
//! - [`persistence`] - Database layer (SQLite)
//!
//! ## Synchronization
//! - [`sync`] - Bounded chain synchronization
//! - [`tracker`] - Transaction-to-block linkage
//! - [`manager`] - Orchestration across both nodes
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`response`] - Success/failure envelope

#![forbid(unsafe_code)]

// ============================================================================
// Node Access
// ============================================================================
pub mod network;
pub mod rpc;

// ============================================================================
// Verification
// ============================================================================
pub mod coinbase;
pub mod pow;

// ============================================================================
// Ledger
// ============================================================================
pub mod ledger;
pub mod persistence;

// ============================================================================
// Synchronization
// ============================================================================
pub mod manager;
pub mod sync;
pub mod tracker;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod response;

pub use error::{ReorgError, Result};
pub use ledger::Side;
pub use manager::ReorgManager;
