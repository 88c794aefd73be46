//! Full-node integration module
//!
//! This module provides the JSON-RPC client and the validated response types the indexer
//! consumes from a full node: block and transaction fetches, chain tip, mempool listing and
//! raw-transaction broadcast.

/// JSON-RPC client and the `NodeRpc` capability trait
mod client;
/// Response shapes and node errors
mod types;

#[cfg(test)]
pub mod mock;

pub use client::{NodeRpc, NodeRpcClient};
pub use types::*;
