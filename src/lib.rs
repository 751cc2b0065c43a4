//! Ledger Network Node Library
//!
//! A proof-of-work ledger node that keeps a replicated chain in step with
//! its HTTP peers through gossip and longest-valid-chain consensus.
//!
//! ## Modules
//!
//! - `types` - Core data structures (Transaction, Block, ChainSnapshot)
//! - `crypto` - SHA-256 block hashing
//! - `consensus` - Ledger state, proof of work, validation and chain resolution
//! - `network` - Peer registry and HTTP peer client
//! - `node` - A running node tying ledger, peers and events together
//! - `api` - HTTP API and live event feed
//! - `config` - Command-line configuration

pub mod types;
pub mod crypto;
pub mod consensus;
pub mod network;
pub mod node;
pub mod api;
pub mod config;

pub use types::*;
pub use consensus::{ConsensusConfig, Ledger};
pub use node::Node;
