//! Core data types for the ledger: transactions, blocks and chain snapshots.
//!
//! Field names follow the JSON wire format shared by every node
//! (`transactionId`, `previousBlockHash`, `pendingTransactions`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index of the genesis block.
pub const GENESIS_INDEX: u64 = 1;
/// Nonce recorded in the genesis block.
pub const GENESIS_NONCE: u64 = 100;
/// Hash recorded in the genesis block.
pub const GENESIS_HASH: &str = "0";
/// Previous-hash recorded in the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";
/// Sender used for system-minted (reward) transactions.
pub const SYSTEM_SENDER: &str = "00";

/// A value transfer between two identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub amount: f64,
    pub sender: String,
    pub recipient: String,
    /// UUID without dashes
    pub transaction_id: String,
}

impl Transaction {
    /// Mint a transaction with a fresh identifier.
    pub fn new(amount: f64, sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            amount,
            sender: sender.into(),
            recipient: recipient.into(),
            transaction_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Whether this transaction was minted by the system rather than a real sender.
    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }
}

/// The hashed portion of a block: its transactions and index.
///
/// Serialization order (`transactions`, then `index`) is part of the hash
/// input and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    pub transactions: Vec<Transaction>,
    pub index: u64,
}

impl BlockData {
    /// Canonical JSON bytes fed into the block hash.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_block_data(&self.transactions, self.index)
    }
}

#[derive(Serialize)]
struct BlockDataRef<'a> {
    transactions: &'a [Transaction],
    index: u64,
}

/// Serialize `{transactions, index}` without cloning the transactions.
pub(crate) fn canonical_block_data(transactions: &[Transaction], index: u64) -> Vec<u8> {
    // Strings and numbers only; serde_json cannot fail on this shape.
    serde_json::to_vec(&BlockDataRef { transactions, index })
        .expect("block data is always representable as JSON")
}

/// A mined block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub hash: String,
    pub previous_block_hash: String,
}

impl Block {
    /// The fixed root block every chain starts from.
    pub fn genesis() -> Self {
        Self {
            index: GENESIS_INDEX,
            timestamp: current_time_ms(),
            transactions: Vec::new(),
            nonce: GENESIS_NONCE,
            hash: GENESIS_HASH.to_string(),
            previous_block_hash: GENESIS_PREVIOUS_HASH.to_string(),
        }
    }

    /// Genesis check. The timestamp differs per node and is ignored.
    pub fn is_genesis(&self) -> bool {
        self.index == GENESIS_INDEX
            && self.nonce == GENESIS_NONCE
            && self.hash == GENESIS_HASH
            && self.previous_block_hash == GENESIS_PREVIOUS_HASH
            && self.transactions.is_empty()
    }

    /// Canonical bytes of this block's `{transactions, index}`.
    pub fn data_bytes(&self) -> Vec<u8> {
        canonical_block_data(&self.transactions, self.index)
    }
}

/// A serialized view of a node's ledger, as exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub chain: Vec<Block>,
    #[serde(default)]
    pub pending_transactions: Vec<Transaction>,
}

impl ChainSnapshot {
    /// Hash of the last block, if any.
    pub fn tip_hash(&self) -> Option<&str> {
        self.chain.last().map(|b| b.hash.as_str())
    }
}

/// Transactions touching an address and the balance derived from them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressData {
    pub address_transactions: Vec<Transaction>,
    pub address_balance: f64,
}

/// Current time in milliseconds
pub fn current_time_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
