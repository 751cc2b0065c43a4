//! Proof-of-work ledger: the authoritative chain plus the pending pool.
//!
//! Mutations that change the chain (`commit_block`, `accept_foreign_block`,
//! `replace_chain`) take `&mut self`; the node keeps the ledger behind a
//! single `RwLock` so they are serialized against each other.

pub mod pow;
pub mod resolver;
pub mod validator;

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::hash_block_bytes;
use crate::types::{
    current_time_ms, AddressData, Block, BlockData, ChainSnapshot, Transaction,
};
use pow::{Proof, ProofOfWork};
pub use validator::ChainError;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Block #{index} rejected: {reason}")]
    BlockRejected { index: u64, reason: String },
    #[error("Candidate chain invalid: {0}")]
    ChainInvalid(#[from] ChainError),
    #[error("Mining result is stale: mined on {expected}, tip is now {actual}")]
    StaleMiningResult { expected: String, actual: String },
    #[error("Mining task aborted: {0}")]
    MiningAborted(String),
    #[error("Invalid difficulty target: {0:?}")]
    InvalidDifficulty(String),
}

/// Configuration for the ledger and its consensus loop
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Difficulty target shared by every node of the network
    pub pow: ProofOfWork,
    /// Background consensus poll period in milliseconds
    pub consensus_interval_ms: u64,
    /// Reward credited to this node after each block it mines (disabled when `None`)
    pub mining_reward: Option<f64>,
    /// How many times `/mine` retries after a stale result
    pub max_mining_attempts: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            pow: ProofOfWork::default(),
            consensus_interval_ms: 10_000,
            mining_reward: None,
            max_mining_attempts: 3,
        }
    }
}

/// Immutable input to a nonce search
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBlock {
    pub previous_block_hash: String,
    pub data: BlockData,
}

/// Reject transactions that are structurally unusable.
pub fn validate_transaction(tx: &Transaction) -> Result<(), ConsensusError> {
    if !tx.amount.is_finite() || tx.amount <= 0.0 {
        return Err(ConsensusError::InvalidTransaction(format!(
            "amount must be a positive number, got {}",
            tx.amount
        )));
    }
    if tx.sender.trim().is_empty() {
        return Err(ConsensusError::InvalidTransaction("sender is empty".into()));
    }
    if tx.recipient.trim().is_empty() {
        return Err(ConsensusError::InvalidTransaction("recipient is empty".into()));
    }
    if tx.transaction_id.trim().is_empty() {
        return Err(ConsensusError::InvalidTransaction("transactionId is empty".into()));
    }
    Ok(())
}

/// The node's chain and pending pool
pub struct Ledger {
    config: ConsensusConfig,
    /// Never empty: index 0 is always the genesis block
    chain: Vec<Block>,
    pending_transactions: Vec<Transaction>,
}

impl Ledger {
    /// Create a ledger holding only a fresh genesis block
    pub fn new(config: ConsensusConfig) -> Self {
        info!("🌱 Genesis block created (difficulty target {:?})", config.pow.target());
        Self {
            config,
            chain: vec![Block::genesis()],
            pending_transactions: Vec::new(),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.config.pow
    }

    /// Mint and validate a new transaction (not yet queued).
    pub fn create_transaction(
        &self,
        amount: f64,
        sender: &str,
        recipient: &str,
    ) -> Result<Transaction, ConsensusError> {
        let tx = Transaction::new(amount, sender.trim(), recipient.trim());
        validate_transaction(&tx)?;
        Ok(tx)
    }

    /// Add a transaction to the pending pool.
    ///
    /// Returns the index of the block it is expected to land in. Advisory only.
    /// Re-delivering a transaction that is already pending is a no-op.
    pub fn queue_transaction(&mut self, tx: Transaction) -> Result<u64, ConsensusError> {
        validate_transaction(&tx)?;
        let next_index = self.last_block().index + 1;

        if self
            .pending_transactions
            .iter()
            .any(|p| p.transaction_id == tx.transaction_id)
        {
            debug!("Transaction {} already pending", tx.transaction_id);
            return Ok(next_index);
        }

        debug!("📨 Transaction queued: {} → {} ({})", tx.sender, tx.recipient, tx.amount);
        self.pending_transactions.push(tx);
        Ok(next_index)
    }

    /// Snapshot the input for the next nonce search. Does not mutate state.
    pub fn build_candidate_block(&self) -> CandidateBlock {
        let last = self.last_block();
        CandidateBlock {
            previous_block_hash: last.hash.clone(),
            data: BlockData {
                transactions: self.pending_transactions.clone(),
                index: last.index + 1,
            },
        }
    }

    /// Append a block mined locally from `candidate`.
    ///
    /// Fails with `StaleMiningResult` when the tip moved since the candidate
    /// was built. Transactions that entered the pool after the snapshot stay
    /// pending.
    pub fn commit_block(
        &mut self,
        candidate: &CandidateBlock,
        proof: Proof,
    ) -> Result<Block, ConsensusError> {
        let last = self.last_block();
        if last.hash != candidate.previous_block_hash || last.index + 1 != candidate.data.index {
            warn!(
                "⏱️  Stale mining result for block #{} (tip is now #{})",
                candidate.data.index, last.index
            );
            return Err(ConsensusError::StaleMiningResult {
                expected: candidate.previous_block_hash.clone(),
                actual: last.hash.clone(),
            });
        }

        let block = Block {
            index: candidate.data.index,
            timestamp: current_time_ms(),
            transactions: candidate.data.transactions.clone(),
            nonce: proof.nonce,
            hash: proof.hash,
            previous_block_hash: candidate.previous_block_hash.clone(),
        };

        let mined: HashSet<&str> = block
            .transactions
            .iter()
            .map(|t| t.transaction_id.as_str())
            .collect();
        self.pending_transactions
            .retain(|t| !mined.contains(t.transaction_id.as_str()));

        info!(
            "⛓️  Block #{} committed: {} tx, hash {}...",
            block.index,
            block.transactions.len(),
            short(&block.hash)
        );
        self.chain.push(block.clone());
        Ok(block)
    }

    /// Accept a block mined by a peer if it extends the current tip.
    ///
    /// On acceptance the pending pool is cleared. A rejected block leaves
    /// the ledger untouched; forks are reconciled later by consensus.
    pub fn accept_foreign_block(&mut self, block: Block) -> Result<(), ConsensusError> {
        let last = self.last_block();
        let reject = |reason: &str| {
            warn!("❌ Block #{} rejected: {}", block.index, reason);
            Err(ConsensusError::BlockRejected {
                index: block.index,
                reason: reason.to_string(),
            })
        };

        if block.previous_block_hash != last.hash {
            return reject("previousBlockHash does not match local tip");
        }
        if block.index != last.index + 1 {
            return reject("index does not follow local tip");
        }
        let recomputed = hash_block_bytes(&block.previous_block_hash, &block.data_bytes(), block.nonce);
        if recomputed != block.hash {
            return reject("hash does not match block contents");
        }
        if !self.config.pow.meets_difficulty(&block.hash) {
            return reject("hash does not meet difficulty target");
        }

        info!("📥 Block #{} accepted from peer: hash {}...", block.index, short(&block.hash));
        self.chain.push(block);
        self.pending_transactions.clear();
        Ok(())
    }

    /// Overwrite chain and pending pool.
    ///
    /// Performs no validation: the consensus resolver validates first. An
    /// empty chain is the one input refused, since the ledger always holds
    /// genesis.
    pub fn replace_chain(&mut self, chain: Vec<Block>, pending: Vec<Transaction>) {
        if chain.is_empty() {
            warn!("Refusing to replace chain with an empty chain");
            return;
        }
        info!(
            "🔄 Chain replaced: {} → {} blocks, {} pending",
            self.chain.len(),
            chain.len(),
            pending.len()
        );
        self.chain = chain;
        self.pending_transactions = pending;
    }

    /// Latest block
    pub fn last_block(&self) -> &Block {
        self.chain.last().expect("ledger chain always holds genesis")
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    /// Owned copy of the chain and pending pool, as served to peers
    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            chain: self.chain.clone(),
            pending_transactions: self.pending_transactions.clone(),
        }
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &str) -> Option<&Block> {
        self.chain.iter().find(|b| b.hash == hash)
    }

    /// Find a mined transaction and the block holding it
    pub fn get_transaction(&self, transaction_id: &str) -> Option<(&Transaction, &Block)> {
        self.chain.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|t| t.transaction_id == transaction_id)
                .map(|t| (t, block))
        })
    }

    /// Every mined transaction touching `address`, and the balance they imply.
    pub fn address_data(&self, address: &str) -> AddressData {
        let address_transactions: Vec<Transaction> = self
            .chain
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|t| t.sender == address || t.recipient == address)
            .cloned()
            .collect();

        let address_balance = address_transactions.iter().fold(0.0, |balance, t| {
            let mut balance = balance;
            if t.recipient == address {
                balance += t.amount;
            }
            if t.sender == address && !t.is_system() {
                balance -= t.amount;
            }
            balance
        });

        AddressData { address_transactions, address_balance }
    }
}

/// First 16 characters of a hash, for logs
pub(crate) fn short(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn easy_config() -> ConsensusConfig {
        ConsensusConfig {
            pow: ProofOfWork::new("00").unwrap(),
            ..Default::default()
        }
    }

    fn mine(ledger: &mut Ledger) -> Block {
        let candidate = ledger.build_candidate_block();
        let proof = ledger.pow().solve(&candidate.previous_block_hash, &candidate.data);
        ledger.commit_block(&candidate, proof).unwrap()
    }

    /// A block mined on top of `ledger`'s tip without committing it
    fn mine_detached(ledger: &Ledger) -> Block {
        let candidate = ledger.build_candidate_block();
        let proof = ledger.pow().solve(&candidate.previous_block_hash, &candidate.data);
        Block {
            index: candidate.data.index,
            timestamp: current_time_ms(),
            transactions: candidate.data.transactions,
            nonce: proof.nonce,
            hash: proof.hash,
            previous_block_hash: candidate.previous_block_hash,
        }
    }

    fn tx(amount: f64) -> Transaction {
        Transaction::new(amount, "u1", "u2")
    }

    #[test]
    fn test_new_ledger_holds_genesis() {
        let ledger = Ledger::new(easy_config());
        assert_eq!(ledger.chain_len(), 1);
        assert!(ledger.last_block().is_genesis());
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_queue_returns_next_block_index() {
        let mut ledger = Ledger::new(easy_config());
        assert_eq!(ledger.queue_transaction(tx(10.0)).unwrap(), 2);
        mine(&mut ledger);
        assert_eq!(ledger.queue_transaction(tx(5.0)).unwrap(), 3);
    }

    #[test]
    fn test_invalid_transactions_rejected() {
        let mut ledger = Ledger::new(easy_config());
        assert_err!(ledger.queue_transaction(tx(0.0)));
        assert_err!(ledger.queue_transaction(tx(f64::NAN)));
        assert_err!(ledger.queue_transaction(Transaction::new(1.0, "u1", "  ")));
        assert_err!(ledger.create_transaction(1.0, "", "u2"));
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_duplicate_pending_transaction_ignored() {
        let mut ledger = Ledger::new(easy_config());
        let t = tx(1.0);
        assert_ok!(ledger.queue_transaction(t.clone()));
        assert_ok!(ledger.queue_transaction(t));
        assert_eq!(ledger.pending_transactions().len(), 1);
    }

    #[test]
    fn test_candidate_is_read_only_snapshot() {
        let mut ledger = Ledger::new(easy_config());
        ledger.queue_transaction(tx(10.0)).unwrap();
        let candidate = ledger.build_candidate_block();
        assert_eq!(candidate.data.index, 2);
        assert_eq!(candidate.previous_block_hash, "0");
        assert_eq!(candidate.data.transactions.len(), 1);
        assert_eq!(ledger.pending_transactions().len(), 1);
        assert_eq!(ledger.chain_len(), 1);
    }

    #[test]
    fn test_mine_scenario_from_genesis() {
        let mut ledger = Ledger::new(easy_config());
        let t = tx(10.0);
        ledger.queue_transaction(t.clone()).unwrap();

        let block = mine(&mut ledger);
        assert_eq!(block.index, 2);
        assert_eq!(block.transactions, vec![t]);
        assert_eq!(block.previous_block_hash, "0");

        let recomputed = hash_block_bytes(&block.previous_block_hash, &block.data_bytes(), block.nonce);
        assert_eq!(recomputed, block.hash);
        assert!(ledger.pow().meets_difficulty(&recomputed));
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_stale_commit_rejected() {
        let mut ledger = Ledger::new(easy_config());
        let candidate = ledger.build_candidate_block();
        let proof = ledger.pow().solve(&candidate.previous_block_hash, &candidate.data);

        mine(&mut ledger);

        let err = ledger.commit_block(&candidate, proof).unwrap_err();
        assert!(matches!(err, ConsensusError::StaleMiningResult { .. }));
        assert_eq!(ledger.chain_len(), 2);
    }

    #[test]
    fn test_transactions_arriving_during_search_stay_pending() {
        let mut ledger = Ledger::new(easy_config());
        ledger.queue_transaction(tx(1.0)).unwrap();
        let candidate = ledger.build_candidate_block();
        let proof = ledger.pow().solve(&candidate.previous_block_hash, &candidate.data);

        let late = tx(2.0);
        ledger.queue_transaction(late.clone()).unwrap();
        let block = ledger.commit_block(&candidate, proof).unwrap();

        assert_eq!(block.transactions.len(), 1);
        assert_eq!(ledger.pending_transactions(), &[late]);
    }

    #[test]
    fn test_accept_foreign_block() {
        let mut producer = Ledger::new(easy_config());
        let mut receiver = Ledger::new(easy_config());
        receiver.queue_transaction(tx(3.0)).unwrap();

        producer.queue_transaction(tx(1.0)).unwrap();
        let block = mine(&mut producer);

        assert_ok!(receiver.accept_foreign_block(block.clone()));
        assert_eq!(receiver.chain_len(), 2);
        assert_eq!(receiver.last_block(), &block);
        assert!(receiver.pending_transactions().is_empty());
    }

    #[test]
    fn test_duplicate_foreign_block_rejected() {
        let mut producer = Ledger::new(easy_config());
        let mut receiver = Ledger::new(easy_config());
        let block = mine(&mut producer);

        receiver.accept_foreign_block(block.clone()).unwrap();
        let err = receiver.accept_foreign_block(block).unwrap_err();
        assert!(matches!(err, ConsensusError::BlockRejected { index: 2, .. }));
        assert_eq!(receiver.chain_len(), 2);
    }

    #[test]
    fn test_foreign_block_with_wrong_parent_rejected() {
        let mut receiver = Ledger::new(easy_config());
        let mut block = mine_detached(&receiver);
        block.previous_block_hash = "ffff".into();
        receiver.queue_transaction(tx(1.0)).unwrap();

        assert_err!(receiver.accept_foreign_block(block));
        assert_eq!(receiver.chain_len(), 1);
        assert_eq!(receiver.pending_transactions().len(), 1);
    }

    #[test]
    fn test_foreign_block_with_forged_hash_rejected() {
        let mut receiver = Ledger::new(easy_config());
        let mut block = mine_detached(&receiver);
        block.transactions.push(tx(99.0));
        assert_err!(receiver.accept_foreign_block(block));
        assert_eq!(receiver.chain_len(), 1);
    }

    #[test]
    fn test_commit_and_accept_sequences_stay_valid() {
        let mut a = Ledger::new(easy_config());
        let mut b = Ledger::new(easy_config());
        for round in 0..4 {
            a.queue_transaction(tx(round as f64 + 1.0)).unwrap();
            let block = if round % 2 == 0 {
                let block = mine(&mut a);
                b.accept_foreign_block(block.clone()).unwrap();
                block
            } else {
                let block = mine_detached(&b);
                b.accept_foreign_block(block.clone()).unwrap();
                a.accept_foreign_block(block.clone()).unwrap();
                block
            };
            assert_eq!(a.last_block(), &block);
        }
        assert!(validator::is_valid_chain(a.chain(), a.pow()));
        assert!(validator::is_valid_chain(b.chain(), b.pow()));
    }

    #[test]
    fn test_chain_validates_after_json_round_trip() {
        let mut ledger = Ledger::new(easy_config());
        let reward: f64 = "0.11000000000000001".parse().unwrap();
        for _ in 0..2 {
            assert_ok!(ledger.queue_transaction(Transaction::new(reward, crate::types::SYSTEM_SENDER, "miner")));
            mine(&mut ledger);
        }

        let wire = serde_json::to_string(&ledger.snapshot()).unwrap();
        let received: ChainSnapshot = serde_json::from_str(&wire).unwrap();
        assert!(validator::is_valid_chain(&received.chain, ledger.pow()));

        // A peer holding only the first block accepts the second as sent
        let mut peer = Ledger::new(easy_config());
        peer.replace_chain(received.chain[..2].to_vec(), Vec::new());
        assert_ok!(peer.accept_foreign_block(received.chain[2].clone()));
    }

    #[test]
    fn test_replace_chain_overwrites_state() {
        let mut donor = Ledger::new(easy_config());
        mine(&mut donor);
        mine(&mut donor);
        donor.queue_transaction(tx(4.0)).unwrap();

        let mut ledger = Ledger::new(easy_config());
        ledger.queue_transaction(tx(9.0)).unwrap();
        let snap = donor.snapshot();
        ledger.replace_chain(snap.chain.clone(), snap.pending_transactions.clone());

        assert_eq!(ledger.snapshot(), snap);
    }

    #[test]
    fn test_replace_with_empty_chain_refused() {
        let mut ledger = Ledger::new(easy_config());
        ledger.replace_chain(Vec::new(), Vec::new());
        assert_eq!(ledger.chain_len(), 1);
    }

    #[test]
    fn test_lookup_queries() {
        let mut ledger = Ledger::new(easy_config());
        let t1 = Transaction::new(10.0, "00", "alice");
        let t2 = Transaction::new(4.0, "alice", "bob");
        ledger.queue_transaction(t1.clone()).unwrap();
        mine(&mut ledger);
        ledger.queue_transaction(t2.clone()).unwrap();
        let block = mine(&mut ledger);

        assert_eq!(ledger.get_block(&block.hash), Some(&block));
        assert!(ledger.get_block("nope").is_none());

        let (found, holder) = ledger.get_transaction(&t2.transaction_id).unwrap();
        assert_eq!(found, &t2);
        assert_eq!(holder.index, 3);

        let alice = ledger.address_data("alice");
        assert_eq!(alice.address_transactions.len(), 2);
        assert_eq!(alice.address_balance, 6.0);
        assert_eq!(ledger.address_data("bob").address_balance, 4.0);
        assert!(ledger.address_data("carol").address_transactions.is_empty());
    }
}
