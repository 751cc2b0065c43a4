//! Proof-of-work nonce search.
//!
//! The difficulty predicate is "the hex hash starts with `target`". The
//! search is CPU-bound and synchronous; async callers run it on the
//! blocking pool.

use tracing::debug;

use super::ConsensusError;
use crate::crypto::hash_block_bytes;
use crate::types::BlockData;

/// Default difficulty target: four leading zeros
pub const DEFAULT_TARGET: &str = "0000";

/// A nonce together with the hash it produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub nonce: u64,
    pub hash: String,
}

/// Proof-of-work engine for a fixed difficulty target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfWork {
    target: String,
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self { target: DEFAULT_TARGET.to_string() }
    }
}

impl ProofOfWork {
    /// Build an engine for `target`. A target with non-hex characters could
    /// never be met and is rejected.
    pub fn new(target: impl Into<String>) -> Result<Self, ConsensusError> {
        let target = target.into();
        if !target.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
            return Err(ConsensusError::InvalidDifficulty(target));
        }
        Ok(Self { target })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The difficulty predicate.
    pub fn meets_difficulty(&self, hash: &str) -> bool {
        hash.starts_with(&self.target)
    }

    /// Search nonces from 0 upward until the block hash meets the target.
    pub fn find_nonce(&self, previous_hash: &str, data: &BlockData) -> u64 {
        self.solve(previous_hash, data).nonce
    }

    /// Like [`find_nonce`](Self::find_nonce) but also returns the winning hash.
    pub fn solve(&self, previous_hash: &str, data: &BlockData) -> Proof {
        let bytes = data.canonical_bytes();
        let mut nonce = 0u64;
        loop {
            let hash = hash_block_bytes(previous_hash, &bytes, nonce);
            if self.meets_difficulty(&hash) {
                debug!("⛏️  Nonce {} found for block #{}", nonce, data.index);
                return Proof { nonce, hash };
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}
