//! Full-chain validation for candidate chains received from peers.

use thiserror::Error;

use super::pow::ProofOfWork;
use crate::crypto::hash_block_bytes;
use crate::types::Block;

/// Reason a chain failed validation. The first failing rule is reported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain is empty")]
    Empty,
    #[error("First block is not the genesis block")]
    BadGenesis,
    #[error("Block #{index}: expected index {expected}")]
    IndexGap { index: u64, expected: u64 },
    #[error("Block #{index}: previousBlockHash does not match predecessor hash")]
    BrokenLink { index: u64 },
    #[error("Block #{index}: stored hash does not match block contents")]
    HashMismatch { index: u64 },
    #[error("Block #{index}: hash does not meet difficulty target")]
    InsufficientWork { index: u64 },
}

/// Validate a whole chain. Any failure rejects the entire chain.
pub fn validate_chain(chain: &[Block], pow: &ProofOfWork) -> Result<(), ChainError> {
    let genesis = chain.first().ok_or(ChainError::Empty)?;
    if !genesis.is_genesis() {
        return Err(ChainError::BadGenesis);
    }

    for pair in chain.windows(2) {
        let (prev, block) = (&pair[0], &pair[1]);

        let expected = prev.index + 1;
        if block.index != expected {
            return Err(ChainError::IndexGap { index: block.index, expected });
        }
        if block.previous_block_hash != prev.hash {
            return Err(ChainError::BrokenLink { index: block.index });
        }
        let recomputed = hash_block_bytes(&block.previous_block_hash, &block.data_bytes(), block.nonce);
        if recomputed != block.hash {
            return Err(ChainError::HashMismatch { index: block.index });
        }
        if !pow.meets_difficulty(&block.hash) {
            return Err(ChainError::InsufficientWork { index: block.index });
        }
    }

    Ok(())
}

/// Boolean form of [`validate_chain`].
pub fn is_valid_chain(chain: &[Block], pow: &ProofOfWork) -> bool {
    validate_chain(chain, pow).is_ok()
}
