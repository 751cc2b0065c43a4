//! Hashing primitives for the ledger.
//! All block hashes are hex-encoded SHA-256 digests.

use sha2::{Digest, Sha256};

use crate::types::BlockData;

/// Hash data with SHA-256 and return hex string
pub fn hash_sha256(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    hex::encode(hash)
}

/// Block hash over `previous_hash ‖ nonce ‖ canonical(data)`.
///
/// Every node must produce byte-identical output for identical inputs.
pub fn hash_block(previous_hash: &str, data: &BlockData, nonce: u64) -> String {
    hash_block_bytes(previous_hash, &data.canonical_bytes(), nonce)
}

/// Same as [`hash_block`] with the block data already serialized.
/// Used by the nonce search so the data is encoded once.
pub fn hash_block_bytes(previous_hash: &str, data_bytes: &[u8], nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(data_bytes);
    hex::encode(hasher.finalize())
}
