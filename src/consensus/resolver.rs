//! Longest-valid-chain consensus.
//!
//! Peers' snapshots are fetched without holding any lock. The ledger's write
//! lock is taken only for the final replacement, after re-checking that the
//! candidate is still strictly longer than the local chain.

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::validator::validate_chain;
use super::{short, ConsensusError, Ledger};
use crate::network::PeerClient;
use crate::types::ChainSnapshot;

/// What a consensus round did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusOutcome {
    /// Whether the local chain was replaced
    pub replaced: bool,
    /// Local chain length after the round
    pub chain_len: usize,
    /// Peers that returned a snapshot
    pub responded: usize,
    /// Peers that timed out or errored
    pub unreachable: usize,
    /// Peer whose chain was adopted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adopted_from: Option<String>,
    /// Why the longest candidate was discarded, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

/// Pick the peer snapshot to adopt, if any.
///
/// Only chains strictly longer than `local_len` qualify; the longest wins.
/// Equal lengths are broken by the lexicographically smallest tip hash, then
/// by peer URL, so every node makes the same choice for the same inputs.
pub fn select_candidate<'a>(
    local_len: usize,
    snapshots: &'a [(String, ChainSnapshot)],
) -> Option<&'a (String, ChainSnapshot)> {
    snapshots
        .iter()
        .filter(|(_, snap)| snap.chain.len() > local_len)
        .min_by(|(peer_a, a), (peer_b, b)| {
            b.chain
                .len()
                .cmp(&a.chain.len())
                .then_with(|| a.tip_hash().cmp(&b.tip_hash()))
                .then_with(|| peer_a.cmp(peer_b))
        })
}

/// Run one consensus round against `peers`.
pub async fn resolve(
    ledger: &RwLock<Ledger>,
    peers: &[String],
    client: &PeerClient,
) -> ConsensusOutcome {
    let results = client.fetch_snapshots(peers).await;

    let mut snapshots = Vec::with_capacity(results.len());
    let mut unreachable = 0;
    for (peer, result) in results {
        match result {
            Ok(snap) => snapshots.push((peer, snap)),
            Err(e) => {
                warn!("📡 {}", e);
                unreachable += 1;
            }
        }
    }
    let responded = snapshots.len();

    let (local_len, pow) = {
        let ledger = ledger.read().await;
        (ledger.chain_len(), ledger.pow().clone())
    };

    let mut outcome = ConsensusOutcome {
        replaced: false,
        chain_len: local_len,
        responded,
        unreachable,
        adopted_from: None,
        rejected: None,
    };

    let Some((peer, candidate)) = select_candidate(local_len, &snapshots) else {
        debug!("Consensus: local chain ({} blocks) is not behind any peer", local_len);
        return outcome;
    };

    if let Err(e) = validate_chain(&candidate.chain, &pow) {
        let err = ConsensusError::ChainInvalid(e);
        warn!("🚫 Chain from {} ({} blocks) discarded: {}", peer, candidate.chain.len(), err);
        outcome.rejected = Some(err.to_string());
        return outcome;
    }

    let mut ledger = ledger.write().await;
    if candidate.chain.len() <= ledger.chain_len() {
        debug!("Consensus: local chain grew past candidate from {} while validating", peer);
        outcome.chain_len = ledger.chain_len();
        return outcome;
    }

    info!(
        "🔗 Adopting chain from {}: {} blocks, tip {}...",
        peer,
        candidate.chain.len(),
        candidate.tip_hash().map(short).unwrap_or_default()
    );
    ledger.replace_chain(candidate.chain.clone(), candidate.pending_transactions.clone());

    outcome.replaced = true;
    outcome.chain_len = ledger.chain_len();
    outcome.adopted_from = Some(peer.clone());
    outcome
}
