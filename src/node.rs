//! A running ledger node: ledger, peer registry, peer client and event feed.
//!
//! Locks are never held across a peer call or the nonce search.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::events::{EventLog, NodeEvent};
use crate::api::websocket::WsBroadcaster;
use crate::consensus::resolver::{self, ConsensusOutcome};
use crate::consensus::{ConsensusConfig, ConsensusError, Ledger};
use crate::network::registry::normalize_url;
use crate::network::{DeliveryReport, PeerClient, PeerRegistry};
use crate::types::{current_time_ms, Block, Transaction, SYSTEM_SENDER};

/// Result of a successful `/mine`
#[derive(Debug, Clone)]
pub struct MineOutcome {
    pub block: Block,
    pub delivery: DeliveryReport,
    /// Reward transaction queued for the next block, when rewards are enabled
    pub reward: Option<Transaction>,
}

/// Result of `/register-and-broadcast-node`
#[derive(Debug, Clone)]
pub enum Registration {
    /// The URL was blank or this node's own address
    Refused,
    Completed {
        delivery: DeliveryReport,
        bulk_delivered: bool,
    },
}

pub struct Node {
    pub ledger: RwLock<Ledger>,
    pub peers: RwLock<PeerRegistry>,
    pub client: PeerClient,
    /// Identifier credited by mining rewards
    pub node_address: String,
    pub events: EventLog,
    pub ws: WsBroadcaster,
}

impl Node {
    pub fn new(config: ConsensusConfig, self_address: &str, peer_timeout: Duration) -> Self {
        Self {
            ledger: RwLock::new(Ledger::new(config)),
            peers: RwLock::new(PeerRegistry::new(self_address)),
            client: PeerClient::new(peer_timeout),
            node_address: Uuid::new_v4().simple().to_string(),
            events: EventLog::new(),
            ws: WsBroadcaster::new(256),
        }
    }

    pub async fn self_address(&self) -> String {
        self.peers.read().await.self_address().to_string()
    }

    pub async fn peer_list(&self) -> Vec<String> {
        self.peers.read().await.peers()
    }

    /// Log an event and push it to WebSocket subscribers
    pub async fn record(&self, event: NodeEvent) {
        self.ws.broadcast(event.clone());
        self.events.push(event).await;
    }

    /// Queue a transaction locally. Returns the advisory block index.
    pub async fn queue_transaction(&self, tx: Transaction) -> Result<u64, ConsensusError> {
        let block_index = self.ledger.write().await.queue_transaction(tx.clone())?;
        self.record(NodeEvent::TransactionQueued {
            timestamp: current_time_ms(),
            transaction_id: tx.transaction_id,
            sender: tx.sender,
            recipient: tx.recipient,
            amount: tx.amount,
            block_index,
        })
        .await;
        Ok(block_index)
    }

    /// Mint a transaction, queue it and send it to every peer.
    pub async fn create_and_broadcast_transaction(
        &self,
        amount: f64,
        sender: &str,
        recipient: &str,
    ) -> Result<(Transaction, DeliveryReport), ConsensusError> {
        let tx = self.ledger.read().await.create_transaction(amount, sender, recipient)?;
        self.queue_transaction(tx.clone()).await?;

        let peers = self.peer_list().await;
        let delivery = self.client.broadcast_transaction(&peers, &tx).await;
        Ok((tx, delivery))
    }

    /// Mine the pending pool into a new block and broadcast it.
    ///
    /// The search runs on the blocking pool with no lock held. A commit that
    /// finds the chain advanced is retried with a fresh snapshot, up to the
    /// configured number of attempts.
    pub async fn mine(&self) -> Result<MineOutcome, ConsensusError> {
        let max_attempts = self.ledger.read().await.config().max_mining_attempts.max(1);
        let mut attempt = 1;

        let block = loop {
            let (candidate, pow) = {
                let ledger = self.ledger.read().await;
                (ledger.build_candidate_block(), ledger.pow().clone())
            };

            let search = candidate.clone();
            let proof = tokio::task::spawn_blocking(move || {
                pow.solve(&search.previous_block_hash, &search.data)
            })
            .await
            .map_err(|e| ConsensusError::MiningAborted(e.to_string()))?;

            let committed = self.ledger.write().await.commit_block(&candidate, proof);
            match committed {
                Ok(block) => break block,
                Err(ConsensusError::StaleMiningResult { .. }) if attempt < max_attempts => {
                    attempt += 1;
                    info!("⛏️  Chain advanced during search, retrying (attempt {}/{})", attempt, max_attempts);
                }
                Err(e) => return Err(e),
            }
        };

        let peers = self.peer_list().await;
        let delivery = self.client.broadcast_block(&peers, &block).await;
        if !delivery.all_delivered() {
            warn!(
                "Block #{} reached {}/{} peers",
                block.index,
                delivery.delivered.len(),
                delivery.attempted()
            );
        }

        self.record(NodeEvent::BlockMined {
            timestamp: current_time_ms(),
            index: block.index,
            hash: block.hash.clone(),
            transactions: block.transactions.len(),
            delivered: delivery.delivered.clone(),
            failed: delivery.failed.clone(),
        })
        .await;

        let mining_reward = self.ledger.read().await.config().mining_reward;
        let reward = match mining_reward {
            Some(amount) => Some(self.credit_reward(amount, &peers).await?),
            None => None,
        };

        Ok(MineOutcome { block, delivery, reward })
    }

    /// Queue and broadcast the reward for the block just mined.
    async fn credit_reward(&self, amount: f64, peers: &[String]) -> Result<Transaction, ConsensusError> {
        let tx = Transaction::new(amount, SYSTEM_SENDER, self.node_address.as_str());
        self.queue_transaction(tx.clone()).await?;
        self.client.broadcast_transaction(peers, &tx).await;
        Ok(tx)
    }

    /// Accept or reject a block announced by a peer.
    pub async fn receive_block(&self, block: Block) -> Result<(), ConsensusError> {
        let (index, hash) = (block.index, block.hash.clone());
        let result = self.ledger.write().await.accept_foreign_block(block);

        let event = match &result {
            Ok(()) => NodeEvent::BlockAccepted { timestamp: current_time_ms(), index, hash },
            Err(e) => NodeEvent::BlockRejected {
                timestamp: current_time_ms(),
                index,
                reason: e.to_string(),
            },
        };
        self.record(event).await;
        result
    }

    /// Add a single peer. Returns whether it was new.
    pub async fn register_peer(&self, url: &str) -> bool {
        let added = self.peers.write().await.register(url);
        if added {
            info!("🤝 Registered peer {}", normalize_url(url));
            self.record(NodeEvent::PeerRegistered {
                timestamp: current_time_ms(),
                url: normalize_url(url),
            })
            .await;
        }
        added
    }

    /// Merge a full node list received from an introducer.
    pub async fn register_bulk(&self, urls: &[String]) -> usize {
        let new_peers: Vec<String> = {
            let mut peers = self.peers.write().await;
            let before: HashSet<String> = peers.peers().into_iter().collect();
            peers.merge_bulk(urls);
            peers.peers().into_iter().filter(|p| !before.contains(p)).collect()
        };

        if !new_peers.is_empty() {
            info!("🤝 Bulk registration added {} peers", new_peers.len());
        }
        for url in &new_peers {
            self.record(NodeEvent::PeerRegistered {
                timestamp: current_time_ms(),
                url: url.clone(),
            })
            .await;
        }
        new_peers.len()
    }

    /// Register a newcomer, tell every known peer about it, then hand the
    /// newcomer the complete node list. Best effort throughout.
    pub async fn register_and_broadcast(&self, new_node_url: &str) -> Registration {
        let new_node_url = normalize_url(new_node_url);
        if new_node_url.is_empty() || new_node_url == self.self_address().await {
            return Registration::Refused;
        }

        self.register_peer(&new_node_url).await;

        let others: Vec<String> = self
            .peer_list()
            .await
            .into_iter()
            .filter(|peer| *peer != new_node_url)
            .collect();
        let delivery = self.client.broadcast_peer_registration(&others, &new_node_url).await;

        let all_nodes = self.peers.read().await.all_nodes();
        let bulk_delivered = match self.client.send_bulk_registration(&new_node_url, all_nodes).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Bulk registration to newcomer failed: {}", e);
                false
            }
        };

        Registration::Completed { delivery, bulk_delivered }
    }

    /// One longest-valid-chain round against the current peers.
    pub async fn run_consensus(&self) -> ConsensusOutcome {
        let peers = self.peer_list().await;
        let outcome = resolver::resolve(&self.ledger, &peers, &self.client).await;
        if let (true, Some(peer)) = (outcome.replaced, &outcome.adopted_from) {
            self.record(NodeEvent::ChainReplaced {
                timestamp: current_time_ms(),
                peer: peer.clone(),
                chain_len: outcome.chain_len,
            })
            .await;
        }
        outcome
    }

    /// Introduce this node to the network through `seed`.
    pub async fn announce_to_seed(&self, seed: &str) {
        let self_address = self.self_address().await;
        if normalize_url(seed) == self_address {
            return;
        }
        match self.client.announce_to_seed(&normalize_url(seed), &self_address).await {
            Ok(()) => info!("📡 Registered with network via {}", seed),
            Err(e) => warn!("📡 Seed {} not reachable: {}", seed, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow::ProofOfWork;
    use crate::consensus::validator::is_valid_chain;
    use tokio_test::assert_ok;

    fn node(url: &str) -> Node {
        let config = ConsensusConfig {
            pow: ProofOfWork::new("0").unwrap(),
            ..Default::default()
        };
        Node::new(config, url, Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_mine_without_peers() {
        let node = node("http://localhost:3001");
        node.queue_transaction(Transaction::new(10.0, "u1", "u2")).await.unwrap();

        let outcome = node.mine().await.unwrap();
        assert_eq!(outcome.block.index, 2);
        assert_eq!(outcome.block.transactions.len(), 1);
        assert_eq!(outcome.delivery.attempted(), 0);
        assert!(outcome.reward.is_none());
        assert!(node.ledger.read().await.pending_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_mining_reward_queued_for_next_block() {
        let config = ConsensusConfig {
            pow: ProofOfWork::new("0").unwrap(),
            mining_reward: Some(12.5),
            ..Default::default()
        };
        let node = Node::new(config, "http://localhost:3001", Duration::from_millis(300));

        let outcome = node.mine().await.unwrap();
        let reward = outcome.reward.unwrap();
        assert!(reward.is_system());
        assert_eq!(reward.recipient, node.node_address);

        let ledger = node.ledger.read().await;
        assert_eq!(ledger.pending_transactions(), &[reward]);
    }

    fn node_with_attempts(difficulty: &str, attempts: u32) -> Node {
        let config = ConsensusConfig {
            pow: ProofOfWork::new(difficulty).unwrap(),
            max_mining_attempts: attempts,
            ..Default::default()
        };
        Node::new(config, "http://localhost:3001", Duration::from_millis(300))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mines_all_commit() {
        // Each search can be overtaken at most twice, by the other two commits
        let node = node_with_attempts("000", 3);
        let (a, b, c) = tokio::join!(node.mine(), node.mine(), node.mine());
        assert_ok!(a);
        assert_ok!(b);
        assert_ok!(c);

        let ledger = node.ledger.read().await;
        assert_eq!(ledger.chain_len(), 4);
        assert!(is_valid_chain(ledger.chain(), ledger.pow()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_mines_leave_chain_valid() {
        let node = node_with_attempts("000", 1);
        let (a, b, c) = tokio::join!(node.mine(), node.mine(), node.mine());

        let mut committed = 0;
        for result in [a, b, c] {
            match result {
                Ok(_) => committed += 1,
                Err(ConsensusError::StaleMiningResult { .. }) => {}
                Err(e) => panic!("unexpected mining error: {}", e),
            }
        }
        assert!(committed >= 1);

        let ledger = node.ledger.read().await;
        assert_eq!(ledger.chain_len(), 1 + committed);
        assert!(is_valid_chain(ledger.chain(), ledger.pow()));
    }

    #[tokio::test]
    async fn test_register_and_broadcast_refuses_self() {
        let node = node("http://localhost:3001");
        let result = node.register_and_broadcast("http://localhost:3001/").await;
        assert!(matches!(result, Registration::Refused));
        assert!(node.peer_list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_newcomer_still_registered() {
        let node = node("http://localhost:3001");
        let result = node.register_and_broadcast("http://127.0.0.1:1").await;
        match result {
            Registration::Completed { delivery, bulk_delivered } => {
                assert_eq!(delivery.attempted(), 0);
                assert!(!bulk_delivered);
            }
            Registration::Refused => panic!("newcomer should be accepted"),
        }
        assert_eq!(node.peer_list().await, vec!["http://127.0.0.1:1".to_string()]);
    }

    #[tokio::test]
    async fn test_events_recorded() {
        let node = node("http://localhost:3001");
        node.register_peer("http://localhost:3002").await;
        node.queue_transaction(Transaction::new(1.0, "a", "b")).await.unwrap();
        let events = node.events.latest(10).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], NodeEvent::TransactionQueued { block_index: 2, .. }));
    }
}
