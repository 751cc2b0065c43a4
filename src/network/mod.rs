//! Peer-to-peer networking over HTTP.
//! Handles transaction and block propagation, registration gossip and
//! snapshot fetches for consensus.
//!
//! Every peer call is bounded by the client timeout. Fan-out calls run
//! concurrently and are all awaited; a failing peer is recorded in the
//! [`DeliveryReport`] and never aborts delivery to the others.

pub mod registry;

use std::time::Duration;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Block, ChainSnapshot, Transaction};
pub use registry::PeerRegistry;

/// Default per-peer request timeout
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },
    #[error("Peer {peer} answered {path} with status {status}")]
    BadStatus { peer: String, path: String, status: u16 },
}

/// Body of `POST /receive-new-block`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlockPayload {
    pub new_block: Block,
}

/// Body of `POST /register-node` and `POST /register-and-broadcast-node`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUrlPayload {
    pub new_node_url: String,
}

/// Body of `POST /register-nodes-bulk`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkNodesPayload {
    pub all_network_nodes: Vec<String>,
}

/// Per-peer result of a fan-out
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// HTTP client for talking to peers
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { http, timeout }
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        peer: &str,
        path: &str,
        body: &T,
    ) -> Result<(), NetworkError> {
        let url = format!("{}{}", peer, path);
        let request = self.http.post(&url).json(body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| unreachable(peer, "timed out"))?
            .map_err(|e| unreachable(peer, e))?;

        if !response.status().is_success() {
            return Err(NetworkError::BadStatus {
                peer: peer.to_string(),
                path: path.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, peer: &str, path: &str) -> Result<T, NetworkError> {
        let url = format!("{}{}", peer, path);
        let fetch = async {
            let response = self.http.get(&url).send().await?;
            let status = response.status();
            let body = response.json::<T>().await;
            Ok::<_, reqwest::Error>((status, body))
        };
        let (status, body) = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| unreachable(peer, "timed out"))?
            .map_err(|e| unreachable(peer, e))?;

        if !status.is_success() {
            return Err(NetworkError::BadStatus {
                peer: peer.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        body.map_err(|e| unreachable(peer, format!("bad response body: {}", e)))
    }

    /// POST `body` to `path` on every peer concurrently and wait for all.
    async fn fan_out<T: Serialize + Sync + ?Sized>(
        &self,
        peers: &[String],
        path: &str,
        body: &T,
    ) -> DeliveryReport {
        let attempts = peers.iter().map(|peer| async move {
            let result = self.post_json(peer, path, body).await;
            (peer.clone(), result)
        });

        let mut report = DeliveryReport::default();
        for (peer, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    debug!("📤 {} delivered to {}", path, peer);
                    report.delivered.push(peer);
                }
                Err(e) => {
                    warn!("📤 {} not delivered: {}", path, e);
                    report.failed.push(peer);
                }
            }
        }
        report
    }

    /// Send a transaction to every peer's `/transaction`.
    pub async fn broadcast_transaction(&self, peers: &[String], tx: &Transaction) -> DeliveryReport {
        self.fan_out(peers, "/transaction", tx).await
    }

    /// Send a freshly mined block to every peer's `/receive-new-block`.
    pub async fn broadcast_block(&self, peers: &[String], block: &Block) -> DeliveryReport {
        let payload = NewBlockPayload { new_block: block.clone() };
        self.fan_out(peers, "/receive-new-block", &payload).await
    }

    /// Ask every peer to register `new_node_url`.
    pub async fn broadcast_peer_registration(
        &self,
        peers: &[String],
        new_node_url: &str,
    ) -> DeliveryReport {
        let payload = NodeUrlPayload { new_node_url: new_node_url.to_string() };
        self.fan_out(peers, "/register-node", &payload).await
    }

    /// Hand a newcomer the full list of known nodes.
    pub async fn send_bulk_registration(
        &self,
        peer: &str,
        all_network_nodes: Vec<String>,
    ) -> Result<(), NetworkError> {
        let payload = BulkNodesPayload { all_network_nodes };
        self.post_json(peer, "/register-nodes-bulk", &payload).await
    }

    /// Introduce this node to the network through `seed`.
    pub async fn announce_to_seed(&self, seed: &str, self_address: &str) -> Result<(), NetworkError> {
        let payload = NodeUrlPayload { new_node_url: self_address.to_string() };
        self.post_json(seed, "/register-and-broadcast-node", &payload).await
    }

    /// Fetch one peer's chain and pending pool.
    pub async fn fetch_snapshot(&self, peer: &str) -> Result<ChainSnapshot, NetworkError> {
        self.get_json(peer, "/blockchain").await
    }

    /// Fetch every peer's snapshot concurrently.
    pub async fn fetch_snapshots(
        &self,
        peers: &[String],
    ) -> Vec<(String, Result<ChainSnapshot, NetworkError>)> {
        let fetches = peers.iter().map(|peer| async move {
            (peer.clone(), self.fetch_snapshot(peer).await)
        });
        join_all(fetches).await
    }
}

fn unreachable(peer: &str, reason: impl ToString) -> NetworkError {
    NetworkError::PeerUnreachable {
        peer: peer.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_names() {
        let payload = NodeUrlPayload { new_node_url: "http://x".into() };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["newNodeUrl"], "http://x");

        let bulk: BulkNodesPayload =
            serde_json::from_str(r#"{"allNetworkNodes":["http://a","http://b"]}"#).unwrap();
        assert_eq!(bulk.all_network_nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_fan_out_to_no_peers_is_empty_success() {
        let client = PeerClient::new(Duration::from_millis(200));
        let report = client
            .broadcast_transaction(&[], &Transaction::new(1.0, "a", "b"))
            .await;
        assert!(report.all_delivered());
        assert_eq!(report.attempted(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_peers_are_reported_not_fatal() {
        let client = PeerClient::new(Duration::from_millis(300));
        let peers = vec!["http://127.0.0.1:1".to_string(), "http://127.0.0.1:2".to_string()];
        let report = client.broadcast_block(&peers, &Block::genesis()).await;
        assert_eq!(report.failed.len(), 2);
        assert!(!report.all_delivered());

        let err = client.fetch_snapshot("http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, NetworkError::PeerUnreachable { .. }));
    }
}
