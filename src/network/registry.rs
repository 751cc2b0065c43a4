//! Known peer addresses.

use std::collections::BTreeSet;

use tracing::debug;

/// Normalise a node URL for comparison: trimmed, no trailing slash.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// This node's own address plus the set of peers it gossips with.
///
/// Never contains `self_address` or duplicates.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    self_address: String,
    peers: BTreeSet<String>,
}

impl PeerRegistry {
    pub fn new(self_address: &str) -> Self {
        Self {
            self_address: normalize_url(self_address),
            peers: BTreeSet::new(),
        }
    }

    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// Add a peer. Returns `false` for self, blanks and already-known peers.
    pub fn register(&mut self, url: &str) -> bool {
        let url = normalize_url(url);
        if url.is_empty() || url == self.self_address {
            return false;
        }
        let added = self.peers.insert(url);
        if added {
            debug!("🤝 Peer registered ({} known)", self.peers.len());
        }
        added
    }

    /// Register every URL in `urls`. Returns how many were new.
    pub fn merge_bulk<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .filter(|url| self.register(url.as_ref()))
            .count()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.peers.contains(&normalize_url(url))
    }

    /// Known peers in sorted order
    pub fn peers(&self) -> Vec<String> {
        self.peers.iter().cloned().collect()
    }

    /// Known peers plus this node, as handed to a newcomer
    pub fn all_nodes(&self) -> Vec<String> {
        let mut all = self.peers();
        all.push(self.self_address.clone());
        all
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
