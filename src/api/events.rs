//! Event log for tracking node activity.
//! Ring buffer of recent events served at `/events`.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_EVENTS: usize = 200;

/// Things the node reports about itself
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    NodeStarted {
        timestamp: u64,
        version: String,
        node_url: String,
    },
    TransactionQueued {
        timestamp: u64,
        transaction_id: String,
        sender: String,
        recipient: String,
        amount: f64,
        block_index: u64,
    },
    BlockMined {
        timestamp: u64,
        index: u64,
        hash: String,
        transactions: usize,
        delivered: Vec<String>,
        failed: Vec<String>,
    },
    BlockAccepted {
        timestamp: u64,
        index: u64,
        hash: String,
    },
    BlockRejected {
        timestamp: u64,
        index: u64,
        reason: String,
    },
    ChainReplaced {
        timestamp: u64,
        peer: String,
        chain_len: usize,
    },
    PeerRegistered {
        timestamp: u64,
        url: String,
    },
}

impl NodeEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            NodeEvent::NodeStarted { timestamp, .. }
            | NodeEvent::TransactionQueued { timestamp, .. }
            | NodeEvent::BlockMined { timestamp, .. }
            | NodeEvent::BlockAccepted { timestamp, .. }
            | NodeEvent::BlockRejected { timestamp, .. }
            | NodeEvent::ChainReplaced { timestamp, .. }
            | NodeEvent::PeerRegistered { timestamp, .. } => *timestamp,
        }
    }
}

/// Thread-safe event log with ring buffer
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<RwLock<VecDeque<NodeEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_EVENTS))),
        }
    }

    /// Push an event to the log
    pub async fn push(&self, event: NodeEvent) {
        let mut events = self.events.write().await;
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Get the latest N events (newest first)
    pub async fn latest(&self, limit: usize) -> Vec<NodeEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Get events since a given timestamp
    pub async fn since(&self, timestamp: u64) -> Vec<NodeEvent> {
        let events = self.events.read().await;
        events.iter()
            .filter(|e| e.timestamp() > timestamp)
            .cloned()
            .collect()
    }
}
