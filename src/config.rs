//! Node configuration from command-line arguments.
//!
//! Usage:
//!   ledger-node [PORT] [URL] [OPTIONS]
//!
//! Options:
//!   --port <PORT>                API port (default: 3001)
//!   --host <HOST>                Bind host (default: 0.0.0.0)
//!   --url <URL>                  This node's reachable URL (default: http://localhost:<port>)
//!   --seed <URL>                 Node to announce ourselves to at startup
//!   --difficulty <PREFIX>        Hash target prefix (default: 0000)
//!   --consensus-interval <MS>    Background consensus period (default: 10000)
//!   --peer-timeout <MS>          Per-peer request timeout (default: 5000)
//!   --reward <AMOUNT>            Credit this node after each mined block
//!   --mining-attempts <N>        Retries when a mined block goes stale (default: 3)

use std::time::Duration;

use crate::consensus::pow::{ProofOfWork, DEFAULT_TARGET};
use crate::consensus::{ConsensusConfig, ConsensusError};
use crate::network::DEFAULT_PEER_TIMEOUT;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub url: Option<String>,
    pub seed: Option<String>,
    pub difficulty: String,
    pub consensus_interval_ms: u64,
    pub peer_timeout_ms: u64,
    pub mining_reward: Option<f64>,
    pub mining_attempts: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            url: None,
            seed: None,
            difficulty: DEFAULT_TARGET.to_string(),
            consensus_interval_ms: 10_000,
            peer_timeout_ms: DEFAULT_PEER_TIMEOUT.as_millis() as u64,
            mining_reward: None,
            mining_attempts: 3,
        }
    }
}

impl NodeConfig {
    /// Parse arguments (without the program name). Unparsable values keep
    /// their defaults.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        let args: Vec<String> = args.into_iter().collect();
        let mut positional = 0;

        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1);
            match args[i].as_str() {
                "--port" => {
                    config.port = value.and_then(|s| s.parse().ok()).unwrap_or(config.port);
                    i += 1;
                }
                "--host" => {
                    if let Some(v) = value {
                        config.host = v.clone();
                    }
                    i += 1;
                }
                "--url" => {
                    config.url = value.cloned();
                    i += 1;
                }
                "--seed" => {
                    config.seed = value.cloned();
                    i += 1;
                }
                "--difficulty" => {
                    if let Some(v) = value {
                        config.difficulty = v.clone();
                    }
                    i += 1;
                }
                "--consensus-interval" => {
                    config.consensus_interval_ms = value
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(config.consensus_interval_ms);
                    i += 1;
                }
                "--peer-timeout" => {
                    config.peer_timeout_ms = value
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(config.peer_timeout_ms);
                    i += 1;
                }
                "--reward" => {
                    config.mining_reward = value.and_then(|s| s.parse().ok());
                    i += 1;
                }
                "--mining-attempts" => {
                    config.mining_attempts = value
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(config.mining_attempts);
                    i += 1;
                }
                // Legacy form: `ledger-node <port> <url>`
                arg if !arg.starts_with("--") => {
                    match positional {
                        0 => config.port = arg.parse().unwrap_or(config.port),
                        1 => config.url = Some(arg.to_string()),
                        _ => {}
                    }
                    positional += 1;
                }
                _ => {}
            }
            i += 1;
        }

        config
    }

    /// Address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL peers use to reach this node
    pub fn self_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn consensus_config(&self) -> Result<ConsensusConfig, ConsensusError> {
        Ok(ConsensusConfig {
            pow: ProofOfWork::new(self.difficulty.clone())?,
            consensus_interval_ms: self.consensus_interval_ms,
            mining_reward: self.mining_reward.filter(|r| r.is_finite() && *r > 0.0),
            max_mining_attempts: self.mining_attempts,
        })
    }
}
