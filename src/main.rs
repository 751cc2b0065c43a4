//! Ledger Network Node
//!
//! Usage:
//!   ledger-node [PORT] [URL] [OPTIONS]
//!
//! See `ledger_node::config` for the full option list.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ledger_node::{
    api::{self, events::NodeEvent, AppState},
    config::NodeConfig,
    types::current_time_ms,
    Node,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = NodeConfig::from_args(std::env::args().skip(1));
    let consensus_config = config.consensus_config()?;
    let self_url = config.self_url();

    println!(r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║                                                           ║
    ║   ⛓️   LEDGER NETWORK NODE                                 ║
    ║       Proof-of-Work · Longest Valid Chain                 ║
    ║                                                           ║
    ╚═══════════════════════════════════════════════════════════╝
    "#);

    info!("Starting Ledger Node...");
    info!("  Bind: {}", config.bind_addr());
    info!("  URL: {}", self_url);
    info!("  Difficulty: {}", consensus_config.pow.target());
    info!("  Consensus Interval: {}ms", config.consensus_interval_ms);
    info!("  Peer Timeout: {}ms", config.peer_timeout_ms);
    if let Some(reward) = consensus_config.mining_reward {
        info!("  Mining Reward: {}", reward);
    }

    let consensus_interval = consensus_config.consensus_interval_ms;
    let node = Node::new(consensus_config, &self_url, config.peer_timeout());
    let state: AppState = Arc::new(node);
    info!("  Node Address: {}", state.node_address);

    // Bind before announcing: the seed calls straight back into /register-nodes-bulk
    let listener = TcpListener::bind(config.bind_addr()).await?;

    state
        .record(NodeEvent::NodeStarted {
            timestamp: current_time_ms(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            node_url: self_url.clone(),
        })
        .await;

    if let Some(seed) = config.seed.clone() {
        let seed_state = state.clone();
        tokio::spawn(async move {
            seed_state.announce_to_seed(&seed).await;
        });
    }

    // Periodic consensus loop
    if consensus_interval > 0 {
        let consensus_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(consensus_interval));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let outcome = consensus_state.run_consensus().await;
                debug!(
                    "Consensus round: replaced={} len={} responded={} unreachable={}",
                    outcome.replaced,
                    outcome.chain_len,
                    outcome.responded,
                    outcome.unreachable
                );
            }
        });
    }

    api::serve(state, listener).await?;

    Ok(())
}
