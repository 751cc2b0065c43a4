//! HTTP API for the ledger node.
//! Endpoints for clients and peers: transactions, mining, block gossip,
//! peer registration and consensus.
//!
//! Every outcome is a 200 with a `note`, except structurally invalid
//! requests which get a 400.

pub mod events;
pub mod websocket;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::consensus::ConsensusError;
use crate::network::{BulkNodesPayload, NewBlockPayload, NodeUrlPayload};
use crate::node::{Node, Registration};
use crate::types::{ChainSnapshot, Transaction};

/// Shared application state
pub type AppState = Arc<Node>;

/// Body of `POST /transaction`: a transaction minted by another node
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub amount: Option<f64>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub transaction_id: Option<String>,
}

impl TransactionPayload {
    pub fn into_transaction(self) -> Result<Transaction, ConsensusError> {
        Ok(Transaction {
            amount: required(self.amount, "amount")?,
            sender: required(self.sender, "sender")?,
            recipient: required(self.recipient, "recipient")?,
            transaction_id: required(self.transaction_id, "transactionId")?,
        })
    }
}

/// Body of `POST /transaction/broadcast`
#[derive(Debug, Deserialize)]
pub struct BroadcastPayload {
    pub amount: Option<f64>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ConsensusError> {
    value.ok_or_else(|| ConsensusError::InvalidTransaction(format!("missing {}", field)))
}

/// `GET /blockchain` body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockchainResponse {
    #[serde(flatten)]
    snapshot: ChainSnapshot,
    current_node_url: String,
    network_nodes: Vec<String>,
}

#[derive(Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
    since: Option<u64>,
}

fn note(status: StatusCode, note: impl Into<String>) -> Response {
    (status, Json(json!({ "note": note.into() }))).into_response()
}

fn malformed(rejection: JsonRejection) -> Response {
    note(StatusCode::BAD_REQUEST, format!("Malformed request: {}", rejection.body_text()))
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        // Ledger
        .route("/blockchain", get(get_blockchain))
        .route("/transaction", post(receive_transaction))
        .route("/transaction/broadcast", post(broadcast_transaction))
        .route("/mine", get(mine))
        .route("/receive-new-block", post(receive_new_block))
        // Peers
        .route("/register-and-broadcast-node", post(register_and_broadcast_node))
        .route("/register-node", post(register_node))
        .route("/register-nodes-bulk", post(register_nodes_bulk))
        .route("/consensus", get(consensus))
        // Explorer
        .route("/block/:hash", get(get_block))
        .route("/transaction/:id", get(get_transaction))
        .route("/address/:address", get(get_address))
        // Activity
        .route("/events", get(get_events))
        .route("/ws", get(websocket::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    "Ledger node is running"
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "note": "Ledger node is alive" }))
}

/// Full chain, pending pool and peer list
async fn get_blockchain(State(node): State<AppState>) -> impl IntoResponse {
    let snapshot = node.ledger.read().await.snapshot();
    let (current_node_url, network_nodes) = {
        let peers = node.peers.read().await;
        (peers.self_address().to_string(), peers.peers())
    };
    Json(BlockchainResponse { snapshot, current_node_url, network_nodes })
}

/// Queue a transaction relayed by a peer (no re-broadcast)
async fn receive_transaction(
    State(node): State<AppState>,
    payload: Result<Json<TransactionPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => return malformed(rejection),
    };
    let result = match payload.into_transaction() {
        Ok(tx) => node.queue_transaction(tx).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(index) => note(StatusCode::OK, format!("Transaction will be added in block {}.", index)),
        Err(e) => note(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Mint a transaction, queue it here and relay it to every peer
async fn broadcast_transaction(
    State(node): State<AppState>,
    payload: Result<Json<BroadcastPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => return malformed(rejection),
    };
    let fields = required(payload.amount, "amount").and_then(|amount| {
        Ok((
            amount,
            required(payload.sender, "sender")?,
            required(payload.recipient, "recipient")?,
        ))
    });
    let (amount, sender, recipient) = match fields {
        Ok(f) => f,
        Err(e) => return note(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match node.create_and_broadcast_transaction(amount, &sender, &recipient).await {
        Ok((tx, delivery)) => {
            let note = if delivery.all_delivered() {
                "Transaction created and broadcast successfully."
            } else {
                "Transaction created, but some nodes failed to receive it."
            };
            Json(json!({ "note": note, "transaction": tx })).into_response()
        }
        Err(e) => note(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Run proof-of-work over the pending pool, commit and broadcast the block
async fn mine(State(node): State<AppState>) -> Response {
    match node.mine().await {
        Ok(outcome) => {
            let note = if outcome.delivery.all_delivered() {
                "New block mined successfully"
            } else {
                "New block mined (Warning: Broadcast failed on some nodes)"
            };
            Json(json!({
                "note": note,
                "block": outcome.block,
                "reward": outcome.reward,
            }))
            .into_response()
        }
        Err(ConsensusError::StaleMiningResult { .. }) => Json(json!({
            "note": "Mining result went stale; chain advanced during proof-of-work.",
            "block": null,
        }))
        .into_response(),
        Err(e) => note(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Accept or reject a block announced by a peer
async fn receive_new_block(
    State(node): State<AppState>,
    payload: Result<Json<NewBlockPayload>, JsonRejection>,
) -> Response {
    let Json(NewBlockPayload { new_block }) = match payload {
        Ok(p) => p,
        Err(rejection) => return malformed(rejection),
    };

    let body = match node.receive_block(new_block.clone()).await {
        Ok(()) => json!({
            "note": "New block received and accepted.",
            "newBlock": new_block,
        }),
        Err(e) => json!({
            "note": "New block rejected.",
            "reason": e.to_string(),
            "newBlock": new_block,
        }),
    };
    Json(body).into_response()
}

/// Register a newcomer and introduce it to the whole network
async fn register_and_broadcast_node(
    State(node): State<AppState>,
    payload: Result<Json<NodeUrlPayload>, JsonRejection>,
) -> Response {
    let Json(NodeUrlPayload { new_node_url }) = match payload {
        Ok(p) => p,
        Err(rejection) => return malformed(rejection),
    };

    match node.register_and_broadcast(&new_node_url).await {
        Registration::Refused => note(StatusCode::OK, "Node not registered: address is empty or this node itself."),
        Registration::Completed { delivery, bulk_delivered } => {
            if delivery.all_delivered() && bulk_delivered {
                note(StatusCode::OK, "New node registered with network successfully.")
            } else {
                note(StatusCode::OK, "Node registered, but broadcast failed.")
            }
        }
    }
}

async fn register_node(
    State(node): State<AppState>,
    payload: Result<Json<NodeUrlPayload>, JsonRejection>,
) -> Response {
    let Json(NodeUrlPayload { new_node_url }) = match payload {
        Ok(p) => p,
        Err(rejection) => return malformed(rejection),
    };
    node.register_peer(&new_node_url).await;
    note(StatusCode::OK, "New node registered successfully.")
}

async fn register_nodes_bulk(
    State(node): State<AppState>,
    payload: Result<Json<BulkNodesPayload>, JsonRejection>,
) -> Response {
    let Json(BulkNodesPayload { all_network_nodes }) = match payload {
        Ok(p) => p,
        Err(rejection) => return malformed(rejection),
    };
    node.register_bulk(&all_network_nodes).await;
    note(StatusCode::OK, "Bulk registration successful.")
}

/// Run one consensus round and return the resulting chain
async fn consensus(State(node): State<AppState>) -> impl IntoResponse {
    let outcome = node.run_consensus().await;
    let chain = node.ledger.read().await.chain().to_vec();
    let note = if outcome.replaced {
        "This chain has been replaced."
    } else {
        "Current chain has not been replaced."
    };
    Json(json!({ "note": note, "chain": chain, "consensus": outcome }))
}

async fn get_block(State(node): State<AppState>, Path(hash): Path<String>) -> impl IntoResponse {
    let ledger = node.ledger.read().await;
    Json(json!({ "block": ledger.get_block(&hash) }))
}

async fn get_transaction(State(node): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let ledger = node.ledger.read().await;
    match ledger.get_transaction(&id) {
        Some((transaction, block)) => Json(json!({ "transaction": transaction, "block": block })),
        None => Json(json!({ "transaction": null, "block": null })),
    }
}

/// Mined transactions touching an address and the balance derived from them
async fn get_address(State(node): State<AppState>, Path(address): Path<String>) -> impl IntoResponse {
    let data = node.ledger.read().await.address_data(&address);
    Json(json!({ "addressData": data }))
}

/// Recent node activity, newest first
async fn get_events(State(node): State<AppState>, Query(query): Query<EventsQuery>) -> impl IntoResponse {
    let events = match query.since {
        Some(since) => node.events.since(since).await,
        None => node.events.latest(query.limit.unwrap_or(50)).await,
    };
    Json(events)
}

/// Serve the API on an already-bound listener
pub async fn serve(state: AppState, listener: TcpListener) -> anyhow::Result<()> {
    let router = create_router(state);
    info!("🌐 API server listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_payload_requires_fields() {
        let payload: TransactionPayload =
            serde_json::from_str(r#"{"amount":10,"sender":"u1","transactionId":"abc"}"#).unwrap();
        let err = payload.into_transaction().unwrap_err();
        assert!(err.to_string().contains("recipient"));
    }

    #[test]
    fn test_transaction_payload_accepts_complete_body() {
        let payload: TransactionPayload = serde_json::from_str(
            r#"{"amount":10,"sender":"u1","recipient":"u2","transactionId":"abc"}"#,
        )
        .unwrap();
        let tx = payload.into_transaction().unwrap();
        assert_eq!(tx.amount, 10.0);
        assert_eq!(tx.transaction_id, "abc");
    }

    #[test]
    fn test_blockchain_response_is_flat() {
        let body = BlockchainResponse {
            snapshot: ChainSnapshot { chain: vec![], pending_transactions: vec![] },
            current_node_url: "http://localhost:3001".into(),
            network_nodes: vec![],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json["chain"].is_array());
        assert!(json["pendingTransactions"].is_array());
        assert_eq!(json["currentNodeUrl"], "http://localhost:3001");
    }
}
