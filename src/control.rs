// Control Surface
//
// HTTP endpoints mapping one-to-one onto the user commands. An outer command
// mutex keeps LIST/JOIN/LEAVE/WAIT/QUIT from interleaving with each other;
// the protocol's own receive path is serialized separately by the view lock.
// `/membership/quit` acknowledges, then gracefully stops the server, which
// is what actually ends the process.

use crate::error::{Result, RingError};
use crate::membership::Node;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

struct ControlState {
    node: Arc<Node>,
    commands: Mutex<()>,
    shutdown: Notify,
}

/// HTTP server exposing the command surface of one node.
pub struct ControlServer {
    state: Arc<ControlState>,
}

impl ControlServer {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            state: Arc::new(ControlState {
                node,
                commands: Mutex::new(()),
                shutdown: Notify::new(),
            }),
        }
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/membership/members", get(list_members))
            .route("/membership/self", get(list_self))
            .route("/membership/join", get(join))
            .route("/membership/leave", get(leave))
            .route("/membership/wait", get(wait))
            .route("/membership/quit", get(quit))
            .with_state(self.state.clone())
    }

    /// Serves until `/membership/quit` is hit, then drains and returns.
    pub async fn run(&self, addr: &str) -> Result<()> {
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| RingError::Transport(format!("failed to bind {}: {}", addr, e)))?;

        tracing::info!("control surface listening on {}", addr);

        let state = self.state.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                state.shutdown.notified().await;
            })
            .await
            .map_err(|e| RingError::Transport(format!("control server error: {}", e)))?;

        Ok(())
    }
}

async fn list_members(State(state): State<Arc<ControlState>>) -> impl IntoResponse {
    let _commands = state.commands.lock().await;
    let body = state
        .node
        .list_members()
        .unwrap_or_else(|e| e.to_string());
    ([(header::CONTENT_TYPE, "application/json")], body)
}

async fn list_self(State(state): State<Arc<ControlState>>) -> impl IntoResponse {
    let _commands = state.commands.lock().await;
    let body = state.node.list_self().unwrap_or_else(|e| e.to_string());
    ([(header::CONTENT_TYPE, "application/json")], body)
}

async fn join(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    let _commands = state.commands.lock().await;
    let data = match state.node.join_group().await {
        Ok(result) => result,
        Err(e) => e.to_string(),
    };
    Json(json!({ "join": "true", "data": data }))
}

async fn leave(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    let _commands = state.commands.lock().await;
    let data = match state.node.leave_group().await {
        Ok(result) => result,
        Err(e) => e.to_string(),
    };
    Json(json!({ "leave": "true", "data": data }))
}

async fn wait(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    let _commands = state.commands.lock().await;
    let data = state.node.wait().await;
    Json(json!({ "wait": "true", "data": data }))
}

async fn quit(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    let _commands = state.commands.lock().await;
    let data = state.node.stop();
    state.shutdown.notify_one();
    Json(json!({ "quit": "true", "data": data }))
}
