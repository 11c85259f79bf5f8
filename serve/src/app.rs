//! Axum app: state, router, and WebSocket upgrade handler.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
    routing::get,
    Router,
};
use maestro::{ConnectionType, Controller, RealtimeBus};

use super::connection::handle_socket;

/// Shared server state: the mission controller and the realtime bus.
pub struct ServeState {
    pub controller: Arc<Controller>,
    pub bus: Arc<RealtimeBus>,
}

pub(crate) fn router(state: Arc<ServeState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<ServeState>>,
) -> Response {
    // Auth is handled upstream; the user id arrives resolved.
    let user_id = params
        .get("user_id")
        .cloned()
        .unwrap_or_else(|| "anonymous".to_string());
    let connection_type = match params.get("type").map(String::as_str) {
        Some("writing") => ConnectionType::Writing,
        Some("document") => ConnectionType::Document,
        _ => ConnectionType::Research,
    };
    let session_id = params.get("session_id").cloned();
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, user_id, connection_type, session_id)
    })
}
