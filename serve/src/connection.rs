//! WebSocket connection lifecycle: one loop per socket, interleaving client
//! requests with bus-pushed mission events.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use maestro::ConnectionType;

use super::app::ServeState;
use super::protocol::{ClientRequest, ServerResponse};
use super::response::send_response;

pub(crate) async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<ServeState>,
    user_id: String,
    connection_type: ConnectionType,
    session_id: Option<String>,
) {
    let (connection_id, mut events) = state.bus.connect(&user_id, connection_type, session_id);
    tracing::info!(connection = %connection_id, user = %user_id, "websocket connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(result) = incoming else { break };
                let msg = match result {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(connection = %connection_id, "read error (client closed?): {}", e);
                        break;
                    }
                };
                let text = match &msg {
                    Message::Text(t) => t.clone(),
                    Message::Binary(b) => String::from_utf8_lossy(b).into_owned(),
                    Message::Ping(_) | Message::Pong(_) => {
                        state.bus.touch(&connection_id);
                        continue;
                    }
                    Message::Close(_) => break,
                };
                state.bus.touch(&connection_id);
                let response = handle_request(&state, &connection_id, &user_id, &text).await;
                if send_response(&mut socket, &response).await.is_err() {
                    break;
                }
            }
            event = events.recv() => {
                // The bus closes the channel when this connection is replaced
                // (writing-session singleton) or swept as stale.
                let Some(payload) = event else { break };
                let text = payload.to_string();
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }

    state.bus.disconnect(&connection_id);
    let _ = socket.close().await;
    tracing::info!(connection = %connection_id, "websocket disconnected");
}

async fn handle_request(
    state: &ServeState,
    connection_id: &str,
    user_id: &str,
    text: &str,
) -> ServerResponse {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            return ServerResponse::Error {
                error: format!("parse error: {}", e),
            }
        }
    };

    match request {
        ClientRequest::CreateMission {
            chat_id,
            request,
            local_rag,
            web_search,
            document_group_id,
            settings,
        } => {
            let selection = ClientRequest::tool_selection(local_rag, web_search);
            match state
                .controller
                .create_and_start_mission(
                    user_id,
                    chat_id,
                    request,
                    selection,
                    document_group_id,
                    settings,
                )
                .await
            {
                Ok(mission_id) => {
                    let _ = state.bus.subscribe(connection_id, &mission_id);
                    ServerResponse::MissionCreated { mission_id }
                }
                Err(e) => ServerResponse::Error {
                    error: e.to_string(),
                },
            }
        }
        ClientRequest::Subscribe { mission_id } => ServerResponse::Ack {
            action: "subscribe".into(),
            ok: state.bus.subscribe(connection_id, &mission_id).is_ok(),
        },
        ClientRequest::Unsubscribe { mission_id } => ServerResponse::Ack {
            action: "unsubscribe".into(),
            ok: state.bus.unsubscribe(connection_id, &mission_id).is_ok(),
        },
        ClientRequest::Pause { mission_id } => ServerResponse::Ack {
            action: "pause".into(),
            ok: state.controller.pause(&mission_id).await,
        },
        ClientRequest::Resume { mission_id } => ServerResponse::Ack {
            action: "resume".into(),
            ok: state.controller.resume(&mission_id).await,
        },
        ClientRequest::Stop { mission_id } => ServerResponse::Ack {
            action: "stop".into(),
            ok: state.controller.stop(&mission_id).await,
        },
        ClientRequest::GetStatus { mission_id } => match state.controller.get(&mission_id).await {
            Ok(ctx) => ServerResponse::Status {
                mission_id,
                status: ctx.status.as_str().to_string(),
            },
            Err(e) => ServerResponse::Error {
                error: e.to_string(),
            },
        },
        ClientRequest::GetStats { mission_id } => {
            match state.controller.get_stats(&mission_id).await {
                Ok(stats) => ServerResponse::Stats {
                    mission_id,
                    stats: serde_json::to_value(stats).unwrap_or_default(),
                },
                Err(e) => ServerResponse::Error {
                    error: e.to_string(),
                },
            }
        }
        ClientRequest::GetReport { mission_id } => {
            match state.controller.get_current_report(&mission_id).await {
                Ok(report) => ServerResponse::Report {
                    mission_id,
                    version: report.as_ref().map(|r| r.version),
                    content: report.map(|r| r.content),
                },
                Err(e) => ServerResponse::Error {
                    error: e.to_string(),
                },
            }
        }
        ClientRequest::Ping => ServerResponse::Pong,
    }
}
