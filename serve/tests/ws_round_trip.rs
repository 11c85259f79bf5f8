//! WebSocket round trip: create a mission over the socket, receive realtime
//! events for it, and drive control verbs.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use maestro::{
    ContextStore, Controller, LifecycleManager, MemoryPersistence, MockLlm, ModelDispatcher,
    RealtimeBus, ToolRegistry,
};
use serve::ServeState;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn start_server() -> (String, Arc<ServeState>) {
    let bus = RealtimeBus::new();
    let store = Arc::new(
        ContextStore::new(Arc::new(MemoryPersistence::new())).with_events(bus.clone()),
    );
    let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
    let dispatcher = Arc::new(ModelDispatcher::with_client_for_all(Arc::new(MockLlm::new(
        "plain text",
    ))));
    let controller = Controller::new(
        store,
        dispatcher,
        Arc::new(ToolRegistry::new()),
        lifecycle,
        Some(bus.clone()),
    );
    let state = Arc::new(ServeState { controller, bus });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_state = state.clone();
    tokio::spawn(async move {
        let _ = serve::run_serve_on_listener(listener, server_state).await;
    });
    (format!("ws://{}/ws?user_id=u1&type=research", addr), state)
}

#[tokio::test]
async fn ping_create_and_receive_events() {
    let (url, _state) = start_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    socket
        .send(WsMessage::Text(r#"{"action":"ping"}"#.into()))
        .await
        .unwrap();
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["type"], "pong");

    socket
        .send(WsMessage::Text(
            r#"{"action":"create_mission","chat_id":"c1","request":"Explain CAP",
                "local_rag":false,"web_search":false,
                "settings":{"structured_research_rounds":0,"writing_passes":1}}"#
                .into(),
        ))
        .await
        .unwrap();

    // Replies and pushed events interleave; collect until we have both the
    // creation ack and at least one status_changed event.
    let mut mission_id = None;
    let mut saw_status_event = false;
    for _ in 0..200 {
        let msg = recv_json(&mut socket).await;
        if msg["type"] == "mission_created" {
            mission_id = Some(msg["mission_id"].as_str().unwrap().to_string());
        }
        if msg["type"] == "status_changed" {
            saw_status_event = true;
        }
        if mission_id.is_some() && saw_status_event {
            break;
        }
    }
    let mission_id = mission_id.expect("mission_created reply");
    assert!(saw_status_event, "expected a pushed status_changed event");

    socket
        .send(WsMessage::Text(format!(
            r#"{{"action":"get_status","mission_id":"{}"}}"#,
            mission_id
        )))
        .await
        .unwrap();
    let mut status = None;
    for _ in 0..200 {
        let msg = recv_json(&mut socket).await;
        if msg["type"] == "status" {
            status = msg["status"].as_str().map(str::to_string);
            break;
        }
    }
    assert!(status.is_some(), "expected a status reply");
}

async fn recv_json(
    socket: &mut (impl StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("socket timed out")
            .expect("socket closed")
            .expect("socket error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}
