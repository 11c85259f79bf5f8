//! Wire types for the control side of the socket. Realtime mission events
//! are pushed as-is from the bus (see `mission-event`); these shapes cover
//! the client → server verbs and their replies.

use maestro::{MissionSettings, ToolSelection};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientRequest {
    CreateMission {
        chat_id: String,
        request: String,
        #[serde(default)]
        local_rag: bool,
        #[serde(default)]
        web_search: bool,
        #[serde(default)]
        document_group_id: Option<String>,
        #[serde(default)]
        settings: Option<MissionSettings>,
    },
    Subscribe { mission_id: String },
    Unsubscribe { mission_id: String },
    Pause { mission_id: String },
    Resume { mission_id: String },
    Stop { mission_id: String },
    GetStatus { mission_id: String },
    GetStats { mission_id: String },
    GetReport { mission_id: String },
    Ping,
}

impl ClientRequest {
    pub fn tool_selection(local_rag: bool, web_search: bool) -> ToolSelection {
        ToolSelection {
            local_rag,
            web_search,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerResponse {
    MissionCreated { mission_id: String },
    Ack { action: String, ok: bool },
    Status { mission_id: String, status: String },
    Stats {
        mission_id: String,
        stats: serde_json::Value,
    },
    Report {
        mission_id: String,
        version: Option<u32>,
        content: Option<String>,
    },
    Pong,
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let raw = r#"{"action":"create_mission","chat_id":"c1","request":"explain CAP","web_search":true}"#;
        let req: ClientRequest = serde_json::from_str(raw).unwrap();
        match req {
            ClientRequest::CreateMission {
                chat_id,
                web_search,
                local_rag,
                ..
            } => {
                assert_eq!(chat_id, "c1");
                assert!(web_search);
                assert!(!local_rag);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn response_serializes_with_type_tag() {
        let resp = ServerResponse::Ack {
            action: "pause".into(),
            ok: true,
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["type"], "ack");
        assert_eq!(v["ok"], true);
    }
}
