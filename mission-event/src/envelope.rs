//! Envelope (`_msg_id`, `timestamp`, routing ids) injected into each message
//! before fan-out, plus the content hash used for duplicate suppression.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Envelope fields attached to every delivered message.
///
/// `_msg_id` is unique per send; `timestamp` is ISO-8601. Routing ids are set
/// only when the producer targeted a mission or a writing session.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    pub msg_id: Option<String>,
    pub timestamp: Option<String>,
    pub mission_id: Option<String>,
    pub session_id: Option<String>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_msg_id(mut self, id: impl Into<String>) -> Self {
        self.msg_id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.timestamp = Some(ts.into());
        self
    }

    pub fn with_mission_id(mut self, id: impl Into<String>) -> Self {
        self.mission_id = Some(id.into());
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.msg_id {
            obj.entry("_msg_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref ts) = self.timestamp {
            obj.entry("timestamp")
                .or_insert_with(|| Value::String(ts.clone()));
        }
        if let Some(ref id) = self.mission_id {
            obj.entry("mission_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref id) = self.session_id {
            obj.entry("session_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
    }
}

/// Dedup key for a message: hash of the payload (envelope stripped) plus the
/// sorted target connection set. Two sends with the same content aimed at the
/// same connections within the dedup window collapse to one delivery.
pub fn content_hash(content: &Value, targets: &[String]) -> u64 {
    let mut hasher = Sha256::new();
    match content {
        Value::Object(map) => {
            // _msg_id and timestamp differ per send; everything else counts.
            for (k, v) in map.iter().filter(|(k, _)| *k != "_msg_id" && *k != "timestamp") {
                hasher.update(k.as_bytes());
                hasher.update(v.to_string().as_bytes());
            }
        }
        other => hasher.update(other.to_string().as_bytes()),
    }
    let mut sorted: Vec<&String> = targets.iter().collect();
    sorted.sort();
    for t in sorted {
        hasher.update(b"\x00");
        hasher.update(t.as_bytes());
    }
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
}
