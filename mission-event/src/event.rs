//! Wire-level event types (`type` + payload).
//!
//! State-carrying variants use `serde_json::Value`; the core serializes its
//! typed structs into that so this crate stays free of the core's data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mission event: wire shape for one realtime message (type + payload).
/// The envelope (`_msg_id`, `timestamp`, routing ids) is applied separately.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionEvent {
    StatusChanged {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_info: Option<String>,
    },
    LogEntry { entry: Value },
    StatsUpdated { stats: Value },
    PlanUpdated { outline: Value },
    NotesUpdated { note_count: usize },
    SectionUpdated { section_id: String },
    ReportVersionAdded { version: u32, is_current: bool },
    ToolCallStart {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input_summary: Option<String>,
    },
    ToolCallComplete {
        tool_name: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output_summary: Option<String>,
    },
    WebFetchStart { url: String },
    WebFetchComplete { url: String, status: String },
    WebFetchCacheHit { url: String },
}

impl MissionEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The wire `type` tag for this event.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::LogEntry { .. } => "log_entry",
            Self::StatsUpdated { .. } => "stats_updated",
            Self::PlanUpdated { .. } => "plan_updated",
            Self::NotesUpdated { .. } => "notes_updated",
            Self::SectionUpdated { .. } => "section_updated",
            Self::ReportVersionAdded { .. } => "report_version_added",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallComplete { .. } => "tool_call_complete",
            Self::WebFetchStart { .. } => "web_fetch_start",
            Self::WebFetchComplete { .. } => "web_fetch_complete",
            Self::WebFetchCacheHit { .. } => "web_fetch_cache_hit",
        }
    }
}
