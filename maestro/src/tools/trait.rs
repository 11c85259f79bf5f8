//! The `Tool` trait: name + spec + call, with an optional per-call context
//! carrying the mission id and the event sink for progress events.

use std::sync::Arc;

use async_trait::async_trait;
use mission_event::MissionEvent;
use serde_json::Value;

use crate::bus::EventSink;
use crate::error::ToolError;

/// Specification shown to agents: name, description, JSON schema of arguments.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Per-call context: which mission the call belongs to and where progress
/// events go. Both optional; tools must work without them.
#[derive(Clone, Default)]
pub struct ToolCallContext {
    pub mission_id: Option<String>,
    pub events: Option<Arc<dyn EventSink>>,
}

impl ToolCallContext {
    pub fn for_mission(mission_id: impl Into<String>, events: Option<Arc<dyn EventSink>>) -> Self {
        Self {
            mission_id: Some(mission_id.into()),
            events,
        }
    }

    /// Emits a progress event when both mission id and sink are present.
    pub async fn emit(&self, event: MissionEvent) {
        if let (Some(mission_id), Some(events)) = (&self.mission_id, &self.events) {
            events.emit(mission_id, event).await;
        }
    }
}

/// Structured result of one tool call.
#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub value: Value,
}

impl ToolOutput {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

/// A single callable tool. Registered with [`crate::tools::ToolRegistry`];
/// agents request tools by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Executes with JSON arguments validated against `input_schema`'s shape.
    async fn call(
        &self,
        args: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutput, ToolError>;
}
