//! The agent set: messenger (request analysis), planner, research, reflection,
//! note assignment, writing, citation processing.
//!
//! Agents are stateless; each entry point takes the shared [`AgentRuntime`]
//! plus the mission's [`ControlHandle`] and returns [`AgentStep`]:
//! `Ok(None)` means the step observed a stop and unwound without writing.
//! Non-fatal model failures degrade to fallbacks inside the agent and are
//! logged as warnings; only configuration errors propagate.

pub mod assignment;
pub mod citation;
pub mod messenger;
pub mod planner;
pub mod reflection;
pub mod research;
pub mod writer;

use std::sync::Arc;

use crate::bus::EventSink;
use crate::context::ContextStore;
use crate::dispatch::ModelDispatcher;
use crate::error::RunError;
use crate::lifecycle::ControlHandle;
use crate::schemas::{ExecutionLogEntry, LogStatus, ModelCallDetails};
use crate::tools::ToolRegistry;

/// `Ok(Some(T))` = step done; `Ok(None)` = cancelled cleanly; `Err` = fatal.
pub type AgentStep<T> = Result<Option<T>, RunError>;

/// Shared services handed to every agent call.
#[derive(Clone)]
pub struct AgentRuntime {
    pub store: Arc<ContextStore>,
    pub dispatcher: Arc<ModelDispatcher>,
    pub tools: Arc<ToolRegistry>,
    pub events: Option<Arc<dyn EventSink>>,
}

impl AgentRuntime {
    /// Appends a success log entry for one model call.
    pub async fn log_model_call(
        &self,
        mission_id: &str,
        agent_name: &str,
        action: &str,
        input_summary: impl Into<String>,
        output_summary: impl Into<String>,
        details: ModelCallDetails,
    ) {
        let entry = ExecutionLogEntry::new(agent_name, action, LogStatus::Success)
            .with_input_summary(input_summary)
            .with_output_summary(output_summary)
            .with_model_details(details);
        if let Err(e) = self.store.append_log(mission_id, entry).await {
            tracing::warn!(mission = %mission_id, error = %e, "log append failed");
        }
    }

    /// Appends a warning entry for a degraded step.
    pub async fn log_warning(
        &self,
        mission_id: &str,
        agent_name: &str,
        action: &str,
        message: impl Into<String>,
    ) {
        let entry = ExecutionLogEntry::new(agent_name, action, LogStatus::Warning)
            .with_error(message);
        if let Err(e) = self.store.append_log(mission_id, entry).await {
            tracing::warn!(mission = %mission_id, error = %e, "log append failed");
        }
    }

    /// Appends a failure entry (the mission itself may still proceed).
    pub async fn log_failure(
        &self,
        mission_id: &str,
        agent_name: &str,
        action: &str,
        message: impl Into<String>,
    ) {
        let entry = ExecutionLogEntry::new(agent_name, action, LogStatus::Failure)
            .with_error(message);
        if let Err(e) = self.store.append_log(mission_id, entry).await {
            tracing::warn!(mission = %mission_id, error = %e, "log append failed");
        }
    }

    /// Tool-call context bound to this mission.
    pub fn tool_ctx(&self, control: &ControlHandle) -> crate::tools::ToolCallContext {
        crate::tools::ToolCallContext::for_mission(control.mission_id(), self.events.clone())
    }
}

/// Truncates a summary string for log entries.
pub(crate) fn summarize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
