//! Tool registry: stores tools by name and wraps every call with
//! `tool_call_start` / `tool_call_complete` events.

use std::collections::HashMap;
use std::sync::Arc;

use mission_event::MissionEvent;
use serde_json::Value;

use super::r#trait::{Tool, ToolCallContext, ToolOutput, ToolSpec};
use crate::error::ToolError;

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; a later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Calls a tool by name, emitting start/complete events through the
    /// context. Errors are reported in the complete event, then returned.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if let Some(ctx) = ctx {
            ctx.emit(MissionEvent::ToolCallStart {
                tool_name: name.to_string(),
                input_summary: Some(summarize_args(&args)),
            })
            .await;
        }

        let result = tool.call(args, ctx).await;

        if let Some(ctx) = ctx {
            let (status, output_summary) = match &result {
                Ok(out) => ("success".to_string(), Some(summarize_value(&out.value))),
                Err(e) => ("failure".to_string(), Some(e.to_string())),
            };
            ctx.emit(MissionEvent::ToolCallComplete {
                tool_name: name.to_string(),
                status,
                output_summary,
            })
            .await;
        }

        result
    }
}

fn summarize_args(args: &Value) -> String {
    let s = args.to_string();
    truncate(&s, 200)
}

fn summarize_value(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("{} results", items.len()),
        other => truncate(&other.to_string(), 200),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}
