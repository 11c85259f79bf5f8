//! Calculator tool: evaluates arithmetic expressions with `evalexpr`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::r#trait::{Tool, ToolCallContext, ToolOutput, ToolSpec};
use crate::error::ToolError;

pub const TOOL_CALCULATE: &str = "calculate";

#[derive(Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        TOOL_CALCULATE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_CALCULATE.into(),
            description: Some("Evaluate an arithmetic expression, e.g. \"(2 + 3) * 4\".".into()),
            input_schema: json!({
                "type": "object",
                "required": ["expression"],
                "properties": { "expression": { "type": "string" } }
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutput, ToolError> {
        let expression = args
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'expression'".into()))?;
        let result = evalexpr::eval(expression)
            .map_err(|e| ToolError::Execution(format!("evaluation failed: {}", e)))?;
        let value = match result {
            evalexpr::Value::Int(i) => json!(i),
            evalexpr::Value::Float(f) => json!(f),
            evalexpr::Value::Boolean(b) => json!(b),
            other => json!(other.to_string()),
        };
        Ok(ToolOutput::new(json!({
            "expression": expression,
            "result": value,
        })))
    }
}
