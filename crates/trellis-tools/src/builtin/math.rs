use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::Tool;
use trellis_core::types::ToolResult;

#[derive(Deserialize)]
struct BinaryInput {
    a: f64,
    b: f64,
}

fn binary_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "a": { "type": "number", "description": "First number" },
            "b": { "type": "number", "description": "Second number" }
        },
        "required": ["a", "b"]
    })
}

fn parse_input(input: serde_json::Value) -> Result<BinaryInput> {
    serde_json::from_value(input).map_err(|e| TrellisError::ToolValidation(e.to_string()))
}

fn finite(tool: &str, value: f64) -> Result<ToolResult> {
    if !value.is_finite() {
        return Err(TrellisError::ToolExecution {
            tool: tool.to_string(),
            message: format!("result out of range: {}", value),
        });
    }
    Ok(ToolResult::success(value.to_string()))
}

// ── AddTool ─────────────────────────────────────────────────────

pub struct AddTool;

impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }
    fn description(&self) -> &str {
        "Add two numbers together and return the sum."
    }
    fn input_schema(&self) -> serde_json::Value {
        binary_schema()
    }
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p = parse_input(input)?;
            let sum = p.a + p.b;
            debug!(a = p.a, b = p.b, result = sum, "add");
            finite("add", sum)
        })
    }
}

// ── MultiplyTool ────────────────────────────────────────────────

pub struct MultiplyTool;

impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }
    fn description(&self) -> &str {
        "Multiply two numbers together and return the product."
    }
    fn input_schema(&self) -> serde_json::Value {
        binary_schema()
    }
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p = parse_input(input)?;
            let product = p.a * p.b;
            debug!(a = p.a, b = p.b, result = product, "multiply");
            finite("multiply", product)
        })
    }
}
