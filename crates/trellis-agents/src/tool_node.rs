use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use trellis_core::error::Result;
use trellis_core::types::{ChatMessage, ToolResult};
use trellis_graph::{Node, State, StateUpdate};
use trellis_tools::ToolRegistry;

use crate::MESSAGES;

/// Node that runs every tool call requested by the last message.
///
/// One tool-result message is appended per call, in request order. A tool
/// that fails, times out, or does not exist yields an error result instead
/// of failing the run, so the model can see what went wrong.
pub struct ToolNode {
    registry: Arc<ToolRegistry>,
    field: String,
}

impl ToolNode {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            field: MESSAGES.to_string(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

impl Node for ToolNode {
    fn run<'a>(&'a self, state: &'a State) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let Some(last) = state.last_message(&self.field)? else {
                warn!(field = %self.field, "No messages; nothing to execute");
                return Ok(StateUpdate::new());
            };

            let calls = last.tool_uses();
            if calls.is_empty() {
                warn!("Last message requested no tools");
                return Ok(StateUpdate::new());
            }

            let mut update = StateUpdate::new();
            for (id, name, input) in calls {
                let result = match self.registry.execute(name, input.clone()).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "Tool call failed");
                        ToolResult::error(e.to_string())
                    }
                };
                info!(tool = %name, is_error = result.is_error, "Tool executed");
                update = update.message(
                    self.field.as_str(),
                    &ChatMessage::tool_result(id, result.content, result.is_error),
                );
            }
            Ok(update)
        })
    }
}
