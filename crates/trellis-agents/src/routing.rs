use tracing::debug;

use trellis_graph::{Router, State};

/// Label returned when the last message requests tool calls.
pub const TOOLS: &str = "tools";
/// Label returned otherwise.
pub const FINISH: &str = "end";

/// Router for the agent/tools loop.
///
/// Returns [`TOOLS`] when the last message in `field` requests at least one
/// tool call and [`FINISH`] otherwise, including for an empty history.
pub fn tools_condition(field: impl Into<String>) -> impl Router {
    let field = field.into();
    move |state: &State| -> String {
        match state.last_message(&field) {
            Ok(Some(msg)) if msg.has_tool_calls() => TOOLS.to_string(),
            Ok(_) => FINISH.to_string(),
            Err(e) => {
                debug!(field = %field, error = %e, "Unreadable history; finishing");
                FINISH.to_string()
            }
        }
    }
}
