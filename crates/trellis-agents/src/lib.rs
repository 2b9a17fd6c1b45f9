//! Prebuilt nodes and routers for model-driven graphs, plus the example
//! graphs the CLI and integration tests run.

pub mod calculator;
pub mod chat;
pub mod greeter;
pub mod routing;
pub mod support;
pub mod tool_node;

pub use chat::ChatNode;
pub use routing::tools_condition;
pub use tool_node::ToolNode;

/// Default message-history field.
pub const MESSAGES: &str = "messages";
