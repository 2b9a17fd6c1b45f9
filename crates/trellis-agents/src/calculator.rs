//! Tool-using agent loop: the model may call arithmetic tools until it
//! answers in plain text.

use std::sync::Arc;

use trellis_core::error::Result;
use trellis_core::traits::LlmClient;
use trellis_core::types::ChatMessage;
use trellis_graph::{StateGraph, StateSchema, StateUpdate, END, START};
use trellis_tools::ToolRegistry;

use crate::routing::{self, tools_condition};
use crate::{ChatNode, ToolNode, MESSAGES};

pub const AGENT: &str = "agent";
pub const TOOLS: &str = "tools";

/// `START -> agent`, `agent -> tools | END`, `tools -> agent`.
///
/// Compile it plain for one-shot questions, or with a checkpointer to give
/// the agent conversation memory per thread.
pub fn graph(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Result<StateGraph> {
    let agent = ChatNode::new(llm).with_tools(tools.definitions());

    let mut graph = StateGraph::new(StateSchema::new().append(MESSAGES));
    graph.add_node(AGENT, agent)?;
    graph.add_node(TOOLS, ToolNode::new(tools))?;
    graph.add_edge(START, AGENT)?;
    graph.add_conditional_edges(
        AGENT,
        tools_condition(MESSAGES),
        [(routing::TOOLS, TOOLS), (routing::FINISH, END)],
    )?;
    graph.add_edge(TOOLS, AGENT)?;
    Ok(graph)
}

/// Input that adds one user message to the conversation.
pub fn ask(question: impl Into<String>) -> StateUpdate {
    StateUpdate::new().message(MESSAGES, &ChatMessage::user(question))
}
