//! Single-node graph that echoes a greeting.

use trellis_core::error::{Result, TrellisError};
use trellis_graph::{
    node_fn, CompiledGraph, State, StateGraph, StateSchema, StateUpdate, END, START,
};

/// State field holding the incoming text and, after the run, the reply.
pub const MESSAGE: &str = "message";
pub const GREETER: &str = "greeter";

/// The greeting for `message`.
pub fn greet(message: &str) -> String {
    format!("Hello! You said: '{}'. Nice to meet you!", message)
}

fn greeter(state: &State) -> Result<StateUpdate> {
    let message = state
        .get_str(MESSAGE)
        .ok_or_else(|| TrellisError::InvalidUpdate {
            field: MESSAGE.to_string(),
            message: "greeter needs a string message".to_string(),
        })?;
    Ok(StateUpdate::new().set_str(MESSAGE, greet(message)))
}

/// `START -> greeter`, with `greeter` finishing the run.
pub fn graph() -> Result<StateGraph> {
    let mut graph = StateGraph::new(StateSchema::new().field(MESSAGE));
    graph.add_node(GREETER, node_fn(greeter))?;
    graph.add_edge(START, GREETER)?;
    graph.add_edge(GREETER, END)?;
    Ok(graph)
}

pub fn compile() -> Result<CompiledGraph> {
    graph()?.compile()
}
