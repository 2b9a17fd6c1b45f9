//! State graph engine: nodes over shared state, wired by edges.
//!
//! A workflow is a directed graph of [`Node`]s. Each node reads the shared
//! [`State`] and returns a partial [`StateUpdate`], which is merged field by
//! field according to the [`StateSchema`] (`replace` or `append`). Edges are
//! either direct or conditional; a conditional edge asks a [`Router`] for a
//! label and follows the mapped target.
//!
//! [`StateGraph`] builds and validates the graph; [`CompiledGraph`] runs it,
//! checkpointing after every step when a thread id is supplied so that later
//! calls on the same thread resume where the last one stopped.

pub mod builder;
pub mod checkpoint;
pub mod edge;
pub mod executor;
pub mod node;
pub mod schema;
pub mod state;

pub use builder::StateGraph;
pub use checkpoint::{Checkpoint, Checkpointer, MemorySaver, SqliteSaver};
pub use edge::{Edge, Router, Target, END, START};
pub use executor::{CompiledGraph, ExecutionResult, RunConfig, StepRecord};
pub use node::{async_node, node_fn, AsyncFnNode, FnNode, Node};
pub use schema::{MergePolicy, StateSchema};
pub use state::{State, StateUpdate};
