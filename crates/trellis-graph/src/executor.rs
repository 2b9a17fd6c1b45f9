use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::ThreadId;

use crate::checkpoint::{Checkpoint, Checkpointer};
use crate::edge::{Edge, Target};
use crate::node::Node;
use crate::schema::StateSchema;
use crate::state::{State, StateUpdate};

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Thread to resume from and checkpoint into. `None` runs statelessly.
    pub thread_id: Option<ThreadId>,
    /// Overrides the graph's default step budget for this call.
    pub step_limit: Option<usize>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread(mut self, thread_id: impl Into<ThreadId>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn step_limit(mut self, limit: usize) -> Self {
        self.step_limit = Some(limit);
        self
    }
}

/// Record of a single executed step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// 1-based step number within the invocation.
    pub step: usize,
    /// Which node was executed.
    pub node: String,
    /// Node execution time in milliseconds.
    pub elapsed_ms: u64,
    /// Sequence number of the checkpoint written after this step.
    pub checkpoint_seq: Option<u64>,
}

/// Result of executing an entire graph.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Final state after the last step.
    pub state: State,
    /// Per-step records in execution order.
    pub steps: Vec<StepRecord>,
    /// Sequence number of the checkpoint the run resumed from, if any.
    pub resumed_from: Option<u64>,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

/// Immutable, executable graph produced by
/// [`StateGraph::compile`](crate::StateGraph::compile).
///
/// Starting from the entry node, the executor runs one node at a time,
/// merges its update into the state, checkpoints (when a thread id is
/// given), and follows the node's outgoing edge until END is reached.
pub struct CompiledGraph {
    schema: StateSchema,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: HashMap<String, Edge>,
    entry: String,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    step_limit: Option<usize>,
}

impl CompiledGraph {
    pub(crate) fn new(
        schema: StateSchema,
        nodes: HashMap<String, Arc<dyn Node>>,
        edges: HashMap<String, Edge>,
        entry: String,
        checkpointer: Option<Arc<dyn Checkpointer>>,
    ) -> Self {
        Self {
            schema,
            nodes,
            edges,
            entry,
            checkpointer,
            step_limit: None,
        }
    }

    /// Set the default step budget applied to every invocation.
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Name of the node targeted by the START edge.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Registered node names, sorted.
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Outgoing edge of a node.
    pub fn edge(&self, node: &str) -> Option<&Edge> {
        self.edges.get(node)
    }

    pub fn has_checkpointer(&self) -> bool {
        self.checkpointer.is_some()
    }

    /// Run the graph to completion and return the final state.
    pub async fn invoke(&self, input: StateUpdate, config: &RunConfig) -> Result<State> {
        Ok(self.run(input, config).await?.state)
    }

    /// Run the graph to completion, returning the final state and a trace.
    pub async fn run(&self, input: StateUpdate, config: &RunConfig) -> Result<ExecutionResult> {
        let start = Instant::now();
        let limit = config.step_limit.or(self.step_limit);
        let persistence = self.persistence(config)?;

        // Resume from the thread's latest snapshot, or start empty.
        let (base, resumed_from) = match persistence {
            Some((checkpointer, thread_id)) => match checkpointer.load_latest(thread_id).await? {
                Some(cp) => {
                    debug!(thread_id = %thread_id, seq = cp.seq, "Resuming from checkpoint");
                    (cp.state, Some(cp.seq))
                }
                None => (State::new(), None),
            },
            None => (State::new(), None),
        };
        let mut state = self.schema.merge(&base, input)?;

        info!(
            entry = %self.entry,
            thread_id = ?config.thread_id.as_ref().map(|t| t.as_str()),
            step_limit = ?limit,
            "Invoking graph"
        );

        let mut steps: Vec<StepRecord> = Vec::new();
        let mut current = self.entry.clone();

        loop {
            if let Some(limit) = limit {
                if steps.len() >= limit {
                    warn!(node = %current, limit, "Step limit reached, aborting run");
                    return Err(TrellisError::StepLimitExceeded(limit));
                }
            }

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| TrellisError::UnknownNode(current.clone()))?;

            let step = steps.len() + 1;
            info!(node = %current, step, "Executing graph node");

            let node_start = Instant::now();
            let update = node.run(&state).await.map_err(|e| {
                error!(node = %current, step, error = %e, "Graph node failed");
                e
            })?;
            let elapsed_ms = node_start.elapsed().as_millis() as u64;

            state = self.schema.merge(&state, update)?;

            let checkpoint_seq = match persistence {
                Some((checkpointer, thread_id)) => {
                    let cp: Checkpoint = checkpointer.save(thread_id, &state).await?;
                    Some(cp.seq)
                }
                None => None,
            };

            debug!(node = %current, step, elapsed_ms, ?checkpoint_seq, "Node execution complete");
            steps.push(StepRecord {
                step,
                node: current.clone(),
                elapsed_ms,
                checkpoint_seq,
            });

            let edge = self
                .edges
                .get(&current)
                .ok_or_else(|| TrellisError::UnknownNode(current.clone()))?;
            match edge.resolve(&current, &state)? {
                Target::End => {
                    debug!(node = %current, "Reached END, graph complete");
                    break;
                }
                Target::Node(next) => {
                    debug!(from = %current, to = %next, "Following edge");
                    current = next;
                }
            }
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        info!(steps = steps.len(), total_elapsed_ms, "Graph run complete");

        Ok(ExecutionResult {
            state,
            steps,
            resumed_from,
            total_elapsed_ms,
        })
    }

    /// Latest snapshot of a thread, or `None` if it was never written.
    pub async fn get_state(&self, thread_id: &ThreadId) -> Result<Option<State>> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or(TrellisError::CheckpointerRequired)?;
        Ok(checkpointer.load_latest(thread_id).await?.map(|cp| cp.state))
    }

    /// Every checkpoint of a thread in sequence order.
    pub async fn state_history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or(TrellisError::CheckpointerRequired)?;
        checkpointer.history(thread_id).await
    }

    fn persistence<'a>(
        &'a self,
        config: &'a RunConfig,
    ) -> Result<Option<(&'a Arc<dyn Checkpointer>, &'a ThreadId)>> {
        match (&config.thread_id, &self.checkpointer) {
            (None, _) => Ok(None),
            (Some(thread_id), Some(checkpointer)) => Ok(Some((checkpointer, thread_id))),
            (Some(_), None) => Err(TrellisError::CheckpointerRequired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateGraph;
    use crate::checkpoint::MemorySaver;
    use crate::edge::{END, START};
    use crate::node::node_fn;
    use serde_json::json;

    fn counter_graph() -> StateGraph {
        let mut graph = StateGraph::new(StateSchema::new().field("count").append("trail"));
        graph
            .add_node(
                "increment",
                node_fn(|state: &State| {
                    let n = state.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
                    Ok(StateUpdate::new()
                        .set("count", json!(n + 1))
                        .set("trail", json!(["increment"])))
                }),
            )
            .unwrap();
        graph.add_edge(START, "increment").unwrap();
        graph.add_edge("increment", END).unwrap();
        graph
    }

    #[tokio::test]
    async fn test_single_step_run() {
        let graph = counter_graph().compile().unwrap();
        let result = graph
            .run(StateUpdate::new().set("count", json!(41)), &RunConfig::new())
            .await
            .unwrap();

        assert_eq!(result.state.get("count"), Some(&json!(42)));
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].node, "increment");
        assert_eq!(result.steps[0].checkpoint_seq, None);
        assert_eq!(result.resumed_from, None);
    }

    #[tokio::test]
    async fn test_stateless_calls_are_independent() {
        let graph = counter_graph().compile().unwrap();
        let a = graph.invoke(StateUpdate::new(), &RunConfig::new()).await.unwrap();
        let b = graph.invoke(StateUpdate::new(), &RunConfig::new()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(b.get("trail"), Some(&json!(["increment"])));
    }

    #[tokio::test]
    async fn test_thread_without_checkpointer_is_rejected() {
        let graph = counter_graph().compile().unwrap();
        let err = graph
            .invoke(StateUpdate::new(), &RunConfig::new().thread("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::CheckpointerRequired));
    }

    #[tokio::test]
    async fn test_thread_resumes_and_checkpoints_each_step() {
        let saver = Arc::new(MemorySaver::new());
        let graph = counter_graph()
            .compile_with_checkpointer(saver.clone())
            .unwrap();
        let config = RunConfig::new().thread("counter");

        let first = graph.run(StateUpdate::new(), &config).await.unwrap();
        assert_eq!(first.steps[0].checkpoint_seq, Some(0));

        let second = graph.run(StateUpdate::new(), &config).await.unwrap();
        assert_eq!(second.resumed_from, Some(0));
        assert_eq!(second.state.get("count"), Some(&json!(2)));
        assert_eq!(
            second.state.get("trail"),
            Some(&json!(["increment", "increment"]))
        );

        let history = graph.state_history(&ThreadId::from("counter")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            graph.get_state(&ThreadId::from("counter")).await.unwrap(),
            Some(second.state)
        );
    }

    #[tokio::test]
    async fn test_input_with_unknown_field_fails_before_any_step() {
        let graph = counter_graph().compile().unwrap();
        let err = graph
            .invoke(StateUpdate::new().set_str("colour", "red"), &RunConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::UnknownField(ref f) if f == "colour"));
    }

    fn ping_pong() -> StateGraph {
        let mut graph = StateGraph::new(StateSchema::new().append("trail"));
        for name in ["ping", "pong"] {
            graph
                .add_node(
                    name,
                    node_fn(move |_: &State| Ok(StateUpdate::new().set("trail", json!([name])))),
                )
                .unwrap();
        }
        graph.add_edge(START, "ping").unwrap();
        graph.add_edge("ping", "pong").unwrap();
        graph.add_edge("pong", "ping").unwrap();
        graph
    }

    #[tokio::test]
    async fn test_step_limit_trips_on_fifth_step() {
        let saver = Arc::new(MemorySaver::new());
        let graph = ping_pong().compile_with_checkpointer(saver.clone()).unwrap();
        let config = RunConfig::new().thread("loop").step_limit(4);

        let err = graph.invoke(StateUpdate::new(), &config).await.unwrap_err();
        assert!(matches!(err, TrellisError::StepLimitExceeded(4)));

        // exactly four steps ran and were checkpointed
        let history = saver.history(&ThreadId::from("loop")).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(
            history[3].state.get("trail"),
            Some(&json!(["ping", "pong", "ping", "pong"]))
        );
    }

    #[tokio::test]
    async fn test_graph_default_step_limit_and_override() {
        let graph = ping_pong().compile().unwrap().with_step_limit(2);

        let err = graph
            .invoke(StateUpdate::new(), &RunConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::StepLimitExceeded(2)));

        let err = graph
            .invoke(StateUpdate::new(), &RunConfig::new().step_limit(7))
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::StepLimitExceeded(7)));
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_checkpoints() {
        let mut graph = StateGraph::new(StateSchema::new().append("trail"));
        graph
            .add_node(
                "draft",
                node_fn(|_: &State| Ok(StateUpdate::new().set("trail", json!(["draft"])))),
            )
            .unwrap();
        graph
            .add_node(
                "publish",
                node_fn(|_: &State| Err(TrellisError::Llm("upstream timeout".into()))),
            )
            .unwrap();
        graph.add_edge(START, "draft").unwrap();
        graph.add_edge("draft", "publish").unwrap();
        graph.add_edge("publish", END).unwrap();

        let saver = Arc::new(MemorySaver::new());
        let graph = graph.compile_with_checkpointer(saver.clone()).unwrap();
        let err = graph
            .invoke(StateUpdate::new(), &RunConfig::new().thread("doc"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Llm(ref m) if m == "upstream timeout"));

        let latest = saver
            .load_latest(&ThreadId::from("doc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.seq, 0);
        assert_eq!(latest.state.get("trail"), Some(&json!(["draft"])));
    }

    #[tokio::test]
    async fn test_unmapped_route_label() {
        let mut graph = StateGraph::new(StateSchema::new().field("category"));
        for name in ["categorize", "billing"] {
            graph
                .add_node(name, node_fn(|_: &State| Ok(StateUpdate::new())))
                .unwrap();
        }
        graph.add_edge(START, "categorize").unwrap();
        graph
            .add_conditional_edges(
                "categorize",
                |_: &State| "refunds".to_string(),
                [("billing", "billing")],
            )
            .unwrap();
        graph.add_edge("billing", END).unwrap();

        let err = graph
            .compile()
            .unwrap()
            .invoke(StateUpdate::new(), &RunConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TrellisError::UnknownRoute { ref node, ref label } if node == "categorize" && label == "refunds"
        ));
    }

    #[tokio::test]
    async fn test_node_returning_undeclared_field_fails() {
        let mut graph = StateGraph::new(StateSchema::new().field("count"));
        graph
            .add_node(
                "sloppy",
                node_fn(|_: &State| Ok(StateUpdate::new().set_str("scratch", "oops"))),
            )
            .unwrap();
        graph.add_edge(START, "sloppy").unwrap();
        graph.add_edge("sloppy", END).unwrap();

        let err = graph
            .compile()
            .unwrap()
            .invoke(StateUpdate::new(), &RunConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::UnknownField(ref f) if f == "scratch"));
    }
}
