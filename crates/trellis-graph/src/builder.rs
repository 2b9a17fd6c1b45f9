use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use trellis_core::error::{Result, TrellisError};

use crate::checkpoint::Checkpointer;
use crate::edge::{Edge, Router, Target, END, START};
use crate::executor::CompiledGraph;
use crate::node::Node;
use crate::schema::StateSchema;

/// Mutable graph under construction.
///
/// Register nodes with [`add_node`](Self::add_node), wire them with
/// [`add_edge`](Self::add_edge) and
/// [`add_conditional_edges`](Self::add_conditional_edges), then
/// [`compile`](Self::compile) into an immutable [`CompiledGraph`].
pub struct StateGraph {
    schema: StateSchema,
    nodes: HashMap<String, Arc<dyn Node>>,
    /// Registration order, used for stable validation messages.
    order: Vec<String>,
    edges: HashMap<String, Edge>,
    entry_edges: Vec<String>,
}

impl StateGraph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
            entry_edges: Vec::new(),
        }
    }

    /// Register a node under a unique name.
    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node) -> Result<&mut Self> {
        let name = name.into();
        if name == START || name == END {
            return Err(TrellisError::ReservedNode(name));
        }
        if self.nodes.contains_key(&name) {
            return Err(TrellisError::DuplicateNode(name));
        }
        debug!(node = %name, "Node registered");
        self.nodes.insert(name.clone(), Arc::new(node));
        self.order.push(name);
        Ok(self)
    }

    /// Register an unconditional edge. `src` may be START; `dst` may be END.
    pub fn add_edge(&mut self, src: impl Into<String>, dst: impl Into<String>) -> Result<&mut Self> {
        let src = src.into();
        let dst = dst.into();

        if src == END {
            return Err(TrellisError::ReservedNode(src));
        }
        if dst == START {
            return Err(TrellisError::ReservedNode(dst));
        }
        if src != START {
            self.require_node(&src)?;
        }
        if dst != END {
            self.require_node(&dst)?;
        }

        if src == START {
            // Multiple entry edges are reported by compile().
            self.entry_edges.push(dst);
            return Ok(self);
        }
        if self.edges.contains_key(&src) {
            return Err(TrellisError::DuplicateEdge(src));
        }
        self.edges.insert(src, Edge::Direct(Target::parse(&dst)));
        Ok(self)
    }

    /// Register a conditional edge out of `src`.
    ///
    /// `routes` is the closed set of labels the router may return, each
    /// mapped to a registered node or END.
    pub fn add_conditional_edges<L, T>(
        &mut self,
        src: impl Into<String>,
        router: impl Router,
        routes: impl IntoIterator<Item = (L, T)>,
    ) -> Result<&mut Self>
    where
        L: Into<String>,
        T: Into<String>,
    {
        let src = src.into();
        if src == START || src == END {
            return Err(TrellisError::ReservedNode(src));
        }
        self.require_node(&src)?;

        let mut table = BTreeMap::new();
        for (label, target) in routes {
            let target = target.into();
            if target == START {
                return Err(TrellisError::ReservedNode(target));
            }
            if target != END {
                self.require_node(&target)?;
            }
            table.insert(label.into(), Target::parse(&target));
        }
        if table.is_empty() {
            return Err(TrellisError::GraphValidation(vec![format!(
                "conditional edge from '{}' declares no labels",
                src
            )]));
        }
        if self.edges.contains_key(&src) {
            return Err(TrellisError::DuplicateEdge(src));
        }

        self.edges.insert(
            src,
            Edge::Conditional {
                router: Arc::new(router),
                routes: table,
            },
        );
        Ok(self)
    }

    fn require_node(&self, name: &str) -> Result<()> {
        if self.nodes.contains_key(name) {
            Ok(())
        } else {
            Err(TrellisError::UnknownNode(name.to_string()))
        }
    }

    /// Collect every structural problem of the graph.
    fn violations(&self) -> Vec<String> {
        let mut problems = Vec::new();

        match self.entry_edges.len() {
            0 => problems.push("no edge from START".to_string()),
            1 => {}
            n => problems.push(format!(
                "{} edges from START ({}); exactly one is allowed",
                n,
                self.entry_edges.join(", ")
            )),
        }
        if self.entry_edges.iter().any(|dst| dst == END) {
            problems.push("START leads directly to END".to_string());
        }

        for name in &self.order {
            if !self.edges.contains_key(name) {
                problems.push(format!("node '{}' has no outgoing edge", name));
            }
        }

        let reachable = self.reachable_from_start();
        for name in &self.order {
            if !reachable.contains(name.as_str()) {
                problems.push(format!("node '{}' is unreachable from START", name));
            }
        }

        problems
    }

    fn reachable_from_start(&self) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.entry_edges.iter().map(|s| s.as_str()).collect();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(edge) = self.edges.get(name) {
                for target in edge.targets() {
                    if let Target::Node(next) = target {
                        queue.push_back(next.as_str());
                    }
                }
            }
        }
        seen
    }

    /// Validate and freeze the graph. Runs without persistence.
    pub fn compile(self) -> Result<CompiledGraph> {
        self.compile_inner(None)
    }

    /// Validate and freeze the graph with a checkpointer for thread memory.
    pub fn compile_with_checkpointer(
        self,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Result<CompiledGraph> {
        self.compile_inner(Some(checkpointer))
    }

    fn compile_inner(self, checkpointer: Option<Arc<dyn Checkpointer>>) -> Result<CompiledGraph> {
        let problems = self.violations();
        if !problems.is_empty() {
            return Err(TrellisError::GraphValidation(problems));
        }

        let entry = self.entry_edges[0].clone();
        debug!(
            entry = %entry,
            nodes = self.nodes.len(),
            persistent = checkpointer.is_some(),
            "Graph compiled"
        );
        Ok(CompiledGraph::new(
            self.schema,
            self.nodes,
            self.edges,
            entry,
            checkpointer,
        ))
    }
}
