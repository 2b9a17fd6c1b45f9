use std::collections::BTreeMap;
use std::sync::Arc;

use trellis_core::error::{Result, TrellisError};

use crate::state::State;

/// Reserved source marker: the single edge out of START picks the entry node.
pub const START: &str = "__start__";
/// Reserved terminal marker: reaching END finishes the run.
pub const END: &str = "__end__";

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    End,
}

impl Target {
    pub(crate) fn parse(name: &str) -> Self {
        if name == END {
            Target::End
        } else {
            Target::Node(name.to_string())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Target::Node(n) => n,
            Target::End => END,
        }
    }
}

/// Dispatch function for a conditional edge.
///
/// Must be a pure function of the state and return one of the labels
/// declared when the edge was registered.
pub trait Router: Send + Sync + 'static {
    fn route(&self, state: &State) -> String;
}

impl<F> Router for F
where
    F: Fn(&State) -> String + Send + Sync + 'static,
{
    fn route(&self, state: &State) -> String {
        self(state)
    }
}

/// Outgoing edge of a node.
#[derive(Clone)]
pub enum Edge {
    /// Always go to the same target.
    Direct(Target),
    /// Ask the router for a label and follow the mapped target.
    Conditional {
        router: Arc<dyn Router>,
        routes: BTreeMap<String, Target>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(target) => f.debug_tuple("Direct").field(target).finish(),
            Edge::Conditional { routes, .. } => f
                .debug_struct("Conditional")
                .field("routes", routes)
                .finish(),
        }
    }
}

impl Edge {
    /// Every target this edge can lead to.
    pub fn targets(&self) -> Vec<&Target> {
        match self {
            Edge::Direct(target) => vec![target],
            Edge::Conditional { routes, .. } => routes.values().collect(),
        }
    }

    /// Declared labels of a conditional edge (empty for direct edges).
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Edge::Direct(_) => vec![],
            Edge::Conditional { routes, .. } => routes.keys().map(|k| k.as_str()).collect(),
        }
    }

    /// Resolve the next target given the post-merge state of `node`.
    pub fn resolve(&self, node: &str, state: &State) -> Result<Target> {
        match self {
            Edge::Direct(target) => Ok(target.clone()),
            Edge::Conditional { router, routes } => {
                let label = router.route(state);
                routes
                    .get(&label)
                    .cloned()
                    .ok_or_else(|| TrellisError::UnknownRoute {
                        node: node.to_string(),
                        label,
                    })
            }
        }
    }
}
