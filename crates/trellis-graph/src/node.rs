use std::future::Future;

use futures::future::BoxFuture;

use trellis_core::error::Result;

use crate::state::{State, StateUpdate};

/// A unit of work in the graph.
///
/// A node reads the current state and returns only the fields it changes.
/// It never mutates its input; the executor merges the returned update.
/// Collaborators (model clients, tool registries) are injected when the
/// node is constructed.
pub trait Node: Send + Sync + 'static {
    fn run<'a>(&'a self, state: &'a State) -> BoxFuture<'a, Result<StateUpdate>>;
}

/// Node backed by a synchronous closure.
pub struct FnNode<F> {
    f: F,
}

/// Wrap a synchronous `Fn(&State) -> Result<StateUpdate>` as a node.
pub fn node_fn<F>(f: F) -> FnNode<F>
where
    F: Fn(&State) -> Result<StateUpdate> + Send + Sync + 'static,
{
    FnNode { f }
}

impl<F> Node for FnNode<F>
where
    F: Fn(&State) -> Result<StateUpdate> + Send + Sync + 'static,
{
    fn run<'a>(&'a self, state: &'a State) -> BoxFuture<'a, Result<StateUpdate>> {
        let result = (self.f)(state);
        Box::pin(async move { result })
    }
}

/// Node backed by an async closure over an owned snapshot of the state.
pub struct AsyncFnNode<F> {
    f: F,
}

/// Wrap an async `Fn(State) -> impl Future<Output = Result<StateUpdate>>`
/// as a node. The closure receives its own copy of the state.
pub fn async_node<F, Fut>(f: F) -> AsyncFnNode<F>
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateUpdate>> + Send + 'static,
{
    AsyncFnNode { f }
}

impl<F, Fut> Node for AsyncFnNode<F>
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateUpdate>> + Send + 'static,
{
    fn run<'a>(&'a self, state: &'a State) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin((self.f)(state.clone()))
    }
}
