use std::sync::Arc;

use serde_json::json;

use trellis_agents::{calculator, support, MESSAGES};
use trellis_core::types::ChatMessage;
use trellis_core::TrellisError;
use trellis_graph::{
    node_fn, Checkpointer, MemorySaver, RunConfig, State, StateGraph, StateSchema, StateUpdate,
    END, START,
};
use trellis_test_utils::{texts, ScriptedLlm};

fn append_x(_state: &State) -> trellis_core::Result<StateUpdate> {
    Ok(StateUpdate::new().set("items", json!(["x"])))
}

#[test]
fn test_node_without_outgoing_edge_fails_compile() {
    let mut graph = StateGraph::new(StateSchema::new().field("value"));
    graph
        .add_node("a", node_fn(|_: &State| Ok(StateUpdate::new())))
        .unwrap();
    graph
        .add_node("b", node_fn(|_: &State| Ok(StateUpdate::new())))
        .unwrap();
    graph.add_edge(START, "a").unwrap();
    graph.add_edge("a", "b").unwrap();

    let err = graph.compile().err().expect("compile must fail");
    match err {
        TrellisError::GraphValidation(problems) => {
            assert!(problems.iter().any(|p| p.contains("b")));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_append_node_twice_appends_in_order() {
    let mut graph = StateGraph::new(StateSchema::new().append("items"));
    graph.add_node("first", node_fn(append_x)).unwrap();
    graph.add_node("second", node_fn(append_x)).unwrap();
    graph.add_edge(START, "first").unwrap();
    graph.add_edge("first", "second").unwrap();
    graph.add_edge("second", END).unwrap();

    let state = graph
        .compile()
        .unwrap()
        .invoke(
            StateUpdate::new().set("items", json!(["a", "b"])),
            &RunConfig::new(),
        )
        .await
        .unwrap();
    assert_eq!(state.get("items"), Some(&json!(["a", "b", "x", "x"])));
}

#[tokio::test]
async fn test_replace_last_write_wins() {
    let mut graph = StateGraph::new(StateSchema::new().field("value"));
    graph
        .add_node("one", node_fn(|_: &State| Ok(StateUpdate::new().set("value", json!(1)))))
        .unwrap();
    graph
        .add_node("two", node_fn(|_: &State| Ok(StateUpdate::new().set("value", json!(2)))))
        .unwrap();
    graph.add_edge(START, "one").unwrap();
    graph.add_edge("one", "two").unwrap();
    graph.add_edge("two", END).unwrap();

    let state = graph
        .compile()
        .unwrap()
        .invoke(StateUpdate::new().set("value", json!(0)), &RunConfig::new())
        .await
        .unwrap();
    assert_eq!(state.get("value"), Some(&json!(2)));
}

#[tokio::test]
async fn test_resume_starts_from_previous_checkpoint() {
    let llm = Arc::new(ScriptedLlm::texts(&["r1", "r2"]));
    let saver = Arc::new(MemorySaver::new());
    let graph = calculator::graph(llm.clone(), Arc::new(trellis_tools::ToolRegistry::new()))
        .unwrap()
        .compile_with_checkpointer(saver.clone())
        .unwrap();
    let config = RunConfig::new().thread("a");

    graph.invoke(calculator::ask("m1"), &config).await.unwrap();
    let first = saver
        .load_latest(&"a".into())
        .await
        .unwrap()
        .expect("checkpoint after first call");
    assert_eq!(texts(&first.state.messages(MESSAGES).unwrap()), vec!["m1", "r1"]);

    let result = graph.run(calculator::ask("m2"), &config).await.unwrap();
    assert_eq!(result.resumed_from, Some(first.seq));

    // The model saw the resumed history plus the new message.
    assert_eq!(llm.calls()[1].texts(), vec!["m1", "r1", "m2"]);
    assert_eq!(
        texts(&result.state.messages(MESSAGES).unwrap()),
        vec!["m1", "r1", "m2", "r2"]
    );

    // A different thread starts empty.
    let other = graph
        .get_state(&"b".into())
        .await
        .unwrap();
    assert!(other.is_none());
}

#[tokio::test]
async fn test_billing_category_runs_billing_next() {
    let llm = Arc::new(ScriptedLlm::texts(&["billing", "Refund on its way."]));
    let result = support::graph(llm)
        .unwrap()
        .compile()
        .unwrap()
        .run(
            StateUpdate::new().message(MESSAGES, &ChatMessage::user("Charged twice")),
            &RunConfig::new(),
        )
        .await
        .unwrap();

    let nodes: Vec<&str> = result.steps.iter().map(|s| s.node.as_str()).collect();
    assert_eq!(nodes, vec![support::CATEGORIZE, support::BILLING]);
}

#[tokio::test]
async fn test_unmapped_label_is_unknown_route() {
    let mut graph = StateGraph::new(StateSchema::new().field("category"));
    graph
        .add_node("categorize", node_fn(|_: &State| Ok(StateUpdate::new())))
        .unwrap();
    graph
        .add_node("billing", node_fn(|_: &State| Ok(StateUpdate::new())))
        .unwrap();
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
async fn test_cycle_hits_step_limit_on_fifth_step() {
    let mut graph = StateGraph::new(StateSchema::new().append("trace"));
    graph
        .add_node("ping", node_fn(|_: &State| Ok(StateUpdate::new().set("trace", json!("ping")))))
        .unwrap();
    graph
        .add_node("pong", node_fn(|_: &State| Ok(StateUpdate::new().set("trace", json!("pong")))))
        .unwrap();
    graph.add_edge(START, "ping").unwrap();
    graph.add_edge("ping", "pong").unwrap();
    graph.add_edge("pong", "ping").unwrap();

    let saver = Arc::new(MemorySaver::new());
    let compiled = graph.compile_with_checkpointer(saver.clone()).unwrap();

    let err = compiled
        .invoke(StateUpdate::new(), &RunConfig::new().thread("loop").step_limit(4))
        .await
        .unwrap_err();
    assert!(matches!(err, TrellisError::StepLimitExceeded(4)));

    // Exactly four steps ran before the limit tripped.
    let history = saver.history(&"loop".into()).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(
        history[3].state.get("trace"),
        Some(&json!(["ping", "pong", "ping", "pong"]))
    );
}
