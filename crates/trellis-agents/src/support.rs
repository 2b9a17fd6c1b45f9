//! Customer-support triage: classify the request, then hand it to a
//! specialist.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::LlmClient;
use trellis_core::types::{ChatMessage, Role};
use trellis_graph::{Node, State, StateGraph, StateSchema, StateUpdate, END, START};

use crate::{ChatNode, MESSAGES};

/// State field holding the normalized category label.
pub const CATEGORY: &str = "category";

pub const CATEGORIZE: &str = "categorize";
pub const BILLING: &str = "billing";
pub const TECHNICAL: &str = "technical";
pub const GENERAL: &str = "general";

const CATEGORIZE_PROMPT: &str = "Classify the customer request below as exactly one of: \
billing, technical, general. Answer with the single word only.\n\nRequest: ";

const BILLING_PROMPT: &str =
    "You are a billing specialist. Help with invoices, charges, refunds and payment methods.";
const TECHNICAL_PROMPT: &str =
    "You are a technical support engineer. Diagnose the problem and give concrete steps.";
const GENERAL_PROMPT: &str =
    "You are a friendly support agent. Answer the question or point to the right team.";

/// Dispatch on `category`: billing and technical go to their specialist,
/// everything else (including a missing category) to general support.
pub fn route_to_specialist(state: &State) -> String {
    match state.get_str(CATEGORY) {
        Some(BILLING) => BILLING.to_string(),
        Some(TECHNICAL) => TECHNICAL.to_string(),
        _ => GENERAL.to_string(),
    }
}

/// Asks the model for a one-word category for the latest user message.
pub struct Categorizer {
    llm: Arc<dyn LlmClient>,
}

impl Categorizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Node for Categorizer {
    fn run<'a>(&'a self, state: &'a State) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let request = state
                .messages(MESSAGES)?
                .into_iter()
                .rev()
                .find(|m| m.role == Role::User)
                .ok_or_else(|| TrellisError::InvalidUpdate {
                    field: MESSAGES.to_string(),
                    message: "no user message to categorize".to_string(),
                })?;

            let prompt = format!("{}{}", CATEGORIZE_PROMPT, request.text());
            let reply = self.llm.chat(vec![ChatMessage::user(prompt)], &[]).await?;
            let category = reply.text().trim().to_lowercase();

            info!(category = %category, "Request categorized");
            Ok(StateUpdate::new().set_str(CATEGORY, category))
        })
    }
}

/// `START -> categorize -> {billing, technical, general} -> END`.
pub fn graph(llm: Arc<dyn LlmClient>) -> Result<StateGraph> {
    let schema = StateSchema::new().append(MESSAGES).field(CATEGORY);
    let mut graph = StateGraph::new(schema);

    graph.add_node(CATEGORIZE, Categorizer::new(llm.clone()))?;
    for (name, prompt) in [
        (BILLING, BILLING_PROMPT),
        (TECHNICAL, TECHNICAL_PROMPT),
        (GENERAL, GENERAL_PROMPT),
    ] {
        graph.add_node(name, ChatNode::new(llm.clone()).with_system_prompt(prompt))?;
        graph.add_edge(name, END)?;
    }

    graph.add_edge(START, CATEGORIZE)?;
    graph.add_conditional_edges(
        CATEGORIZE,
        route_to_specialist,
        [(BILLING, BILLING), (TECHNICAL, TECHNICAL), (GENERAL, GENERAL)],
    )?;
    Ok(graph)
}
