use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use trellis_core::error::Result;
use trellis_core::traits::LlmClient;
use trellis_core::types::{ChatMessage, ToolDefinition};
use trellis_graph::{Node, State, StateUpdate};

use crate::MESSAGES;

/// Node that sends the message history to a model and appends its reply.
pub struct ChatNode {
    llm: Arc<dyn LlmClient>,
    system_prompt: Option<String>,
    tools: Vec<ToolDefinition>,
    field: String,
}

impl ChatNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: None,
            tools: vec![],
            field: MESSAGES.to_string(),
        }
    }

    /// Prepend a system message to every request. Not stored in state.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Tools the model may request.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Message-history field to read and append to.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

impl Node for ChatNode {
    fn run<'a>(&'a self, state: &'a State) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let history = state.messages(&self.field)?;
            let mut request = Vec::with_capacity(history.len() + 1);
            if let Some(ref prompt) = self.system_prompt {
                request.push(ChatMessage::system(prompt.as_str()));
            }
            request.extend(history);

            debug!(
                messages = request.len(),
                tools = self.tools.len(),
                "Calling model"
            );
            let reply = self.llm.chat(request, &self.tools).await?;
            debug!(tool_calls = reply.tool_uses().len(), "Model replied");

            Ok(StateUpdate::new().message(self.field.as_str(), &reply))
        })
    }
}
