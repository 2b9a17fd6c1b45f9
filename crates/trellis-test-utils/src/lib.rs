//! Fake collaborators and fixtures shared by Trellis tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::LlmClient;
use trellis_core::types::{ChatMessage, ToolDefinition};

/// One request seen by a [`ScriptedLlm`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl RecordedCall {
    /// Text of every message in the request, in order.
    pub fn texts(&self) -> Vec<String> {
        texts(&self.messages)
    }
}

/// LLM that replays a fixed list of replies and records every request.
///
/// Once the script runs out, calls fail with `TrellisError::Llm`.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ChatMessage>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script of plain-text assistant replies.
    pub fn texts(replies: &[&str]) -> Self {
        Self::new(
            replies
                .iter()
                .map(|r| ChatMessage::assistant_text(*r))
                .collect(),
        )
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatMessage>> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages,
            tools: tools.to_vec(),
        });
        let reply = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            reply.ok_or_else(|| TrellisError::Llm("scripted replies exhausted".into()))
        })
    }
}

/// LLM whose every call fails.
pub struct FailingLlm(pub String);

impl LlmClient for FailingLlm {
    fn chat(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatMessage>> {
        let message = self.0.clone();
        Box::pin(async move { Err(TrellisError::Llm(message)) })
    }
}

/// Assistant reply requesting a single tool call.
pub fn tool_call(id: &str, name: &str, input: serde_json::Value) -> ChatMessage {
    ChatMessage::assistant_tool_calls("", vec![(id.to_string(), name.to_string(), input)])
}

/// Text of each message, in order.
pub fn texts(messages: &[ChatMessage]) -> Vec<String> {
    messages.iter().map(|m| m.text()).collect()
}
