use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::messages::{Message, ToolInvocation};
use crate::tokens::TokenUsage;
use crate::tools::ToolDefinition;

/// Everything one model call needs.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    /// When false, system turns are delivered with the user role.
    pub supports_system_messages: bool,
}

/// What the model said: either a final plain-text answer or a batch of tool calls.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelReply {
    PlainText(String),
    ToolCallsRequested {
        calls: Vec<ToolInvocation>,
        preamble: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct Completion {
    pub reply: ModelReply,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

/// Trait implemented by each model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError>;
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, temperature: f64) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            temperature,
            max_tokens: None,
            supports_system_messages: true,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system_messages(mut self, supported: bool) -> Self {
        self.supports_system_messages = supported;
        self
    }
}

impl ModelReply {
    /// Build a reply from the raw parts of a provider response. An empty call list
    /// means the model answered in text.
    pub fn from_parts(content: Option<String>, calls: Vec<ToolInvocation>) -> Self {
        if calls.is_empty() {
            ModelReply::PlainText(content.unwrap_or_default())
        } else {
            ModelReply::ToolCallsRequested {
                calls,
                preamble: content.filter(|c| !c.trim().is_empty()),
            }
        }
    }

    pub fn is_tool_calls(&self) -> bool {
        matches!(self, ModelReply::ToolCallsRequested { .. })
    }

    /// The assistant turn to append to the conversation.
    pub fn to_message(&self) -> Message {
        match self {
            ModelReply::PlainText(text) => Message::assistant_text(text.clone()),
            ModelReply::ToolCallsRequested { calls, preamble } => {
                Message::assistant_tool_calls(preamble.clone(), calls.clone())
            }
        }
    }
}
