use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use dynamate_core::errors::GatewayError;
use dynamate_core::ids::ToolCallId;
use dynamate_core::messages::{Message, ToolInvocation};
use dynamate_core::provider::{CompletionRequest, ModelReply};
use dynamate_core::tokens::TokenUsage;

/// Convert a completion request into an OpenAI-compatible chat-completions body.
pub fn build_request_body(request: &CompletionRequest, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "temperature": request.temperature,
        "messages": convert_messages(&request.messages, request.supports_system_messages),
        // Ask OpenRouter to report the billed cost in `usage.cost`
        "usage": {"include": true},
    });

    if let Some(max) = request.max_tokens {
        body["max_tokens"] = json!(max);
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
        body["tool_choice"] = json!("auto");
    }

    body
}

fn convert_messages(messages: &[Message], supports_system: bool) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg {
            Message::System(m) => {
                let role = if supports_system { "system" } else { "user" };
                json!({"role": role, "content": m.content})
            }
            Message::User(m) => json!({"role": "user", "content": m.content}),
            Message::Assistant(m) => {
                let mut entry = json!({"role": "assistant", "content": m.content});
                if !m.tool_calls.is_empty() {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id.as_str(),
                                "type": "function",
                                "function": {"name": c.name, "arguments": c.arguments},
                            })
                        })
                        .collect();
                    entry["tool_calls"] = json!(calls);
                }
                entry
            }
            Message::Tool(m) => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.as_str(),
                "name": m.name,
                "content": m.content,
            }),
        })
        .collect()
}

// --- Response wire types ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// Some providers omit arguments for no-arg calls.
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default, deserialize_with = "null_as_default")]
    prompt_tokens: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    completion_tokens: u32,
    cost: Option<f64>,
}

/// Providers send `null` where they mean "none"; treat it like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parsed provider response.
#[derive(Debug)]
pub struct ParsedResponse {
    pub reply: ModelReply,
    pub usage: TokenUsage,
    /// Cost reported by the provider, if any.
    pub reported_cost: Option<f64>,
}

/// Parse a chat-completions response body.
pub fn parse_response(body: &str) -> Result<ParsedResponse, GatewayError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::MalformedResponse("response has no choices".into()))?;

    let calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|c| ToolInvocation {
            id: c.id.map(ToolCallId::from_raw).unwrap_or_default(),
            name: c.function.name,
            arguments: c.function.arguments.unwrap_or_default(),
        })
        .collect();

    let (usage, reported_cost) = match response.usage {
        Some(u) => (
            TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            },
            u.cost,
        ),
        None => (TokenUsage::default(), None),
    };

    Ok(ParsedResponse {
        reply: ModelReply::from_parts(choice.message.content, calls),
        usage,
        reported_cost,
    })
}
