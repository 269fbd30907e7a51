use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use dynamate_core::errors::GatewayError;
use dynamate_core::messages::ToolInvocation;
use dynamate_core::provider::{Completion, CompletionRequest, LlmProvider, ModelReply};
use dynamate_core::tokens::TokenUsage;

/// Pre-programmed replies for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Reply { reply: ModelReply, cost_usd: f64 },
    Error(GatewayError),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Reply {
            reply: ModelReply::PlainText(text.to_string()),
            cost_usd: 0.0,
        }
    }

    /// One tool call with raw argument text.
    pub fn tool_call(name: &str, arguments: &str) -> Self {
        Self::tool_calls(&[(name, arguments)])
    }

    /// Several tool calls in one reply, dispatched in listed order.
    pub fn tool_calls(calls: &[(&str, &str)]) -> Self {
        Self::Reply {
            reply: ModelReply::ToolCallsRequested {
                calls: calls
                    .iter()
                    .map(|(name, args)| ToolInvocation::new(*name, *args))
                    .collect(),
                preamble: None,
            },
            cost_usd: 0.0,
        }
    }

    pub fn with_cost(self, cost: f64) -> Self {
        match self {
            Self::Reply { reply, .. } => Self::Reply {
                reply,
                cost_usd: cost,
            },
            other => other,
        }
    }
}

/// Mock provider that returns pre-programmed responses in sequence and records
/// every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Snapshot of every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        match next {
            Some(MockResponse::Reply { reply, cost_usd }) => {
                let prompt_chars: usize = request.messages.iter().map(|m| m.measured_text().len()).sum();
                Ok(Completion {
                    reply,
                    usage: TokenUsage {
                        prompt_tokens: (prompt_chars as u32).div_ceil(4),
                        completion_tokens: 1,
                    },
                    cost_usd,
                })
            }
            Some(MockResponse::Error(e)) => Err(e),
            None => Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamate_core::messages::Message;

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user("hello")], 0.1)
    }

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockProvider::new(vec![
            MockResponse::tool_call("find_input", "{}"),
            MockResponse::text("done").with_cost(0.25),
        ]);

        let first = mock.complete(&request()).await.unwrap();
        assert!(first.reply.is_tool_calls());
        assert_eq!(mock.call_count(), 1);

        let second = mock.complete(&request()).await.unwrap();
        assert_eq!(second.reply, ModelReply::PlainText("done".into()));
        assert_eq!(second.cost_usd, 0.25);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockProvider::new(vec![MockResponse::text("only one")]);
        let _ = mock.complete(&request()).await;
        let err = mock.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("no response configured for call 1"));
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(GatewayError::AuthenticationFailed(
            "bad".into(),
        ))]);
        assert!(mock.complete(&request()).await.is_err());
    }

    #[tokio::test]
    async fn records_requests() {
        let mock = MockProvider::new(vec![MockResponse::text("a"), MockResponse::text("b")]);
        let _ = mock.complete(&request()).await;
        let _ = mock
            .complete(&CompletionRequest::new(vec![Message::user("second")], 0.5))
            .await;
        let seen = mock.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].temperature, 0.5);
        assert_eq!(seen[1].messages[0].content(), Some("second"));
    }

    #[test]
    fn with_cost_leaves_errors_alone() {
        let r = MockResponse::Error(GatewayError::ProviderOverloaded).with_cost(1.0);
        assert!(matches!(r, MockResponse::Error(_)));
    }
}
