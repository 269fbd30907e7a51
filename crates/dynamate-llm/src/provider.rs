use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use dynamate_core::errors::GatewayError;
use dynamate_core::provider::{Completion, CompletionRequest, LlmProvider};

use crate::converter;
use crate::models;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Clone, Debug)]
pub struct OpenRouterConfig {
    pub api_key: SecretString,
    /// Model name; an `openrouter/` prefix is stripped.
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl OpenRouterConfig {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// OpenRouter chat-completions provider.
pub struct OpenRouterProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    endpoint: String,
    request_timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key,
            model: models::strip_routing_prefix(&config.model).to_string(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            request_timeout: config.request_timeout,
        })
    }

    fn cost_of(&self, parsed: &converter::ParsedResponse) -> f64 {
        parsed.reported_cost.unwrap_or_else(|| {
            models::find_pricing(&self.model)
                .map(|p| p.calculate_cost(parsed.usage.prompt_tokens, parsed.usage.completion_tokens))
                .unwrap_or(0.0)
        })
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(model = %self.model, messages = request.messages.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let body = converter::build_request_body(request, &self.model);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.request_timeout)
                } else {
                    GatewayError::NetworkError(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let hint = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status, body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after: hint },
                other => other,
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;
        let parsed = converter::parse_response(&text)?;
        let cost_usd = self.cost_of(&parsed);

        debug!(
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            cost_usd,
            tool_calls = parsed.reply.is_tool_calls(),
            "completion received"
        );

        Ok(Completion {
            reply: parsed.reply,
            usage: parsed.usage,
            cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamate_core::messages::Message;
    use dynamate_core::provider::ModelReply;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, model: &str) -> OpenRouterProvider {
        let mut config = OpenRouterConfig::new(SecretString::from("sk-test".to_string()), model);
        config.base_url = server.uri();
        OpenRouterProvider::new(config).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::system("sys"), Message::user("hello")], 0.1)
    }

    #[test]
    fn strips_routing_prefix_from_model() {
        let config = OpenRouterConfig::new(
            SecretString::from("k".to_string()),
            "openrouter/openai/gpt-4.1-2025-04-14",
        );
        let p = OpenRouterProvider::new(config).unwrap();
        assert_eq!(p.model(), "openai/gpt-4.1-2025-04-14");
        assert_eq!(p.name(), "openrouter");
    }

    #[tokio::test]
    async fn sends_bearer_and_parses_reported_cost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(json!({"model": "openai/gpt-4.1", "usage": {"include": true}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hi there"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 3, "cost": 0.5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider(&server, "openrouter/openai/gpt-4.1");
        let completion = p.complete(&request()).await.unwrap();
        assert_eq!(completion.reply, ModelReply::PlainText("hi there".into()));
        assert_eq!(completion.cost_usd, 0.5);
        assert_eq!(completion.usage.completion_tokens, 3);
    }

    #[tokio::test]
    async fn falls_back_to_price_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}],
                "usage": {"prompt_tokens": 1_000_000, "completion_tokens": 0}
            })))
            .mount(&server)
            .await;

        let p = provider(&server, "openai/gpt-4.1-2025-04-14");
        let completion = p.complete(&request()).await.unwrap();
        assert!((completion.cost_usd - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_model_without_cost_is_free() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}],
                "usage": {"prompt_tokens": 500, "completion_tokens": 20}
            })))
            .mount(&server)
            .await;

        let p = provider(&server, "somebody/unknown-model");
        assert_eq!(p.complete(&request()).await.unwrap().cost_usd, 0.0);
    }

    #[tokio::test]
    async fn maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = provider(&server, "m").complete(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationFailed(ref b) if b == "bad key"));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = provider(&server, "m").complete(&request()).await.unwrap_err();
        assert_eq!(err.suggested_delay(), Some(Duration::from_secs(7)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn malformed_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = provider(&server, "m").complete(&request()).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
