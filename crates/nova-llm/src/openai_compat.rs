//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint speaking the `/v1/chat/completions` protocol,
//! which covers the hosted vendors as well as local gateways.

use async_stream::try_stream;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{LlmError, LlmResult};
use crate::provider::{LlmProvider, ProviderConfig, StreamBox};
use crate::types::{Message, StreamEvent};

/// OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiCompatProvider {
    /// Create a provider from a config.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn build_request(&self, messages: &[Message], stream: bool) -> Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "stream": stream,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> LlmResult<reqwest::RequestBuilder> {
        let Some(api_key) = &self.config.api_key else {
            if !is_local_url(&self.config.base_url) {
                return Err(LlmError::ApiKeyNotConfigured {
                    provider: "openai-compat".to_string(),
                });
            }
            return Ok(request);
        };
        let mut value = reqwest::header::HeaderValue::try_from(format!("Bearer {api_key}"))
            .map_err(|e| LlmError::ApiRequestFailed(format!("invalid API key characters: {e}")))?;
        value.set_sensitive(true);
        Ok(request.header("Authorization", value))
    }

    async fn send(&self, body: Value) -> LlmResult<reqwest::Response> {
        let request = self
            .client
            .post(&self.config.base_url)
            .header("Content-Type", "application/json");
        let response = self
            .authorize(request)?
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequestFailed(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "LLM endpoint error");
            return Err(LlmError::InvalidResponse(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[Message]) -> LlmResult<String> {
        debug!(model = %self.config.model, "requesting completion");
        let response = self.send(self.build_request(messages, false)).await?;
        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))
    }

    async fn stream(&self, messages: &[Message]) -> LlmResult<StreamBox> {
        debug!(model = %self.config.model, "starting completion stream");
        let response = self.send(self.build_request(messages, true)).await?;

        let stream = try_stream! {
            use futures::StreamExt;

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| LlmError::StreamingError(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE events are separated by a blank line.
                while let Some(boundary) = buffer.find("\n\n") {
                    let event = buffer[..boundary].to_string();
                    buffer = buffer[boundary + 2..].to_string();

                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data.trim() == "[DONE]" {
                            yield StreamEvent::Done;
                            return;
                        }
                        if let Ok(delta) = serde_json::from_str::<StreamResponse>(data) {
                            if let Some(choice) = delta.choices.first() {
                                if let Some(content) = &choice.delta.content {
                                    if !content.is_empty() {
                                        yield StreamEvent::TextDelta(content.clone());
                                    }
                                }
                                if choice.finish_reason.is_some() {
                                    yield StreamEvent::Done;
                                    return;
                                }
                            }
                        }
                    }
                }
            }
            yield StreamEvent::Done;
        };
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Local endpoints typically run without authentication.
fn is_local_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("localhost") || lower.contains("127.0.0.1") || lower.contains("[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(ProviderConfig::new(
            "http://localhost:1234/v1/chat/completions",
            "test-model",
        ))
    }

    #[test]
    fn request_embeds_model_and_messages() {
        let provider = local_provider();
        let request = provider.build_request(&[Message::user("안녕하세요")], true);
        assert_eq!(request["model"], "test-model");
        assert_eq!(request["stream"], true);
        assert_eq!(request["messages"][0]["content"], "안녕하세요");
    }

    #[test]
    fn local_endpoint_needs_no_key() {
        let provider = local_provider();
        assert!(provider.authorize(Client::new().post("http://localhost:1234")).is_ok());
    }

    #[test]
    fn remote_endpoint_without_key_is_rejected() {
        let provider = OpenAiCompatProvider::new(ProviderConfig::new(
            "https://api.example.com/v1/chat/completions",
            "m",
        ));
        let result = provider.authorize(Client::new().post("https://api.example.com"));
        assert!(matches!(result, Err(LlmError::ApiKeyNotConfigured { .. })));
    }

    #[test]
    fn stream_response_parses_delta() {
        let data = r#"{"choices":[{"delta":{"content":"안녕"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("안녕"));
    }
}
