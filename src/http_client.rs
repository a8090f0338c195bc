use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::completion::{Completion, CompletionClient, CompletionError, CompletionRequest};
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};

/// HTTP client for OpenAI-compatible chat completion APIs.
///
/// Every call is a single attempt: retries would skew the load measurement.
pub struct OpenAiHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL without trailing slash, e.g. `https://api.openai.com/v1`
    base_url: String,

    /// Bearer token; requests go out unauthenticated when absent
    api_key: Option<String>,
}

impl OpenAiHttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Full URL of the chat completions endpoint
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage::user(request.prompt.clone())],
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            top_p: Some(request.top_p),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiHttpClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let url = self.completions_url();
        tracing::debug!(url = %url, model = %request.model, "Sending completion request");

        let mut builder = self.client.post(&url).json(&Self::build_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            // Categorize the error for better debugging
            let kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connection_failed"
            } else if e.is_request() {
                "request_error"
            } else if e.is_body() {
                "body_error"
            } else if e.is_decode() {
                "decode_error"
            } else {
                "unknown"
            };

            tracing::warn!(
                error_kind = kind,
                error = %e,
                url = %url,
                "HTTP request error"
            );

            CompletionError::Transport {
                kind,
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                url = %url,
                response_body = %error_text,
                "Upstream returned error response"
            );
            return Err(CompletionError::Upstream {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;
        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| CompletionError::Malformed(e.to_string()))?;

        let text = parsed.first_content().unwrap_or_default().to_string();

        Ok(Completion {
            text,
            usage: parsed.usage.unwrap_or_default(),
            id: parsed.id,
            created_at: parsed.created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            prompt: "Say hello".to_string(),
            max_tokens: 32,
            temperature: 0.5,
            top_p: 0.9,
        }
    }

    #[test]
    fn test_completions_url_strips_trailing_slash() {
        let client = OpenAiHttpClient::new("http://localhost:9999/v1/", None, 10, 5, 5).unwrap();
        assert_eq!(
            client.completions_url(),
            "http://localhost:9999/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_complete_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 32,
                "messages": [{"role": "user", "content": "Say hello"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"chatcmpl-abc","object":"chat.completion","created":1700000000,
                    "model":"gpt-4o-mini",
                    "choices":[{"index":0,"message":{"role":"assistant","content":"Hello there"},"finish_reason":"stop"}],
                    "usage":{"prompt_tokens":9,"completion_tokens":2,"total_tokens":11}}"#,
            )
            .create_async()
            .await;

        let client =
            OpenAiHttpClient::new(&server.url(), Some("sk-test".to_string()), 10, 5, 5).unwrap();
        let completion = client.complete(&sample_request()).await.unwrap();

        assert_eq!(completion.text, "Hello there");
        assert_eq!(completion.id, "chatcmpl-abc");
        assert_eq!(completion.created_at, 1_700_000_000);
        assert_eq!(completion.usage.total_tokens, 11);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_passes_usage_through() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"id":"chatcmpl-u","created":1700000000,
                    "choices":[{"message":{"role":"assistant","content":"ok"}}],
                    "usage":{"prompt_tokens":4,"completion_tokens":1,"total_tokens":5}}"#,
            )
            .create_async()
            .await;

        let client = OpenAiHttpClient::new(&server.url(), None, 10, 5, 5).unwrap();
        let completion = client.complete(&sample_request()).await.unwrap();

        assert_eq!(
            completion.usage,
            crate::completion::TokenUsage {
                prompt_tokens: 4,
                completion_tokens: 1,
                total_tokens: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_complete_without_usage_counts_zero() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"id":"chatcmpl-n","created":1700000000,
                    "choices":[{"message":{"role":"assistant","content":"ok"}}]}"#,
            )
            .create_async()
            .await;

        let client = OpenAiHttpClient::new(&server.url(), None, 10, 5, 5).unwrap();
        let completion = client.complete(&sample_request()).await.unwrap();

        assert_eq!(completion.usage, crate::completion::TokenUsage::default());
    }

    #[tokio::test]
    async fn test_complete_upstream_error_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
            .create_async()
            .await;

        let client = OpenAiHttpClient::new(&server.url(), None, 10, 5, 5).unwrap();
        let err = client.complete(&sample_request()).await.unwrap_err();

        match err {
            CompletionError::Upstream { status, message } => {
                assert_eq!(status, 429);
                assert!(message.contains("Rate limit reached"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = OpenAiHttpClient::new(&server.url(), None, 10, 5, 5).unwrap();
        let err = client.complete(&sample_request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_complete_connection_refused() {
        // Port 9 (discard) is almost never listening locally
        let client = OpenAiHttpClient::new("http://127.0.0.1:9", None, 10, 2, 2).unwrap();
        let err = client.complete(&sample_request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Transport { .. }));
        assert!(!err.to_string().is_empty());
    }
}
