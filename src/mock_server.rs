//! Mock chat-completions upstream for local runs and end-to-end tests.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::completion::TokenUsage;
use crate::models::openai::{
    ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
};

/// Mock server behaviour
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Port to bind, 0 for a random one
    pub port: u16,
    /// Delay before every response
    pub latency_ms: u64,
    /// Probability in [0, 1] that a call answers 500
    pub error_rate: f64,
    /// 1-based arrival ordinals that always answer 500
    pub failing_calls: Vec<u64>,
    /// Upper bound on words in a completion, further capped by max_tokens
    pub completion_words: usize,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            latency_ms: 50,
            error_rate: 0.0,
            failing_calls: Vec::new(),
            completion_words: 12,
        }
    }
}

struct MockState {
    config: MockServerConfig,
    calls: Arc<AtomicU64>,
}

/// Local fake of the chat-completions endpoint
pub struct MockOpenAiServer {
    config: MockServerConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    calls: Arc<AtomicU64>,
    port: u16,
}

impl MockOpenAiServer {
    /// Create a new mock server with the given configuration
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
            calls: Arc::new(AtomicU64::new(0)),
            port: 0,
        }
    }

    /// Start the mock server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let state = Arc::new(MockState {
            config: self.config.clone(),
            calls: Arc::clone(&self.calls),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = Router::new()
            .route("/chat/completions", post(handle_completion))
            .route("/v1/chat/completions", post(handle_completion))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tracing::info!(port, "Mock upstream listening");
        Ok(port)
    }

    /// Get the server's port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL to hand to the completion client
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Number of completion calls received so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOpenAiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_completion(
    State(state): State<Arc<MockState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    // Ordinal is taken on arrival so failing_calls stays deterministic
    let ordinal = state.calls.fetch_add(1, Ordering::SeqCst) + 1;
    let config = &state.config;

    if config.latency_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.latency_ms)).await;
    }

    let random_failure = config.error_rate > 0.0 && rand::thread_rng().gen::<f64>() < config.error_rate;
    if random_failure || config.failing_calls.contains(&ordinal) {
        tracing::debug!(ordinal, "Mock upstream returning simulated error");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": {
                    "message": format!("Simulated upstream failure on call {}", ordinal),
                    "type": "server_error",
                }
            })),
        )
            .into_response();
    }

    let prompt_tokens = request
        .messages
        .iter()
        .filter_map(|m| m.content.as_deref())
        .map(|c| c.split_whitespace().count() as u64)
        .sum::<u64>();

    let limit = request
        .max_tokens
        .map(|m| m as usize)
        .unwrap_or(config.completion_words)
        .min(config.completion_words)
        .max(1);
    let content = generate_content(limit);
    let completion_tokens = content.split_whitespace().count() as u64;

    let mut response = ChatCompletionResponse::new(
        format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        request.model,
        vec![ChatCompletionChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: Some(content),
            },
            finish_reason: Some("stop".to_string()),
        }],
    );
    response.usage = Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    });

    (StatusCode::OK, Json(response)).into_response()
}

/// Generate `words` random words
fn generate_content(words: usize) -> String {
    const WORDS: &[&str] = &[
        "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "hello", "world", "rate",
        "limit", "token", "model", "test", "latency", "request", "response", "burst", "quota",
    ];

    let mut rng = rand::thread_rng();
    (0..words)
        .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn post(server: &MockOpenAiServer, max_tokens: u32) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/chat/completions", server.url()))
            .json(&json!({
                "model": "mock-model",
                "messages": [{"role": "user", "content": "one two three"}],
                "max_tokens": max_tokens
            }))
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_mock_server_returns_completion() {
        let mut server = MockOpenAiServer::new(MockServerConfig {
            latency_ms: 1,
            ..Default::default()
        });
        let port = server.start().await.unwrap();
        assert!(port > 0);

        let resp = post(&server, 4).await;
        assert!(resp.status().is_success());

        let body: ChatCompletionResponse = resp.json().await.unwrap();
        assert!(body.id.starts_with("chatcmpl-"));
        assert_eq!(body.model, "mock-model");
        let usage = body.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(server.calls(), 1);

        server.stop();
    }

    #[tokio::test]
    async fn test_failing_calls_by_ordinal() {
        let mut server = MockOpenAiServer::new(MockServerConfig {
            latency_ms: 0,
            failing_calls: vec![2],
            ..Default::default()
        });
        server.start().await.unwrap();

        assert_eq!(post(&server, 2).await.status(), 200);
        assert_eq!(post(&server, 2).await.status(), 500);
        assert_eq!(post(&server, 2).await.status(), 200);
        assert_eq!(server.calls(), 3);
    }

    #[tokio::test]
    async fn test_error_rate_one_always_fails() {
        let mut server = MockOpenAiServer::new(MockServerConfig {
            latency_ms: 0,
            error_rate: 1.0,
            ..Default::default()
        });
        server.start().await.unwrap();

        let resp = post(&server, 2).await;
        assert_eq!(resp.status(), 500);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["type"], "server_error");
    }
}
