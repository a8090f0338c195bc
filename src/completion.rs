//! Completion client seam.
//!
//! The orchestrator only depends on [`CompletionClient`]; the reqwest
//! implementation lives in `http_client`, tests plug in scripted clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::run::RunParameters;

/// One chat completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl From<&RunParameters> for CompletionRequest {
    fn from(parameters: &RunParameters) -> Self {
        Self {
            model: parameters.model.clone(),
            prompt: parameters.prompt.clone(),
            max_tokens: parameters.max_tokens,
            temperature: parameters.temperature,
            top_p: parameters.top_p,
        }
    }
}

/// Token counters reported by the upstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Successful upstream response
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// May be empty; callers decide on a placeholder
    pub text: String,
    pub usage: TokenUsage,
    pub id: String,
    /// Unix seconds as reported by the upstream
    pub created_at: i64,
}

/// Upstream call failures
#[derive(Error, Debug)]
pub enum CompletionError {
    /// Non-success HTTP status; `message` is the response body
    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The request never produced a response
    #[error("HTTP request failed: {message} (kind: {kind})")]
    Transport { kind: &'static str, message: String },

    /// A 2xx response that could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl CompletionError {
    /// Short name used in progress log lines
    pub fn name(&self) -> &'static str {
        match self {
            CompletionError::Upstream { .. } => "UpstreamError",
            CompletionError::Transport { kind, .. } => match *kind {
                "timeout" => "TimeoutError",
                "connection_failed" => "ConnectionError",
                _ => "TransportError",
            },
            CompletionError::Malformed(_) => "MalformedResponse",
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Perform exactly one upstream call
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError>;
}
