use serde::{Deserialize, Serialize};

use crate::completion::TokenUsage;

// ==================================================================================================
// Models for /chat/completions requests
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,

    // Generation parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

// ==================================================================================================
// Models for responses
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    #[serde(default)]
    pub index: i32,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    #[serde(default)]
    pub object: String,
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ChatCompletionResponse {
    pub fn new(id: String, model: String, choices: Vec<ChatCompletionChoice>) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model,
            choices,
            usage: None,
        }
    }

    /// Text of the first choice, if the upstream returned any
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_skips_unset_parameters() {
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: Some(16),
            temperature: None,
            top_p: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["max_tokens"], 16);
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value.get("temperature").is_none());
        assert!(value.get("top_p").is_none());
    }

    #[test]
    fn test_response_tolerates_missing_optional_fields() {
        let body = r#"{
            "id": "chatcmpl-1",
            "created": 1700000000,
            "choices": [{"message": {"role": "assistant", "content": "Hello"}}]
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.first_content(), Some("Hello"));
        assert!(response.usage.is_none());
    }

    #[test]
    fn test_first_content_with_null_content() {
        let body = r#"{
            "id": "chatcmpl-2",
            "created": 1700000000,
            "choices": [{"index": 0, "message": {"role": "assistant", "content": null}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 0, "total_tokens": 3}
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.first_content(), None);
        assert_eq!(response.usage.unwrap().total_tokens, 3);
    }

    #[test]
    fn test_usage_parses_as_token_usage() {
        let body = r#"{
            "id": "chatcmpl-3",
            "created": 1700000000,
            "choices": [],
            "usage": {"prompt_tokens": 7, "completion_tokens": 5}
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.usage,
            Some(TokenUsage {
                prompt_tokens: 7,
                completion_tokens: 5,
                total_tokens: 0,
            })
        );
    }
}
