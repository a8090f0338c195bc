//! Event Channel: the typed events pushed to a run's single subscriber and the
//! registry that routes them.

pub mod registry;

pub use registry::{ChannelRegistry, SubscriberStream};

use serde_json::json;

use crate::models::run::{RequestOutcome, Summary};

/// Domain events delivered over a subscriber's stream.
///
/// Keep-alive pings are a transport concern and never appear here.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Acknowledgment sent first on every newly opened channel
    Connected { message: String },
    /// Free-text progress line
    Log { message: String },
    /// One settled request
    Result(RequestOutcome),
    /// Run summary; always the last domain event of a run
    Complete(Summary),
    /// Orchestrator-level failure, distinct from a failed request
    Error { message: String },
}

impl RunEvent {
    pub fn connected() -> Self {
        RunEvent::Connected {
            message: "SSE connection established.".to_string(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        RunEvent::Log {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RunEvent::Error {
            message: message.into(),
        }
    }

    /// SSE `event:` name
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::Connected { .. } => "connected",
            RunEvent::Log { .. } => "log",
            RunEvent::Result(_) => "result",
            RunEvent::Complete(_) => "complete",
            RunEvent::Error { .. } => "error",
        }
    }

    /// JSON payload for the SSE `data:` line
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            RunEvent::Connected { message }
            | RunEvent::Log { message }
            | RunEvent::Error { message } => serde_json::to_string(&json!({ "message": message })),
            RunEvent::Result(outcome) => serde_json::to_string(outcome),
            RunEvent::Complete(summary) => serde_json::to_string(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_event_names() {
        assert_eq!(RunEvent::connected().name(), "connected");
        assert_eq!(RunEvent::log("x").name(), "log");
        assert_eq!(RunEvent::error("x").name(), "error");
        let summary = Summary {
            total_duration: 1.0,
            successful_count: 1,
            failed_count: 0,
            total_requests: 1,
        };
        assert_eq!(RunEvent::Complete(summary).name(), "complete");
    }

    #[test]
    fn test_message_payload() {
        let payload = RunEvent::log("Request 1: Sending...").payload().unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["message"], "Request 1: Sending...");
    }

    #[test]
    fn test_complete_payload_is_summary() {
        let summary = Summary {
            total_duration: 2.5,
            successful_count: 3,
            failed_count: 1,
            total_requests: 4,
        };
        let payload = RunEvent::Complete(summary).payload().unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["successfulCount"], 3);
        assert_eq!(value["failedCount"], 1);
        assert_eq!(value["totalRequests"], 4);
        assert_eq!(value["totalDuration"], 2.5);
    }
}
