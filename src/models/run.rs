//! Run data model: parameters, per-request outcomes, the derived summary and
//! the record handed to persistence.
//!
//! Field names on the wire are part of the stored format and must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::completion::TokenUsage;

/// Shared parameters of one run. Built once by the front door, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParameters {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub num_requests: u32,
    pub temperature: f64,
    pub top_p: f64,
    /// Event Channel key; transient, never persisted
    #[serde(skip)]
    pub subscriber_id: String,
}

/// Subset of the run parameters echoed on every outcome for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoedParameters {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl From<&RunParameters> for EchoedParameters {
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

/// Success or failure of a single completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum OutcomeResult {
    Success {
        response: String,
        usage: TokenUsage,
        openai_id: String,
        openai_created: i64,
    },
    Failed {
        error: String,
    },
}

/// Normalized outcome of one request unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    #[serde(rename = "requestNumber")]
    pub request_number: u32,
    /// Seconds, measured on both paths
    pub duration: f64,
    #[serde(flatten)]
    pub result: OutcomeResult,
    #[serde(flatten)]
    pub echo: EchoedParameters,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, OutcomeResult::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.result {
            OutcomeResult::Failed { error } => Some(error),
            OutcomeResult::Success { .. } => None,
        }
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        match &self.result {
            OutcomeResult::Success { usage, .. } => Some(usage),
            OutcomeResult::Failed { .. } => None,
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_success() {
            "Success"
        } else {
            "Failed"
        }
    }
}

/// Aggregated counts for a settled run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Wall clock seconds from first dispatch to last settle
    pub total_duration: f64,
    pub successful_count: u32,
    pub failed_count: u32,
    pub total_requests: u32,
}

/// Immutable record of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    #[serde(with = "millis_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub parameters: RunParameters,
    pub summary: Summary,
    /// Completion order, not request order
    pub results: Vec<RequestOutcome>,
}

impl RunRecord {
    /// Outcomes sorted by request number
    pub fn results_by_request(&self) -> Vec<&RequestOutcome> {
        let mut sorted: Vec<&RequestOutcome> = self.results.iter().collect();
        sorted.sort_by_key(|outcome| outcome.request_number);
        sorted
    }
}

/// History list entry: a record without its per-request results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOverview {
    pub id: String,
    #[serde(with = "millis_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub parameters: RunParameters,
    pub summary: Summary,
}

impl From<&RunRecord> for RunOverview {
    fn from(record: &RunRecord) -> Self {
        Self {
            id: record.id.clone(),
            timestamp: record.timestamp,
            parameters: record.parameters.clone(),
            summary: record.summary.clone(),
        }
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix
mod millis_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

// ==================================================================================================
// Front door request body
// ==================================================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Missing required parameters.")]
    Missing,

    #[error("Invalid parameter values.")]
    Invalid,
}

/// Body of `POST /api/start-test`. Numeric fields accept numbers or numeric strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTestRequest {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub max_tokens: Option<Value>,
    pub num_requests: Option<Value>,
    pub temperature: Option<Value>,
    pub top_p: Option<Value>,
    pub sse_client_id: Option<String>,
}

impl StartTestRequest {
    /// Check presence and ranges, producing the run parameters
    pub fn into_parameters(self) -> Result<RunParameters, ParameterError> {
        let (
            Some(model),
            Some(prompt),
            Some(max_tokens),
            Some(num_requests),
            Some(temperature),
            Some(top_p),
            Some(subscriber_id),
        ) = (
            non_empty(self.model),
            non_empty(self.prompt),
            self.max_tokens,
            self.num_requests,
            self.temperature,
            self.top_p,
            non_empty(self.sse_client_id),
        )
        else {
            return Err(ParameterError::Missing);
        };

        let max_tokens = positive_integer(&max_tokens).ok_or(ParameterError::Invalid)?;
        let num_requests = positive_integer(&num_requests).ok_or(ParameterError::Invalid)?;
        let temperature = number(&temperature)
            .filter(|t| (0.0..=2.0).contains(t))
            .ok_or(ParameterError::Invalid)?;
        let top_p = number(&top_p)
            .filter(|p| (0.0..=1.0).contains(p))
            .ok_or(ParameterError::Invalid)?;

        Ok(RunParameters {
            model,
            prompt,
            max_tokens,
            num_requests,
            temperature,
            top_p,
            subscriber_id,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn positive_integer(value: &Value) -> Option<u32> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
}
