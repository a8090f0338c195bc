//! Request unit: one timed completion call normalized into an outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::completion::{CompletionClient, CompletionRequest};
use crate::events::{ChannelRegistry, RunEvent};
use crate::models::run::{EchoedParameters, OutcomeResult, RequestOutcome, RunParameters};

use super::timestamp;

/// Response text used when the upstream returns no content
pub const NO_CONTENT: &str = "No content received";

/// Executes single requests of a run and reports them to the run's subscriber
pub struct RequestUnit {
    client: Arc<dyn CompletionClient>,
    registry: ChannelRegistry,
    parameters: Arc<RunParameters>,
}

impl RequestUnit {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: ChannelRegistry,
        parameters: Arc<RunParameters>,
    ) -> Self {
        Self {
            client,
            registry,
            parameters,
        }
    }

    /// Perform request `request_number`: exactly one upstream call, no retry.
    ///
    /// Both paths emit a `log` line and a `result` event before returning.
    pub async fn execute(&self, request_number: u32) -> RequestOutcome {
        let params = &self.parameters;
        let prefix = log_prefix(request_number);

        self.registry.send(
            &params.subscriber_id,
            RunEvent::log(format!(
                "{} Sending... (Model: {}, Max Tokens: {}, Temp: {}, TopP: {})",
                prefix, params.model, params.max_tokens, params.temperature, params.top_p
            )),
        );
        tracing::debug!(request_number, model = %params.model, "Dispatching request");

        let request = CompletionRequest::from(params.as_ref());
        let start = Instant::now();
        let result = self.client.complete(&request).await;
        let elapsed = start.elapsed();

        match result {
            Ok(completion) => {
                let text = completion.text.trim();
                let response = if text.is_empty() { NO_CONTENT } else { text }.to_string();

                tracing::info!(
                    request_number,
                    duration_secs = elapsed.as_secs_f64(),
                    total_tokens = completion.usage.total_tokens,
                    "Request succeeded"
                );
                self.registry.send(
                    &params.subscriber_id,
                    RunEvent::log(format!(
                        "{} Success in {:.2}s. Usage: {} tokens.",
                        prefix,
                        elapsed.as_secs_f64(),
                        completion.usage.total_tokens
                    )),
                );

                self.settle(
                    request_number,
                    elapsed,
                    OutcomeResult::Success {
                        response,
                        usage: completion.usage,
                        openai_id: completion.id,
                        openai_created: completion.created_at,
                    },
                )
            }
            Err(err) => {
                tracing::error!(
                    request_number,
                    duration_secs = elapsed.as_secs_f64(),
                    error = %err,
                    "Request failed"
                );
                self.fail(request_number, elapsed, err.name(), err.to_string())
            }
        }
    }

    /// Record a failure that happened outside the upstream call
    pub fn fail(
        &self,
        request_number: u32,
        elapsed: Duration,
        name: &str,
        error: String,
    ) -> RequestOutcome {
        self.registry.send(
            &self.parameters.subscriber_id,
            RunEvent::log(format!(
                "{} Error after {:.2}s: {}",
                log_prefix(request_number),
                elapsed.as_secs_f64(),
                name
            )),
        );
        self.settle(request_number, elapsed, OutcomeResult::Failed { error })
    }

    fn settle(&self, request_number: u32, elapsed: Duration, result: OutcomeResult) -> RequestOutcome {
        let outcome = RequestOutcome {
            request_number,
            duration: elapsed.as_secs_f64(),
            result,
            echo: EchoedParameters::from(self.parameters.as_ref()),
        };
        self.registry
            .send(&self.parameters.subscriber_id, RunEvent::Result(outcome.clone()));
        outcome
    }
}

fn log_prefix(request_number: u32) -> String {
    format!("[{}] Request {}:", timestamp(chrono::Utc::now()), request_number)
}
