//! Run orchestration: fan out N request units with no concurrency ceiling,
//! wait for every one of them to settle, aggregate, report and persist.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::completion::CompletionClient;
use crate::events::{ChannelRegistry, RunEvent};
use crate::models::run::{RequestOutcome, RunParameters, RunRecord};
use crate::store::RunStore;

use super::record::{self, RecordError, RunIdGenerator};
use super::request::RequestUnit;
use super::timestamp;

/// Message sent to the subscriber when a run fails outside any request
pub const RUN_FAILED_MESSAGE: &str = "An unexpected error occurred during the test run.";

/// Lifecycle of a run. There is no cancelled state: once dispatched, a run
/// always reaches `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Dispatching,
    Aggregating,
    Completed,
}

/// Orchestrator-level failures; these produce no persisted record
#[derive(Error, Debug)]
pub enum RunError {
    #[error("run record failed reconciliation: {0}")]
    Reconcile(#[from] RecordError),

    #[error("request task lost before settling: {0}")]
    TaskLost(String),
}

/// Handle to a run started in the background
pub struct RunHandle {
    phase: watch::Receiver<RunPhase>,
    task: JoinHandle<Option<RunRecord>>,
}

impl RunHandle {
    /// Current phase
    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Receiver that observes phase transitions
    pub fn watch_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.clone()
    }

    /// Wait for the run; `None` when it ended with an orchestrator-level failure
    pub async fn join(self) -> Option<RunRecord> {
        match self.task.await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "Run task aborted");
                None
            }
        }
    }
}

/// Fans out request units and turns their outcomes into a run record
#[derive(Clone)]
pub struct Orchestrator {
    client: Arc<dyn CompletionClient>,
    registry: ChannelRegistry,
    store: Arc<dyn RunStore>,
    run_ids: &'static RunIdGenerator,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: ChannelRegistry,
        store: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            client,
            registry,
            store,
            run_ids: RunIdGenerator::global(),
        }
    }

    /// Start a run in the background.
    ///
    /// Orchestrator-level failures are logged and reported to the subscriber
    /// as an `error` event.
    pub fn start(&self, parameters: RunParameters) -> RunHandle {
        let (phase_tx, phase_rx) = watch::channel(RunPhase::Pending);
        let orchestrator = self.clone();

        let task = tokio::spawn(async move {
            let subscriber_id = parameters.subscriber_id.clone();
            let result = orchestrator.run_with_phase(parameters, &phase_tx).await;
            phase_tx.send_replace(RunPhase::Completed);

            match result {
                Ok(record) => Some(record),
                Err(err) => {
                    orchestrator.report_failure(&subscriber_id, &err);
                    None
                }
            }
        });

        RunHandle {
            phase: phase_rx,
            task,
        }
    }

    /// Log an orchestrator-level failure and tell the subscriber. Nothing is
    /// persisted for such a run.
    pub fn report_failure(&self, subscriber_id: &str, err: &RunError) {
        tracing::error!(
            subscriber_id = %subscriber_id,
            error = %err,
            "Error during test run"
        );
        self.registry
            .send(subscriber_id, RunEvent::error(RUN_FAILED_MESSAGE));
    }

    /// Execute a run to completion
    pub async fn run(&self, parameters: RunParameters) -> Result<RunRecord, RunError> {
        let (phase_tx, _phase_rx) = watch::channel(RunPhase::Pending);
        self.run_with_phase(parameters, &phase_tx).await
    }

    async fn run_with_phase(
        &self,
        parameters: RunParameters,
        phase: &watch::Sender<RunPhase>,
    ) -> Result<RunRecord, RunError> {
        let parameters = Arc::new(parameters);
        let subscriber_id = parameters.subscriber_id.as_str();
        let identity = self.run_ids.next(Utc::now());
        let run_id = identity.id.clone();

        set_phase(phase, RunPhase::Dispatching, &run_id);
        self.registry.send(
            subscriber_id,
            RunEvent::log(format!(
                "[{}] Starting test: {} concurrent requests...",
                timestamp(identity.started_at),
                parameters.num_requests
            )),
        );
        tracing::info!(
            run_id = %run_id,
            model = %parameters.model,
            num_requests = parameters.num_requests,
            "Starting test run"
        );

        let started = Instant::now();
        let outcomes = self.dispatch_all(&parameters).await?;
        let elapsed = started.elapsed();

        set_phase(phase, RunPhase::Aggregating, &run_id);
        let record = record::build(identity, &parameters, outcomes, elapsed)?;
        let summary = &record.summary;

        self.registry.send(
            subscriber_id,
            RunEvent::log(format!(
                "[{}] Test complete. Total time: {:.2}s. Successful: {}, Failed: {}.",
                timestamp(Utc::now()),
                summary.total_duration,
                summary.successful_count,
                summary.failed_count
            )),
        );
        self.registry
            .send(subscriber_id, RunEvent::Complete(summary.clone()));
        tracing::info!(
            run_id = %run_id,
            total_duration_secs = summary.total_duration,
            successful = summary.successful_count,
            failed = summary.failed_count,
            "Test run complete"
        );

        // The subscriber already saw `complete`; a failed save only loses history
        match self.store.save(&record).await {
            Ok(()) => tracing::info!(run_id = %run_id, "Test run saved"),
            Err(e) => tracing::error!(run_id = %run_id, error = %e, "Error saving test run"),
        }

        set_phase(phase, RunPhase::Completed, &run_id);
        Ok(record)
    }

    /// Launch all units back to back and collect them in settle order.
    ///
    /// A panicking unit settles as a failed outcome for its request number,
    /// so the join never short-circuits.
    async fn dispatch_all(
        &self,
        parameters: &Arc<RunParameters>,
    ) -> Result<Vec<RequestOutcome>, RunError> {
        let unit = Arc::new(RequestUnit::new(
            Arc::clone(&self.client),
            self.registry.clone(),
            Arc::clone(parameters),
        ));

        let mut tasks = JoinSet::new();
        for request_number in 1..=parameters.num_requests {
            let unit = Arc::clone(&unit);
            tasks.spawn(async move {
                let start = Instant::now();
                match AssertUnwindSafe(unit.execute(request_number))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!(request_number, "Request task panicked");
                        unit.fail(
                            request_number,
                            start.elapsed(),
                            "Panic",
                            "request task panicked".to_string(),
                        )
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(parameters.num_requests as usize);
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| RunError::TaskLost(e.to_string()))?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

fn set_phase(phase: &watch::Sender<RunPhase>, next: RunPhase, run_id: &str) {
    let previous = phase.send_replace(next);
    tracing::debug!(run_id, from = ?previous, to = ?next, "Run phase changed");
}
