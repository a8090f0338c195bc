//! Run record builder.
//!
//! Pure aggregation over a settled outcome set. Reconciliation is checked
//! here so that a record that reaches persistence always satisfies
//! `successful + failed == total == N` with request numbers exactly `1..=N`.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::models::run::{RequestOutcome, RunParameters, RunRecord, Summary};
use crate::store::RUN_ID_PREFIX;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("expected {expected} outcomes, got {actual}")]
    CountMismatch { expected: u32, actual: usize },

    #[error("request number {number} is outside 1..={total}")]
    OutOfRange { number: u32, total: u32 },

    #[error("request number {0} appears more than once")]
    Duplicate(u32),
}

/// Identity of a run, fixed at dispatch time
#[derive(Debug, Clone, PartialEq)]
pub struct RunIdentity {
    pub id: String,
    pub started_at: DateTime<Utc>,
}

/// Issues `test-<millis>` ids that never repeat within the process
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    last_millis: AtomicI64,
}

/// Shared by every orchestrator in the process
static RUN_IDS: RunIdGenerator = RunIdGenerator::new();

impl RunIdGenerator {
    pub const fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(0),
        }
    }

    /// Process-wide generator
    pub fn global() -> &'static RunIdGenerator {
        &RUN_IDS
    }

    /// Id for a run starting at `now`; bumps by one millisecond on collision
    pub fn next(&self, now: DateTime<Utc>) -> RunIdentity {
        let wanted = now.timestamp_millis();
        let mut current = self.last_millis.load(Ordering::SeqCst);

        loop {
            let candidate = wanted.max(current + 1);
            match self.last_millis.compare_exchange(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return RunIdentity {
                        id: format!("{}{}", RUN_ID_PREFIX, candidate),
                        started_at: now,
                    }
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Count outcomes into a summary
pub fn summarize(parameters: &RunParameters, outcomes: &[RequestOutcome], elapsed: Duration) -> Summary {
    let successful_count = outcomes.iter().filter(|o| o.is_success()).count() as u32;
    let failed_count = outcomes.len() as u32 - successful_count;

    Summary {
        total_duration: elapsed.as_secs_f64(),
        successful_count,
        failed_count,
        total_requests: parameters.num_requests,
    }
}

/// Verify that request numbers are exactly `1..=N`
pub fn reconcile(parameters: &RunParameters, outcomes: &[RequestOutcome]) -> Result<(), RecordError> {
    let total = parameters.num_requests;
    if outcomes.len() != total as usize {
        return Err(RecordError::CountMismatch {
            expected: total,
            actual: outcomes.len(),
        });
    }

    let mut seen = vec![false; total as usize];
    for outcome in outcomes {
        let number = outcome.request_number;
        if number == 0 || number > total {
            return Err(RecordError::OutOfRange { number, total });
        }
        let slot = &mut seen[(number - 1) as usize];
        if *slot {
            return Err(RecordError::Duplicate(number));
        }
        *slot = true;
    }

    Ok(())
}

/// Assemble the immutable run record
pub fn build(
    identity: RunIdentity,
    parameters: &RunParameters,
    outcomes: Vec<RequestOutcome>,
    elapsed: Duration,
) -> Result<RunRecord, RecordError> {
    reconcile(parameters, &outcomes)?;
    let summary = summarize(parameters, &outcomes, elapsed);

    Ok(RunRecord {
        id: identity.id,
        timestamp: identity.started_at,
        parameters: parameters.clone(),
        summary,
        results: outcomes,
    })
}
