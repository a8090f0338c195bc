//! Concurrent benchmark runner.
//!
//! - `request`: one timed completion call normalized into an outcome
//! - `record`: pure aggregation into the persisted run record
//! - `orchestrator`: fan-out, settle-all join, reporting and persistence

pub mod orchestrator;
pub mod record;
pub mod request;

pub use orchestrator::{Orchestrator, RunError, RunHandle, RunPhase};
pub use record::{RecordError, RunIdGenerator, RunIdentity};
pub use request::RequestUnit;

use chrono::{DateTime, SecondsFormat, Utc};

/// ISO-8601 timestamp with millisecond precision, as used in progress lines
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
