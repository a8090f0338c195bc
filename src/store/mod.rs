//! Run record persistence.

pub mod file;
pub mod memory;

pub use file::FileRunStore;
pub use memory::MemoryRunStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::run::{RunOverview, RunRecord};

/// Prefix of every run id, also used to recognise run files
pub const RUN_ID_PREFIX: &str = "test-";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid test ID format: {0}")]
    InvalidId(String),

    #[error("Test run not found: {0}")]
    NotFound(String),

    #[error("Invalid test run data structure in {0}")]
    Corrupt(String),
}

/// Storage for completed runs, one record per run id
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Write a record under its own id, replacing any previous one
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError>;

    /// Read one record back
    async fn load(&self, id: &str) -> Result<RunRecord, StoreError>;

    /// Overviews of all stored runs, newest first
    async fn list(&self) -> Result<Vec<RunOverview>, StoreError>;
}

/// Accept only `test-` ids made of ASCII alphanumerics, `-` and `_`
pub fn validate_run_id(id: &str) -> Result<(), StoreError> {
    let valid = id.len() > RUN_ID_PREFIX.len()
        && id.starts_with(RUN_ID_PREFIX)
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

pub(crate) fn sort_newest_first(overviews: &mut [RunOverview]) {
    overviews.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_run_id() {
        assert!(validate_run_id("test-1718000000000").is_ok());
        assert!(validate_run_id("test-abc_DEF-1").is_ok());

        assert!(validate_run_id("test-").is_err());
        assert!(validate_run_id("run-123").is_err());
        assert!(validate_run_id("test-../../etc/passwd").is_err());
        assert!(validate_run_id("test-1/2").is_err());
        assert!(validate_run_id("test-1.json").is_err());
        assert!(validate_run_id("").is_err());
    }

    #[test]
    fn test_store_error_messages() {
        let err = StoreError::InvalidId("bad".to_string());
        assert_eq!(err.to_string(), "Invalid test ID format: bad");

        let err = StoreError::NotFound("test-1".to_string());
        assert_eq!(err.to_string(), "Test run not found: test-1");
    }
}
