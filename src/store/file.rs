//! One pretty-printed JSON file per run: `<data_dir>/<id>.json`.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{sort_newest_first, validate_run_id, RunStore, StoreError, RUN_ID_PREFIX};
use crate::models::run::{RunOverview, RunRecord};

/// File-backed run store
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    /// Create a store rooted at `dir`; the directory is created on first use
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        if tokio::fs::metadata(&self.dir).await.is_err() {
            tracing::info!(dir = %self.dir.display(), "Data directory not found, creating");
            tokio::fs::create_dir_all(&self.dir).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        validate_run_id(&record.id)?;
        self.ensure_dir().await?;

        let path = self.path_for(&record.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", record.id));
        let body = serde_json::to_vec_pretty(record)?;

        // Write then rename so readers never see a partial file
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(path = %path.display(), "Run record written");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<RunRecord, StoreError> {
        validate_run_id(id)?;
        let path = self.path_for(id);

        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "History file not found");
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let record: RunRecord = serde_json::from_str(&data)?;
        if record.id != id {
            tracing::error!(path = %path.display(), found = %record.id, "Run id does not match file name");
            return Err(StoreError::Corrupt(path.display().to_string()));
        }

        Ok(record)
    }

    async fn list(&self) -> Result<Vec<RunOverview>, StoreError> {
        self.ensure_dir().await?;

        let mut overviews = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with(RUN_ID_PREFIX) || !name.ends_with(".json") {
                continue;
            }

            let parsed = match tokio::fs::read_to_string(entry.path()).await {
                Ok(data) => serde_json::from_str::<RunOverview>(&data).map_err(StoreError::from),
                Err(e) => Err(StoreError::from(e)),
            };

            match parsed {
                Ok(overview) => overviews.push(overview),
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Skipping invalid or incomplete data file");
                }
            }
        }

        sort_newest_first(&mut overviews);
        Ok(overviews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::TokenUsage;
    use crate::models::run::{EchoedParameters, OutcomeResult, RequestOutcome, RunParameters, Summary};
    use chrono::DateTime;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(label: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "gpt-limit-tester-{}-{}",
                label,
                uuid::Uuid::new_v4()
            ));
            Self(dir)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn record(id: &str, millis: i64) -> RunRecord {
        let parameters = RunParameters {
            model: "gpt-4o-mini".to_string(),
            prompt: "hello".to_string(),
            max_tokens: 16,
            num_requests: 2,
            temperature: 0.7,
            top_p: 1.0,
            subscriber_id: String::new(),
        };
        let echo = EchoedParameters::from(&parameters);

        RunRecord {
            id: id.to_string(),
            timestamp: DateTime::from_timestamp_millis(millis).unwrap(),
            parameters,
            summary: Summary {
                total_duration: 1.23,
                successful_count: 1,
                failed_count: 1,
                total_requests: 2,
            },
            results: vec![
                RequestOutcome {
                    request_number: 2,
                    duration: 0.5,
                    result: OutcomeResult::Failed {
                        error: "Upstream error 500: oops".to_string(),
                    },
                    echo: echo.clone(),
                },
                RequestOutcome {
                    request_number: 1,
                    duration: 1.2,
                    result: OutcomeResult::Success {
                        response: "hi".to_string(),
                        usage: TokenUsage {
                            prompt_tokens: 2,
                            completion_tokens: 1,
                            total_tokens: 3,
                        },
                        openai_id: "chatcmpl-1".to_string(),
                        openai_created: 1_700_000_000,
                    },
                    echo,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let tmp = TempDir::new("roundtrip");
        let store = FileRunStore::new(&tmp.0);
        let original = record("test-1000", 1_000);

        store.save(&original).await.unwrap();
        assert!(tmp.0.join("test-1000.json").exists());

        let loaded = store.load("test-1000").await.unwrap();
        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.summary, original.summary);
        assert_eq!(loaded.results, original.results);
        assert_eq!(loaded.timestamp, original.timestamp);
    }

    #[tokio::test]
    async fn test_file_uses_stable_field_names() {
        let tmp = TempDir::new("fields");
        let store = FileRunStore::new(&tmp.0);
        store.save(&record("test-2000", 2_000)).await.unwrap();

        let text = std::fs::read_to_string(tmp.0.join("test-2000.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        for key in ["id", "timestamp", "parameters", "summary", "results"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["summary"]["successfulCount"], 1);
        assert_eq!(value["results"][0]["requestNumber"], 2);
    }

    #[tokio::test]
    async fn test_load_missing_and_invalid() {
        let tmp = TempDir::new("missing");
        let store = FileRunStore::new(&tmp.0);

        assert!(matches!(
            store.load("test-404").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.load("../secrets").await,
            Err(StoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_load_rejects_mismatched_id() {
        let tmp = TempDir::new("mismatch");
        std::fs::create_dir_all(&tmp.0).unwrap();
        let body = serde_json::to_string(&record("test-1", 1)).unwrap();
        std::fs::write(tmp.0.join("test-2.json"), body).unwrap();

        let store = FileRunStore::new(&tmp.0);
        assert!(matches!(
            store.load("test-2").await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sorts_and_skips_invalid_files() {
        let tmp = TempDir::new("list");
        let store = FileRunStore::new(&tmp.0);

        store.save(&record("test-1000", 1_000)).await.unwrap();
        store.save(&record("test-3000", 3_000)).await.unwrap();
        store.save(&record("test-2000", 2_000)).await.unwrap();
        std::fs::write(tmp.0.join("test-broken.json"), "{not json").unwrap();
        std::fs::write(tmp.0.join("notes.txt"), "ignored").unwrap();

        let overviews = store.list().await.unwrap();
        let ids: Vec<&str> = overviews.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["test-3000", "test-2000", "test-1000"]);
    }

    #[tokio::test]
    async fn test_list_creates_missing_directory() {
        let tmp = TempDir::new("create");
        let store = FileRunStore::new(tmp.0.join("nested"));

        let overviews = store.list().await.unwrap();
        assert!(overviews.is_empty());
        assert!(store.dir().is_dir());
    }
}
