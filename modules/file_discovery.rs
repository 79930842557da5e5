use std::sync::Arc;
use tracing::{error, info};

use super::cloud::{ObjectStore, ObjectSummary};
use super::error::StoreError;

/// Suffix of the per-input result files a batch job writes
pub const BATCH_OUTPUT_SUFFIX: &str = ".jsonl.out";

/// Suffix of raw patient input files
pub const PATIENT_FILE_SUFFIX: &str = ".json";

/// Handles discovery of input files and batch output artifacts
pub struct FileDiscovery {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl FileDiscovery {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Discover all patient files named by the input specification
    ///
    /// A path ending in `/` is a folder; anything else is a single key.
    pub async fn discover_inputs(&self, input_path: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        if input_path.ends_with('/') || input_path.is_empty() {
            self.process_folder(input_path).await
        } else {
            self.process_single_file(input_path).await
        }
    }

    async fn process_single_file(&self, key: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        match self.store.head(&self.bucket, key).await? {
            Some(summary) => Ok(vec![summary]),
            None => Err(StoreError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            }),
        }
    }

    async fn process_folder(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        info!("Discovering files in folder: s3://{}/{}", self.bucket, prefix);

        let mut files: Vec<ObjectSummary> = self
            .store
            .list(&self.bucket, prefix)
            .await?
            .into_iter()
            .filter(|object| {
                let keep = object.key.ends_with(PATIENT_FILE_SUFFIX) && object.size_bytes > 0;
                if !keep {
                    info!("Skipping non-input file: {}", object.key);
                }
                keep
            })
            .collect();
        files.sort_by(|a, b| a.key.cmp(&b.key));

        info!("Discovered {} input files in folder", files.len());
        Ok(files)
    }

    /// Most recently modified batch output under `prefix`
    ///
    /// Returns `Ok(None)` when no output exists yet. Equal timestamps resolve to
    /// the lexicographically largest key.
    pub async fn locate_latest_output(&self, prefix: &str) -> Result<Option<String>, StoreError> {
        info!("Looking for batch results in s3://{}/{}", self.bucket, prefix);
        let objects = self.store.list(&self.bucket, prefix).await?;

        let latest = latest_output(&objects).map(|object| object.key.clone());
        match &latest {
            Some(key) => info!("Found output file: {}", key),
            None => error!(
                "No {} file found in bucket {} with prefix {}",
                BATCH_OUTPUT_SUFFIX, self.bucket, prefix
            ),
        }
        Ok(latest)
    }
}

/// Picks the newest `.jsonl.out` entry, breaking timestamp ties by key
pub fn latest_output(objects: &[ObjectSummary]) -> Option<&ObjectSummary> {
    objects
        .iter()
        .filter(|object| object.key.ends_with(BATCH_OUTPUT_SUFFIX))
        .max_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cloud::fakes::MemoryObjectStore;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_latest_output_by_modification_time() {
        let store = Arc::new(MemoryObjectStore::with_bucket("b"));
        store.insert_at("b", "output/job1/a.jsonl.out", "old", at(100));
        store.insert_at("b", "output/job1/b.jsonl.out", "new", at(200));
        store.insert_at("b", "output/job1/manifest.json.out", "m", at(300));
        store.insert_at("b", "other/c.jsonl.out", "x", at(400));

        let discovery = FileDiscovery::new(store, "b");
        let latest = discovery.locate_latest_output("output/").await.unwrap();
        assert_eq!(latest.as_deref(), Some("output/job1/b.jsonl.out"));
    }

    #[tokio::test]
    async fn test_no_output_is_none_not_error() {
        let store = Arc::new(MemoryObjectStore::with_bucket("b"));
        store.insert("b", "output/job1/manifest.json.out", "m");
        let discovery = FileDiscovery::new(store, "b");
        assert_eq!(discovery.locate_latest_output("output/").await.unwrap(), None);
    }

    #[test]
    fn test_timestamp_tie_picks_largest_key() {
        let objects = vec![
            ObjectSummary {
                key: "out/b.jsonl.out".to_string(),
                size_bytes: 1,
                last_modified: Some(at(50)),
            },
            ObjectSummary {
                key: "out/a.jsonl.out".to_string(),
                size_bytes: 1,
                last_modified: Some(at(50)),
            },
        ];
        assert_eq!(latest_output(&objects).unwrap().key, "out/b.jsonl.out");
    }

    #[tokio::test]
    async fn test_discover_inputs_folder_and_single() {
        let store = Arc::new(MemoryObjectStore::with_bucket("b"));
        store.insert("b", "raw/z.json", "[]");
        store.insert("b", "raw/a.json", "[]");
        store.insert("b", "raw/notes.txt", "hello");
        store.insert("b", "raw/empty.json", "");

        let discovery = FileDiscovery::new(store, "b");
        let keys: Vec<_> = discovery
            .discover_inputs("raw/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["raw/a.json", "raw/z.json"]);

        let single = discovery.discover_inputs("raw/z.json").await.unwrap();
        assert_eq!(single.len(), 1);
        assert!(matches!(
            discovery.discover_inputs("raw/missing.json").await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
