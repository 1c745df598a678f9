//! Per-page stage caches.
//!
//! A cache entry is a single value stored under a deterministic key; its
//! *presence* means the stage already completed for that page and its
//! *content* is the stage result. There is no metadata and no invalidation.
//!
//! The pipeline talks to a [`CacheStore`], so the filesystem backend used in
//! production ([`FsCacheStore`]) and the in-memory one used in tests
//! ([`MemoryCacheStore`]) are interchangeable.
//!
//! Keys are built from the input file *stem* (`report` for `report.pdf`),
//! matching the page image names under `output/images/`. A workspace holds
//! exactly one input file, so the stem is as unique as the full name.

use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Cache key of a page's vision transcription:
/// `{input_stem}_page_{N}.transcription.txt`.
pub fn transcription_key(input_stem: &str, page: usize) -> String {
    format!("{input_stem}_page_{page}.transcription.txt")
}

/// Cache key of a page's final Markdown: `{input_stem}_page_{N}.md`.
pub fn markdown_key(input_stem: &str, page: usize) -> String {
    format!("{input_stem}_page_{page}.md")
}

/// Key-value store whose entries mark completed per-page stages.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn read(&self, key: &str) -> Result<String, CacheError>;

    async fn write(&self, key: &str, value: &str) -> Result<(), CacheError>;
}

/// Cache entries as files in one directory (the workspace `output/text/`).
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// On-disk location of `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn io_error(key: &str) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .map_err(io_error(key))
    }

    async fn read(&self, key: &str) -> Result<String, CacheError> {
        tokio::fs::read_to_string(self.path_for(key))
            .await
            .map_err(io_error(key))
    }

    /// Uniquely named temp file in the same directory, then rename. A
    /// truncated entry must never exist under the real key, and concurrent
    /// writers of one key must not share a temp file.
    async fn write(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(value.as_bytes())?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|join| std::io::Error::other(format!("cache write task failed: {join}")))
        .and_then(|written| written)
        .map_err(io_error(key))
    }
}

/// In-memory cache, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

fn poisoned(key: &str) -> CacheError {
    CacheError::Io {
        key: key.to_string(),
        source: std::io::Error::other("cache lock poisoned"),
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let entries = self.entries.lock().map_err(|_| poisoned(key))?;
        Ok(entries.contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<String, CacheError> {
        let entries = self.entries.lock().map_err(|_| poisoned(key))?;
        entries.get(key).cloned().ok_or_else(|| CacheError::Io {
            key: key.to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned(key))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_naming() {
        assert_eq!(transcription_key("report", 3), "report_page_3.transcription.txt");
        assert_eq!(markdown_key("report", 12), "report_page_12.md");
    }

    #[tokio::test]
    async fn fs_store_round_trip_and_presence() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(tmp.path());

        assert!(!store.exists("a_page_1.md").await.unwrap());
        store.write("a_page_1.md", "# Hi (Page 1)").await.unwrap();
        assert!(store.exists("a_page_1.md").await.unwrap());
        assert_eq!(store.read("a_page_1.md").await.unwrap(), "# Hi (Page 1)");
        let names: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(names.len(), 1, "temp files left behind");
    }

    #[tokio::test]
    async fn concurrent_writers_of_one_key_leave_a_whole_value() {
        let tmp = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FsCacheStore::new(tmp.path()));
        let values: Vec<String> = (0..8).map(|n| n.to_string().repeat(4096)).collect();

        let mut writers = tokio::task::JoinSet::new();
        for value in values.clone() {
            let store = std::sync::Arc::clone(&store);
            writers.spawn(async move { store.write("r_page_1.md", &value).await });
        }
        while let Some(done) = writers.join_next().await {
            done.unwrap().unwrap();
        }

        let stored = store.read("r_page_1.md").await.unwrap();
        assert!(values.contains(&stored));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn fs_store_empty_value_still_counts_as_present() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(tmp.path());
        store.write("k", "").await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.read("k").await.unwrap(), "");
    }

    #[test]
    fn memory_store_behaves_like_fs_store() {
        let store = MemoryCacheStore::new();
        tokio_test::block_on(async {
            assert!(!store.exists("k").await.unwrap());
            assert!(store.read("k").await.is_err());
            store.write("k", "v").await.unwrap();
            assert_eq!(store.read("k").await.unwrap(), "v");
        });
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }
}
