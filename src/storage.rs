//! Object-storage collaborator: fetch the source document, publish results.
//!
//! The pipeline only needs two operations, so it depends on the small
//! [`ObjectStorage`] trait rather than on an S3 client directly. Three
//! backends ship with the crate:
//!
//! * [`S3Storage`]: any S3-compatible service, via `object_store`
//! * [`LocalStorage`]: buckets are sub-directories of a local root
//! * [`MemoryStorage`]: a map in memory, for tests

use crate::config::StorageConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The two storage operations the pipeline performs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetch a whole object.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Store a whole object with the given content type.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;
}

/// Build the backend selected by `config`.
pub fn from_config(config: &StorageConfig) -> Arc<dyn ObjectStorage> {
    match &config.local_root {
        Some(root) => Arc::new(LocalStorage::new(root)),
        None => Arc::new(S3Storage::new(config.clone())),
    }
}

/// Content type for a file name, from its extension.
///
/// Unknown extensions fall back to `application/octet-stream`.
pub fn content_type_for(path: impl AsRef<Path>) -> &'static str {
    let ext = path
        .as_ref()
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "md" => "text/markdown",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

// ── S3 ───────────────────────────────────────────────────────────────────

/// S3-compatible storage. One client per bucket, created on first use.
pub struct S3Storage {
    config: StorageConfig,
    clients: Mutex<HashMap<String, Arc<AmazonS3>>>,
}

impl S3Storage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, bucket: &str) -> Result<Arc<AmazonS3>, StorageError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| StorageError::Config("client cache lock poisoned".into()))?;
        if let Some(client) = clients.get(bucket) {
            return Ok(Arc::clone(client));
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.config.region)
            .with_allow_http(self.config.allow_http);
        if let Some(ref endpoint) = self.config.endpoint {
            // Custom endpoints (MinIO, Ceph, ...) need path-style addressing.
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }
        if let Some(ref id) = self.config.access_key_id {
            builder = builder.with_access_key_id(id);
        }
        if let Some(ref secret) = self.config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        let client = Arc::new(builder.build()?);
        clients.insert(bucket.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let client = self.client(bucket)?;
        let result = client.get(&ObjectPath::from(key)).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::ObjectStore(other),
        })?;
        let bytes = result.bytes().await?;
        debug!("Fetched s3://{}/{} ({} bytes)", bucket, key, bytes.len());
        Ok(bytes)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let client = self.client(bucket)?;
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        let len = body.len();
        client
            .put_opts(&ObjectPath::from(key), PutPayload::from(body), options)
            .await?;
        debug!("Uploaded s3://{}/{} ({} bytes, {})", bucket, key, len, content_type);
        Ok(())
    }
}

// ── Local directory ──────────────────────────────────────────────────────

/// Buckets as sub-directories of `root`; keys as relative paths.
///
/// Content types are not persisted.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for part in key.split('/').filter(|p| !p.is_empty() && *p != "." && *p != "..") {
            path.push(part);
        }
        path
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(bucket, key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, &body)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }
}

// ── In memory ────────────────────────────────────────────────────────────

/// A stored object in [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

/// Objects in a map keyed by (bucket, key).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, as if a producer had uploaded it.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>, content_type: &str) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    body: body.into(),
                    content_type: content_type.to_string(),
                },
            );
        }
    }

    /// Look up a stored object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .ok()?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// All keys in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|o| {
                o.keys()
                    .filter(|(b, _)| b == bucket)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.object(bucket, key)
            .map(|o| o.body)
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.insert(bucket, key, body, content_type);
        Ok(())
    }
}
