//! Publishing: upload results to the destination bucket.

use crate::coordinator::JobStage;
use crate::error::JobError;
use crate::job::Job;
use crate::storage::{content_type_for, ObjectStorage};
use crate::workspace::Workspace;
use bytes::Bytes;
use tracing::{debug, info};

/// Upload the assembled document under [`Job::output_key`]. Returns the key.
pub async fn publish_document(
    storage: &dyn ObjectStorage,
    job: &Job,
    document: &str,
) -> Result<String, JobError> {
    let key = job.output_key();
    put(storage, &job.destination.bucket, &key, Bytes::from(document.to_string()), content_type_for(&key)).await?;
    info!(bucket = %job.destination.bucket, key = %key, "Published document");
    Ok(key)
}

/// Upload every file under the workspace `output/` tree as
/// `{prefix}{relative path}`. Returns the keys in upload order.
pub async fn publish_artifacts(
    storage: &dyn ObjectStorage,
    job: &Job,
    workspace: &Workspace,
) -> Result<Vec<String>, JobError> {
    let mut keys = Vec::new();
    for (path, rel) in workspace.output_files().await? {
        let body = tokio::fs::read(&path)
            .await
            .map_err(|source| JobError::Workspace {
                stage: JobStage::Publish,
                path: path.clone(),
                source,
            })?;
        let key = format!("{}{}", job.destination.prefix, rel);
        put(storage, &job.destination.bucket, &key, Bytes::from(body), content_type_for(&path)).await?;
        debug!("Published artifact {}", key);
        keys.push(key);
    }
    info!(bucket = %job.destination.bucket, count = keys.len(), "Published artifacts");
    Ok(keys)
}

async fn put(
    storage: &dyn ObjectStorage,
    bucket: &str,
    key: &str,
    body: Bytes,
    content_type: &str,
) -> Result<(), JobError> {
    storage
        .put(bucket, key, body, content_type)
        .await
        .map_err(|source| JobError::PublishFailure {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        })
}
