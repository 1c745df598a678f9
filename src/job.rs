//! Job descriptors, validated jobs, and the result handed back to the queue.
//!
//! A [`JobDescriptor`] is exactly what arrives from the queue: every field
//! optional, field names as the producer spelled them. [`JobDescriptor::validate`]
//! turns it into an immutable [`Job`] or an `InvalidJobInput` error naming
//! every missing field, before any storage or model call is made.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Suffix appended to the source key to form the published key.
pub const OUTPUT_SUFFIX: &str = ".md";

/// A job descriptor as delivered by the message queue.
///
/// Accepts both `sourceBucket`/`sourceKey` and the legacy
/// `s3Bucket`/`s3Key` spellings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    /// Queue-assigned identifier; defaults to one derived from the source
    /// and destination.
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    #[serde(default, alias = "s3Bucket")]
    pub source_bucket: Option<String>,

    #[serde(default, alias = "s3Key")]
    pub source_key: Option<String>,

    #[serde(default)]
    pub output_bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_prefix: Option<String>,
}

impl JobDescriptor {
    /// Validate required fields and produce an immutable [`Job`].
    ///
    /// Empty strings count as missing.
    pub fn validate(&self) -> Result<Job, JobError> {
        let present = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).map(str::to_string);

        let source_bucket = present(&self.source_bucket);
        let source_key = present(&self.source_key);
        let output_bucket = present(&self.output_bucket);

        let (Some(source_bucket), Some(source_key), Some(output_bucket)) =
            (source_bucket.clone(), source_key.clone(), output_bucket.clone())
        else {
            let mut missing = Vec::new();
            if source_bucket.is_none() {
                missing.push("sourceBucket");
            }
            if source_key.is_none() {
                missing.push("sourceKey");
            }
            if output_bucket.is_none() {
                missing.push("outputBucket");
            }
            return Err(JobError::InvalidJobInput { missing });
        };

        let source = ObjectLocation {
            bucket: source_bucket,
            key: source_key,
        };
        let destination = Destination {
            bucket: output_bucket,
            prefix: normalise_prefix(self.output_prefix.as_deref().unwrap_or("")),
        };
        let id = match present(&self.job_id) {
            Some(explicit) => sanitize_job_id(&explicit),
            None => derived_job_id(&source, &destination),
        };

        Ok(Job {
            id,
            source,
            destination,
        })
    }
}

/// A bucket + key pair in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

/// Where a job publishes its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub bucket: String,
    /// Empty, or ends with `/`.
    pub prefix: String,
}

/// One validated document-conversion request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Filesystem-safe identifier; names the workspace directory.
    pub id: String,
    pub source: ObjectLocation,
    pub destination: Destination,
}

impl Job {
    /// File name of the downloaded source inside the workspace.
    pub fn input_file_name(&self) -> String {
        Path::new(&self.source.key)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "input.pdf".to_string())
    }

    /// Key the assembled document is published under.
    pub fn output_key(&self) -> String {
        format!("{}{}{}", self.destination.prefix, self.source.key, OUTPUT_SUFFIX)
    }
}

/// What a successful job reports back to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub source: ObjectLocation,
    pub destination: ObjectLocation,
    /// Every key written, final document first.
    pub uploaded_keys: Vec<String>,
}

/// Make a job identifier safe to use as one directory name.
///
/// Percent-escapes path separators, `%`, `+` and characters some
/// filesystems reject, so distinct ids stay distinct. `.` and `..` are
/// escaped whole and the empty string becomes `%`. The result never
/// contains a raw `+`, which keeps it apart from derived ids.
pub fn sanitize_job_id(id: &str) -> String {
    match id {
        "" => "%".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => escape_component(id),
    }
}

/// `{sourceBucket}+{sourceKey}+{outputBucket}[+{outputPrefix}]`, each part
/// escaped. Two jobs share a workspace only if they read the same object
/// and publish to the same place.
fn derived_job_id(source: &ObjectLocation, destination: &Destination) -> String {
    let mut parts = vec![
        escape_component(&source.bucket),
        escape_component(&source.key),
        escape_component(&destination.bucket),
    ];
    if !destination.prefix.is_empty() {
        parts.push(escape_component(&destination.prefix));
    }
    parts.join("+")
}

fn escape_component(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if matches!(c, '%' | '+' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn normalise_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(json: &str) -> JobDescriptor {
        serde_json::from_str(json).expect("valid json")
    }

    #[test]
    fn validates_complete_descriptor() {
        let job = descriptor(
            r#"{"sourceBucket":"in","sourceKey":"docs/report.pdf","outputBucket":"out"}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(job.id, "in+docs%2Freport.pdf+out");
        assert_eq!(job.input_file_name(), "report.pdf");
        assert_eq!(job.output_key(), "docs/report.pdf.md");
        assert_eq!(job.destination.prefix, "");
    }

    #[test]
    fn accepts_legacy_field_names_and_prefix() {
        let job = descriptor(
            r#"{"s3Bucket":"in","s3Key":"a.pdf","outputBucket":"out","outputPrefix":"results"}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(job.source.bucket, "in");
        assert_eq!(job.output_key(), "results/a.pdf.md");
    }

    #[test]
    fn missing_output_bucket_is_invalid() {
        let err = descriptor(r#"{"sourceBucket":"in","sourceKey":"a.pdf"}"#)
            .validate()
            .unwrap_err();
        match err {
            JobError::InvalidJobInput { missing } => assert_eq!(missing, vec!["outputBucket"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let err = descriptor(r#"{"sourceBucket":"","sourceKey":" ","outputBucket":"out"}"#)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("sourceBucket, sourceKey"));
    }

    #[test]
    fn explicit_job_id_is_sanitized() {
        let job = descriptor(
            r#"{"jobId":"queue/42","sourceBucket":"in","sourceKey":"a.pdf","outputBucket":"out"}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(job.id, "queue%2F42");
    }

    #[test]
    fn sanitize_rejects_traversal_names() {
        assert_eq!(sanitize_job_id(".."), "%2E%2E");
        assert_eq!(sanitize_job_id("."), "%2E");
        assert_eq!(sanitize_job_id(""), "%");
        assert_eq!(sanitize_job_id("a\\b/c"), "a%5Cb%2Fc");
        assert_eq!(sanitize_job_id("../etc"), "..%2Fetc");
    }

    #[test]
    fn ids_that_used_to_collide_stay_distinct() {
        assert_ne!(sanitize_job_id("a/b_c"), sanitize_job_id("a_b/c"));
        assert_ne!(sanitize_job_id("a%2Fb"), sanitize_job_id("a/b"));
        assert_ne!(sanitize_job_id("a+b"), sanitize_job_id("a%2Bb"));
    }

    #[test]
    fn derived_id_covers_the_destination() {
        let to = |bucket: &str, prefix: &str| {
            descriptor(&format!(
                r#"{{"sourceBucket":"in","sourceKey":"a.pdf","outputBucket":"{bucket}","outputPrefix":"{prefix}"}}"#
            ))
            .validate()
            .unwrap()
            .id
        };
        assert_eq!(to("out", ""), "in+a.pdf+out");
        assert_eq!(to("out", "run"), "in+a.pdf+out+run%2F");
        assert_ne!(to("out", ""), to("other", ""));
        assert_ne!(to("out", "x"), to("out", "y"));
    }

    #[test]
    fn explicit_and_derived_ids_never_meet() {
        let derived = descriptor(r#"{"sourceBucket":"in","sourceKey":"a.pdf","outputBucket":"out"}"#)
            .validate()
            .unwrap()
            .id;
        let explicit = descriptor(
            r#"{"jobId":"in+a.pdf+out","sourceBucket":"in","sourceKey":"a.pdf","outputBucket":"out"}"#,
        )
        .validate()
        .unwrap()
        .id;
        assert_eq!(explicit, "in%2Ba.pdf%2Bout");
        assert_ne!(derived, explicit);
    }
}
