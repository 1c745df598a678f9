//! Queue adapter: newline-delimited JSON in, typed jobs and reports out.
//!
//! Each input line is one job descriptor. Parseable lines become
//! [`QueuedJob`]s on the pool's job channel; unparseable lines never run and
//! go straight to the report channel as `InvalidJobInput`.

use crate::coordinator::JobStage;
use crate::error::JobError;
use crate::job::{JobDescriptor, PipelineResult};
use serde::Serialize;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A descriptor waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    /// Position in the input, 1-based. Labels jobs that have no usable id.
    pub sequence: u64,
    pub descriptor: JobDescriptor,
}

impl QueuedJob {
    /// Identifier for reports: the job id when the descriptor yields one,
    /// otherwise `line-{sequence}`.
    pub fn report_id(&self) -> String {
        match self.descriptor.validate() {
            Ok(job) => job.id,
            Err(_) => self
                .descriptor
                .job_id
                .clone()
                .unwrap_or_else(|| format!("line-{}", self.sequence)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Why a job failed, in a form the producer can act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub kind: String,
    /// Absent when the job died without reaching a known stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<JobStage>,
    pub message: String,
    /// Whether redelivering the same descriptor may succeed.
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

/// One line of output per finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PipelineResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub duration_ms: u64,
}

impl JobReport {
    pub fn completed(job_id: impl Into<String>, result: PipelineResult, duration_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(job_id: impl Into<String>, error: &JobError, duration_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            result: None,
            error: Some(JobFailure {
                kind: error.kind().to_string(),
                stage: Some(error.stage()),
                message: error.to_string(),
                retryable: error.is_retryable(),
                page: error.page(),
            }),
            duration_ms,
        }
    }

    /// A line that is not a JSON job descriptor.
    pub fn malformed(sequence: u64, detail: &str) -> Self {
        Self {
            job_id: format!("line-{sequence}"),
            status: JobStatus::Failed,
            result: None,
            error: Some(JobFailure {
                kind: "InvalidJobInput".to_string(),
                stage: Some(JobStage::Validate),
                message: format!("Invalid job input: malformed descriptor: {detail}"),
                retryable: false,
                page: None,
            }),
            duration_ms: 0,
        }
    }

    /// The job's task panicked. Where it was is unknown, so no stage is
    /// claimed; the caches it left are intact, so a retry is worth it.
    pub fn panicked(job_id: impl Into<String>, detail: &str, duration_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            result: None,
            error: Some(JobFailure {
                kind: "Internal".to_string(),
                stage: None,
                message: format!("Internal error: job task panicked: {detail}"),
                retryable: true,
                page: None,
            }),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_job_line(sequence: u64, line: &str) -> Option<Result<QueuedJob, JobReport>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<JobDescriptor>(line)
            .map(|descriptor| QueuedJob {
                sequence,
                descriptor,
            })
            .map_err(|e| JobReport::malformed(sequence, &e.to_string())),
    )
}

/// Feed descriptors from `reader` into `jobs` until EOF, cancellation, or
/// the job channel closing. Returns how many jobs were queued.
pub async fn read_job_lines<R>(
    reader: R,
    jobs: mpsc::Sender<QueuedJob>,
    rejected: mpsc::Sender<JobReport>,
    cancel: CancellationToken,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = LinesStream::new(reader.lines());
    let mut sequence = 0u64;
    let mut queued = 0u64;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Input reader cancelled after {} lines", sequence);
                break;
            }
            next = lines.next() => match next {
                Some(line) => line?,
                None => break,
            },
        };
        sequence += 1;

        match parse_job_line(sequence, &line) {
            None => continue,
            Some(Ok(job)) => {
                if jobs.send(job).await.is_err() {
                    debug!("Job channel closed, stopping input reader");
                    break;
                }
                queued += 1;
            }
            Some(Err(report)) => {
                warn!(line = sequence, "Rejected malformed job descriptor");
                if rejected.send(report).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(queued)
}
