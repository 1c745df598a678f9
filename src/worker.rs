//! Fixed-size worker pool.
//!
//! Jobs arrive on an `mpsc` channel and run on their own tasks, at most K at
//! a time (a semaphore permit per running job). Each finished job yields
//! exactly one [`JobReport`] on the report channel.
//!
//! Cancelling the token stops intake: no new job is started, jobs already
//! running finish and report, queued-but-unstarted jobs are dropped for the
//! queue to redeliver. The report channel closes once the pool has drained.

use crate::coordinator::Pipeline;
use crate::queue::{JobReport, QueuedJob};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handles to a running pool.
pub struct WorkerPool {
    /// Submit jobs here. Dropping every sender lets the pool finish.
    pub jobs: mpsc::Sender<QueuedJob>,
    /// Reports that did not come from running a job (e.g. malformed input).
    pub rejected: mpsc::Sender<JobReport>,
    /// One report per finished or rejected job.
    pub reports: mpsc::Receiver<JobReport>,
    /// Completes after the pool has drained.
    pub handle: JoinHandle<()>,
}

/// Start a pool running at most `concurrency` jobs at once.
pub fn spawn_worker_pool(
    pipeline: Arc<Pipeline>,
    concurrency: usize,
    cancel: CancellationToken,
) -> WorkerPool {
    let concurrency = concurrency.max(1);
    let (job_tx, job_rx) = mpsc::channel(concurrency * 2);
    let (report_tx, report_rx) = mpsc::channel(concurrency * 4);
    let handle = tokio::spawn(dispatch(pipeline, concurrency, job_rx, report_tx.clone(), cancel));

    WorkerPool {
        jobs: job_tx,
        rejected: report_tx,
        reports: report_rx,
        handle,
    }
}

async fn dispatch(
    pipeline: Arc<Pipeline>,
    concurrency: usize,
    mut jobs: mpsc::Receiver<QueuedJob>,
    reports: mpsc::Sender<JobReport>,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut running = JoinSet::new();
    info!("Worker pool started with {} slots", concurrency);

    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let pipeline = Arc::clone(&pipeline);
        let reports = reports.clone();
        running.spawn(async move {
            let report = run_job(pipeline, job).await;
            drop(permit);
            if reports.send(report).await.is_err() {
                debug!("Report receiver dropped");
            }
        });

        // Reap finished tasks so the set does not grow without bound.
        while let Some(Some(done)) = running.join_next().now_or_never() {
            log_join(done);
        }
    }

    jobs.close();
    let abandoned = std::iter::from_fn(|| jobs.try_recv().ok()).count();
    if abandoned > 0 {
        info!("Left {} queued jobs for redelivery", abandoned);
    }

    info!("Worker pool draining {} running jobs", running.len());
    while let Some(done) = running.join_next().await {
        log_join(done);
    }
    info!("Worker pool stopped");
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Worker task failed: {}", e);
    }
}

/// Run one job on its own task, so a panic becomes a failed report.
async fn run_job(pipeline: Arc<Pipeline>, job: QueuedJob) -> JobReport {
    let id = job.report_id();
    let start = Instant::now();
    let outcome = tokio::spawn(async move { pipeline.run(&job.descriptor).await }).await;
    let elapsed = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(result)) => JobReport::completed(id, result, elapsed),
        Ok(Err(e)) => JobReport::failed(id, &e, elapsed),
        Err(join) => {
            error!(job_id = %id, "Job task failed: {}", join);
            JobReport::panicked(id, &join.to_string(), elapsed)
        }
    }
}

/// Cancel `cancel` on Ctrl-C or, on Unix, SIGTERM.
///
/// The SIGTERM handler is installed before this returns, so a signal sent
/// right after is not missed. Must be called inside a Tokio runtime. The
/// listener exits quietly if `cancel` fires for another reason.
pub fn cancel_on_shutdown(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        #[cfg(unix)]
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            r = tokio::signal::ctrl_c() => r.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        };
        #[cfg(not(unix))]
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            r = tokio::signal::ctrl_c() => r.map(|()| "Ctrl-C"),
        };

        match received {
            Ok(signal) => {
                warn!(signal, "Shutdown requested; finishing running jobs");
                cancel.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    }))
}
