use anyhow::{Context, Result};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::dataset::{DatasetRow, Publish};
use crate::jobs::{JobSpec, JOBS};
use crate::record::UrlRecord;

pub struct RollupOptions {
    pub workers: Option<usize>,
    pub job_timeout: Duration,
}

impl Default for RollupOptions {
    fn default() -> Self {
        Self {
            workers: None,
            job_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
pub enum JobStatus {
    Published { rows: usize },
    Failed { reason: String },
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Published { rows } => write!(f, "published {rows} rows"),
            JobStatus::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

#[derive(Debug)]
pub struct JobOutcome {
    pub job: &'static str,
    pub dataset: &'static str,
    pub status: JobStatus,
}

#[derive(Debug)]
pub struct RollupReport {
    pub outcomes: Vec<JobOutcome>,
    pub duration: Duration,
    job_count: usize,
}

impl RollupReport {
    /// The run is complete once every job was attempted exactly once,
    /// regardless of individual outcomes.
    pub fn completed(&self) -> bool {
        self.outcomes.len() == self.job_count
    }

    pub fn failed_jobs(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, JobStatus::Failed { .. }))
            .count()
    }
}

/// One full rollup run: fan the independent jobs out across a worker
/// pool, then publish each result in declaration order. A single job's
/// failure (compute panic, budget overrun, publish error) is logged and
/// its prior dataset version left intact; the run continues.
pub fn run_rollup(
    records: Vec<UrlRecord>,
    publisher: &dyn Publish,
    opts: &RollupOptions,
) -> Result<RollupReport> {
    run_jobs(records, &JOBS, publisher, opts)
}

/// Runs an explicit job list. The job table must be static because
/// abandoned workers may still be reading it after the run returns.
fn run_jobs(
    records: Vec<UrlRecord>,
    jobs: &'static [JobSpec],
    publisher: &dyn Publish,
    opts: &RollupOptions,
) -> Result<RollupReport> {
    let start_time = Instant::now();

    let workers = opts
        .workers
        .unwrap_or_else(|| std::cmp::min(num_cpus::get(), 8));
    info!(
        action = "start",
        component = "orchestrator",
        record_count = records.len(),
        worker_count = workers,
        job_count = jobs.len(),
        "Starting rollup run"
    );

    let pool = Arc::new(
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("Failed to build worker pool")?,
    );

    let records = Arc::new(records);
    let (tx, rx) = mpsc::channel::<(usize, Vec<DatasetRow>)>();

    // One detached thread per job so an over-budget job can be abandoned
    // without blocking the run; the per-record work inside each job runs
    // on the shared bounded pool.
    for (index, job) in jobs.iter().enumerate() {
        let tx = tx.clone();
        let records = Arc::clone(&records);
        let pool = Arc::clone(&pool);
        std::thread::spawn(move || {
            let job_start = Instant::now();
            let rows = pool.install(|| (job.reduce)(&records));
            info!(
                action = "complete",
                component = "job",
                job = job.name,
                row_count = rows.len(),
                duration_ms = job_start.elapsed().as_millis() as u64,
                "Aggregation job finished"
            );
            let _ = tx.send((index, rows));
        });
    }
    drop(tx);

    // Fan-in with a shared deadline: a job that has not reported by the
    // budget is marked failed and its publish skipped.
    let deadline = Instant::now() + opts.job_timeout;
    let mut results: Vec<Option<Vec<DatasetRow>>> = (0..jobs.len()).map(|_| None).collect();
    let mut pending = jobs.len();
    while pending > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((index, rows)) => {
                results[index] = Some(rows);
                pending -= 1;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    action = "timeout",
                    component = "orchestrator",
                    pending_jobs = pending,
                    "Job budget exceeded, abandoning unfinished jobs"
                );
                break;
            }
            // A panicked job drops its sender without reporting.
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let mut outcomes = Vec::with_capacity(jobs.len());
    for (index, job) in jobs.iter().enumerate() {
        let status = match &results[index] {
            Some(rows) => match publisher.publish(job.dataset, rows) {
                Ok(()) => JobStatus::Published { rows: rows.len() },
                Err(e) => {
                    warn!(
                        action = "publish",
                        component = "orchestrator",
                        job = job.name,
                        dataset = job.dataset,
                        error = %e,
                        "Publish failed, previous dataset version retained"
                    );
                    JobStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            },
            None => {
                warn!(
                    action = "skip",
                    component = "orchestrator",
                    job = job.name,
                    dataset = job.dataset,
                    "Job did not finish within budget, previous dataset version retained"
                );
                JobStatus::Failed {
                    reason: "did not finish within the job budget".to_string(),
                }
            }
        };
        outcomes.push(JobOutcome {
            job: job.name,
            dataset: job.dataset,
            status,
        });
    }

    let report = RollupReport {
        outcomes,
        duration: start_time.elapsed(),
        job_count: jobs.len(),
    };
    info!(
        action = "complete",
        component = "orchestrator",
        failed_jobs = report.failed_jobs(),
        duration_ms = report.duration.as_millis() as u64,
        "Rollup run completed"
    );
    Ok(report)
}
