//! Batch scheduler: bounded worker pool over a shared job queue.
//!
//! Workers pull jobs until the queue is empty or cancellation is observed.
//! `stop_on_error` turns the first failure into a batch-wide cancel; the
//! per-batch deadline does the same on expiry. Worker drain after a cancel
//! is bounded; jobs that never produced a result are reported as canceled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;

use crate::cancel::{CancelSource, CancelToken};
use crate::error::RunnerError;
use crate::runner::{
    DeviceJob, DeviceResult, DeviceRunner, JobStatus, ProgressEvent, ProgressPhase,
};

/// Batch-level policy knobs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Worker pool size.
    pub workers: usize,

    /// Optional wall-clock budget for the whole batch.
    pub batch_deadline: Option<Duration>,

    /// Cancel everything on the first failed job.
    pub stop_on_error: bool,

    /// Bound on worker drain after a cancel.
    pub drain_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_deadline: None,
            stop_on_error: false,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Aggregate outcome of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
    pub canceled: usize,
    pub elapsed_ms: u64,
    pub results: Vec<DeviceResult>,
}

impl BatchResult {
    pub fn all_ok(&self) -> bool {
        self.failed == 0 && self.canceled == 0
    }
}

/// The seam between scheduling and device execution. Production uses
/// [`DeviceRunner`]; tests inject mocks.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        job: &DeviceJob,
        cancel: CancelToken,
        progress: &UnboundedSender<ProgressEvent>,
    ) -> DeviceResult;
}

#[async_trait]
impl JobExecutor for DeviceRunner {
    async fn execute(
        &self,
        job: &DeviceJob,
        cancel: CancelToken,
        progress: &UnboundedSender<ProgressEvent>,
    ) -> DeviceResult {
        self.run(job, cancel, progress).await
    }
}

/// Bounded worker pool dispatching device jobs.
pub struct Scheduler<E: JobExecutor> {
    executor: Arc<E>,
    config: BatchConfig,
}

impl<E: JobExecutor> Scheduler<E> {
    pub fn new(executor: Arc<E>, config: BatchConfig) -> Self {
        Self { executor, config }
    }

    /// Run a batch to completion, deadline, or cancellation.
    ///
    /// `external_cancel` is the process-level signal (SIGINT/SIGTERM); it is
    /// treated as a batch deadline of now.
    pub async fn run_batch(
        &self,
        jobs: Vec<DeviceJob>,
        mut external_cancel: CancelToken,
        progress: UnboundedSender<ProgressEvent>,
    ) -> BatchResult {
        let started = Instant::now();
        let total = jobs.len();
        let workers = self.config.workers.max(1).min(total.max(1));

        for job in &jobs {
            ProgressEvent::emit(&progress, &job.host, ProgressPhase::Scheduled, started);
        }

        let cancel = CancelSource::new();
        let queue: Arc<Mutex<VecDeque<(usize, DeviceJob)>>> =
            Arc::new(Mutex::new(jobs.iter().cloned().enumerate().collect()));
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<(usize, DeviceResult)>();

        info!("batch start: {} jobs, {} workers", total, workers);

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = queue.clone();
            let results_tx = results_tx.clone();
            let token = cancel.token();
            let executor = self.executor.clone();
            let progress = progress.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if token.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().await.pop_front();
                    let Some((index, job)) = next else { break };

                    // Backstop over the runner's own budget enforcement.
                    let backstop = job.per_device_timeout + Duration::from_secs(2);
                    let result = match tokio::time::timeout(
                        backstop,
                        executor.execute(&job, token.clone(), &progress),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            let err = RunnerError::DeviceTimeout {
                                host: job.host.clone(),
                                elapsed: backstop,
                            };
                            DeviceResult {
                                display_name: job.display_name.clone(),
                                host: job.host.clone(),
                                status: JobStatus::Failed,
                                elapsed_ms: backstop.as_millis() as u64,
                                bytes_written: 0,
                                error: Some(err.to_string()),
                                fingerprint: None,
                            }
                        }
                    };
                    if results_tx.send((index, result)).is_err() {
                        // Aggregator is gone: the drain deadline passed and
                        // the batch already reported. Stop quietly.
                        break;
                    }
                }
            }));
        }
        drop(results_tx);

        // Aggregate until done, deadline, or external cancel.
        let mut slots: Vec<Option<DeviceResult>> = (0..total).map(|_| None).collect();
        let mut received = 0usize;
        let deadline = self.config.batch_deadline.map(|d| started + d);
        let mut cancelled = false;

        while received < total {
            let next = if let Some(deadline) = deadline {
                tokio::select! {
                    r = results_rx.recv() => Some(r),
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => None,
                    _ = external_cancel.cancelled() => None,
                }
            } else {
                tokio::select! {
                    r = results_rx.recv() => Some(r),
                    _ = external_cancel.cancelled() => None,
                }
            };

            match next {
                Some(Some((index, result))) => {
                    let failed = result.status == JobStatus::Failed;
                    slots[index] = Some(result);
                    received += 1;
                    if failed && self.config.stop_on_error && !cancelled {
                        warn!("stop-on-error: cancelling remaining jobs");
                        queue.lock().await.clear();
                        cancel.cancel();
                        cancelled = true;
                    }
                }
                Some(None) => break,
                None => {
                    // Deadline or external signal: cancel and move to drain.
                    queue.lock().await.clear();
                    cancel.cancel();
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            // Bounded drain: give in-flight workers a chance to report.
            let drain_until = Instant::now() + self.config.drain_timeout;
            while received < total {
                let left = drain_until.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    warn!("drain deadline passed with workers outstanding");
                    break;
                }
                match tokio::time::timeout(left, results_rx.recv()).await {
                    Ok(Some((index, result))) => {
                        slots[index] = Some(result);
                        received += 1;
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        }
        // Close the results channel: abandoned workers may not mutate
        // shared state past this point.
        drop(results_rx);

        // Unstarted and unreported jobs are canceled entries.
        let mut results = Vec::with_capacity(total);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(result) => results.push(result),
                None => {
                    let job = &jobs[index];
                    ProgressEvent::emit(&progress, &job.host, ProgressPhase::Canceled, started);
                    results.push(DeviceResult {
                        display_name: job.display_name.clone(),
                        host: job.host.clone(),
                        status: JobStatus::Canceled,
                        elapsed_ms: 0,
                        bytes_written: 0,
                        error: None,
                        fingerprint: None,
                    });
                }
            }
        }

        for handle in handles {
            handle.abort();
        }

        let ok = results.iter().filter(|r| r.status == JobStatus::Ok).count();
        let failed = results.iter().filter(|r| r.status == JobStatus::Failed).count();
        let canceled = results.iter().filter(|r| r.status == JobStatus::Canceled).count();
        info!(
            "batch done in {}ms: {} ok, {} failed, {} canceled",
            started.elapsed().as_millis(),
            ok,
            failed,
            canceled
        );

        BatchResult {
            total,
            ok,
            failed,
            canceled,
            elapsed_ms: started.elapsed().as_millis() as u64,
            results,
        }
    }
}

/// Rebuild a job queue from the failed subset of a prior batch.
pub fn replay_jobs(previous: &BatchResult, jobs: &[DeviceJob]) -> Vec<DeviceJob> {
    let failed: Vec<&str> = previous
        .results
        .iter()
        .filter(|r| r.status == JobStatus::Failed)
        .map(|r| r.display_name.as_str())
        .collect();
    jobs.iter()
        .filter(|j| failed.contains(&j.display_name.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockExecutor {
        delay: Duration,
        fail_hosts: Vec<String>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl MockExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail_hosts: Vec::new(),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn failing(mut self, hosts: &[&str]) -> Self {
            self.fail_hosts = hosts.iter().map(|h| h.to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl JobExecutor for MockExecutor {
        async fn execute(
            &self,
            job: &DeviceJob,
            mut cancel: CancelToken,
            _progress: &UnboundedSender<ProgressEvent>,
        ) -> DeviceResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let cancelled = tokio::select! {
                _ = tokio::time::sleep(self.delay) => false,
                _ = cancel.cancelled() => true,
            };
            self.active.fetch_sub(1, Ordering::SeqCst);

            let status = if cancelled {
                JobStatus::Canceled
            } else if self.fail_hosts.contains(&job.host) {
                JobStatus::Failed
            } else {
                JobStatus::Ok
            };
            DeviceResult {
                display_name: job.display_name.clone(),
                host: job.host.clone(),
                status,
                elapsed_ms: 1,
                bytes_written: 0,
                error: (status == JobStatus::Failed).then(|| "mock failure".to_string()),
                fingerprint: None,
            }
        }
    }

    fn job(name: &str) -> DeviceJob {
        DeviceJob {
            display_name: name.to_string(),
            host: name.to_string(),
            port: 22,
            credential_id: "1".to_string(),
            vendor_hint: None,
            commands: vec!["show version".to_string()],
            capture_type: "version".to_string(),
            output_path: Some(PathBuf::from("/tmp/unused")),
            fingerprint_path: None,
            per_device_timeout: Duration::from_secs(60),
        }
    }

    fn jobs(n: usize) -> Vec<DeviceJob> {
        (0..n).map(|i| job(&format!("dev-{:02}", i))).collect()
    }

    #[tokio::test]
    async fn test_bounded_parallelism() {
        let executor = Arc::new(MockExecutor::new(Duration::from_millis(20)));
        let scheduler = Scheduler::new(
            executor.clone(),
            BatchConfig {
                workers: 4,
                ..Default::default()
            },
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = scheduler
            .run_batch(jobs(16), CancelToken::never(), tx)
            .await;

        assert_eq!(result.total, 16);
        assert_eq!(result.ok, 16);
        assert!(executor.max_active.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_stop_on_error_cancels_remaining() {
        let executor =
            Arc::new(MockExecutor::new(Duration::from_millis(10)).failing(&["dev-00"]));
        let scheduler = Scheduler::new(
            executor,
            BatchConfig {
                workers: 1,
                stop_on_error: true,
                ..Default::default()
            },
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = scheduler.run_batch(jobs(8), CancelToken::never(), tx).await;

        assert_eq!(result.failed, 1);
        assert!(result.canceled >= 1, "unstarted jobs must report canceled");
        assert_eq!(result.ok + result.failed + result.canceled, 8);
    }

    #[tokio::test]
    async fn test_external_cancel_returns_within_drain() {
        // Fifty slow devices, four workers, cancel shortly after start:
        // everything reports canceled and the batch returns promptly.
        let executor = Arc::new(MockExecutor::new(Duration::from_secs(30)));
        let scheduler = Scheduler::new(
            executor,
            BatchConfig {
                workers: 4,
                drain_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let source = CancelSource::new();
        let token = source.token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            source.cancel();
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        let result = scheduler.run_batch(jobs(50), token, tx).await;

        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(result.total, 50);
        assert_eq!(result.ok, 0);
        assert_eq!(result.canceled, 50);
    }

    #[tokio::test]
    async fn test_batch_deadline_expiry() {
        let executor = Arc::new(MockExecutor::new(Duration::from_secs(10)));
        let scheduler = Scheduler::new(
            executor,
            BatchConfig {
                workers: 2,
                batch_deadline: Some(Duration::from_millis(50)),
                drain_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = scheduler.run_batch(jobs(6), CancelToken::never(), tx).await;
        assert_eq!(result.canceled, 6);
    }

    #[tokio::test]
    async fn test_progress_scheduled_for_all() {
        let executor = Arc::new(MockExecutor::new(Duration::from_millis(1)));
        let scheduler = Scheduler::new(executor, BatchConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _ = scheduler.run_batch(jobs(3), CancelToken::never(), tx).await;

        let mut scheduled = 0;
        while let Ok(event) = rx.try_recv() {
            if event.phase == ProgressPhase::Scheduled {
                scheduled += 1;
            }
        }
        assert_eq!(scheduled, 3);
    }

    #[tokio::test]
    async fn test_replay_rebuilds_failed_subset() {
        let executor =
            Arc::new(MockExecutor::new(Duration::from_millis(1)).failing(&["dev-01", "dev-03"]));
        let scheduler = Scheduler::new(executor, BatchConfig::default());
        let all = jobs(5);
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = scheduler
            .run_batch(all.clone(), CancelToken::never(), tx)
            .await;

        let retry = replay_jobs(&result, &all);
        let mut names: Vec<_> = retry.iter().map(|j| j.display_name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["dev-01", "dev-03"]);
    }
}
