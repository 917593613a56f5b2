//! In-process job queue for triage runs
//!
//! A fixed pool of worker tasks pulls complaint ids from a bounded channel
//! and runs the orchestrator for each:
//! - At most one queued or running job per complaint (in-flight set)
//! - Backpressure when the channel is full
//! - A dispatcher that picks up complaints left in `processing` by another
//!   process or by a crash
//!
//! Jobs for different complaints run in no particular order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::complaints;
use crate::error::{Result, TriageError};
use crate::models::AnalysisStatus;
use crate::orchestrator::{TriageOrchestrator, TriageOutcome};

/// A unit of work for the pool
struct TriageJob {
    complaint_id: i64,
    /// Set when the caller waits for the outcome
    respond_to: Option<oneshot::Sender<Result<TriageOutcome>>>,
}

/// Configuration for the job queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker tasks
    pub worker_count: usize,
    /// Maximum queued jobs before `enqueue` waits
    pub max_queue_size: usize,
    /// How often the dispatcher scans for `processing` complaints
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue_size: 1000,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct Counters {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// Worker pool running one orchestration job per complaint
pub struct TriageQueue {
    job_tx: mpsc::Sender<TriageJob>,
    in_flight: Arc<DashSet<i64>>,
    counters: Arc<Counters>,
    orchestrator: Arc<TriageOrchestrator>,
    config: QueueConfig,
}

impl TriageQueue {
    /// Create the queue and spawn its workers
    pub fn start(orchestrator: Arc<TriageOrchestrator>, config: QueueConfig) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<TriageJob>(config.max_queue_size.max(1));
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let in_flight = Arc::new(DashSet::new());
        let counters = Arc::new(Counters::default());

        let worker_count = config.worker_count.max(1);
        info!("Starting triage queue with {} workers", worker_count);

        for i in 0..worker_count {
            let job_rx = Arc::clone(&job_rx);
            let orchestrator = Arc::clone(&orchestrator);
            let in_flight = Arc::clone(&in_flight);
            let counters = Arc::clone(&counters);

            tokio::spawn(async move {
                worker_task(i, job_rx, orchestrator, in_flight, counters).await;
            });
        }

        Self {
            job_tx,
            in_flight,
            counters,
            orchestrator,
            config,
        }
    }

    /// Queue a job unless one is already queued or running. Returns whether it was queued.
    pub async fn enqueue(&self, complaint_id: i64) -> Result<bool> {
        if !self.in_flight.insert(complaint_id) {
            debug!(complaint_id, "Job already in flight");
            return Ok(false);
        }
        self.send(TriageJob {
            complaint_id,
            respond_to: None,
        })
        .await?;
        debug!(complaint_id, "Job queued");
        Ok(true)
    }

    /// Queue a job and wait for its outcome.
    pub async fn run_and_wait(&self, complaint_id: i64) -> Result<TriageOutcome> {
        if !self.in_flight.insert(complaint_id) {
            return Err(TriageError::Queue(format!("complaint {} is already queued", complaint_id)));
        }
        let (response_tx, response_rx) = oneshot::channel();
        self.send(TriageJob {
            complaint_id,
            respond_to: Some(response_tx),
        })
        .await?;

        response_rx
            .await
            .map_err(|_| TriageError::Queue("Response channel closed".into()))?
    }

    async fn send(&self, job: TriageJob) -> Result<()> {
        let complaint_id = job.complaint_id;
        self.job_tx.send(job).await.map_err(|_| {
            self.in_flight.remove(&complaint_id);
            TriageError::Queue("Triage queue closed".into())
        })
    }

    pub fn is_in_flight(&self, complaint_id: i64) -> bool {
        self.in_flight.contains(&complaint_id)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            in_flight: self.in_flight.len(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Enqueue every `processing` complaint not already in flight. Returns how many were queued.
    pub async fn dispatch_pending(&self) -> Result<usize> {
        let ids = self
            .orchestrator
            .db()
            .with_conn(|conn| complaints::list_ids_by_analysis_status(conn, AnalysisStatus::Processing))?;

        let mut queued = 0;
        for id in ids {
            if self.enqueue(id).await? {
                queued += 1;
            }
        }
        if queued > 0 {
            info!(queued, "Dispatcher queued processing complaints");
        }
        Ok(queued)
    }

    /// Poll for `processing` complaints until `shutdown` flips to true.
    pub fn spawn_dispatcher(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let poll_interval = self.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = queue.dispatch_pending().await {
                            error!(error = %e, "Dispatcher scan failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Dispatcher stopping");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Wait until no job is queued or running.
    pub async fn drain(&self) {
        while !self.in_flight.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Worker task that runs jobs from the queue
async fn worker_task(
    worker_id: usize,
    job_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TriageJob>>>,
    orchestrator: Arc<TriageOrchestrator>,
    in_flight: Arc<DashSet<i64>>,
    counters: Arc<Counters>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => {
                    info!("Worker {} shutting down (channel closed)", worker_id);
                    return;
                }
            }
        };

        let complaint_id = job.complaint_id;
        debug!("Worker {} running complaint {}", worker_id, complaint_id);

        let result = orchestrator.run(complaint_id).await;
        match &result {
            Ok(_) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(TriageError::NotFound(_)) | Err(TriageError::NotProcessing { .. }) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Worker {} job for complaint {} failed: {}", worker_id, complaint_id, e);
            }
        }

        in_flight.remove(&complaint_id);
        if let Some(respond_to) = job.respond_to {
            let _ = respond_to.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }
}
