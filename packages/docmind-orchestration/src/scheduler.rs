//! Job scheduler: admission control, worker launch, lifecycle events.
//!
//! Admission combines a global concurrency ceiling with per-resource
//! exclusivity, both checked atomically under the registry lock. Rejection is
//! expected backpressure, reported as `None` rather than an error. All
//! lifecycle operations are non-blocking from the caller's perspective: they
//! mutate shared state under a short-held lock and emit events; no I/O
//! happens inside the scheduler itself.

use crate::events::{event_channel, EventReceiver, EventSender, JobEvent};
use crate::interfaces::{DocumentProcessor, IndexManager};
use crate::job::{Job, JobId, JobState, JobStatistics};
use crate::registry::{JobRegistry, RejectionReason};
use crate::timeout::TimeoutSupervisor;
use crate::worker::IndexingWorker;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrently running jobs.
    pub max_concurrent_jobs: usize,
    /// Watchdog deadline per job. Scheduler-wide; there is no per-job
    /// override.
    pub job_timeout_minutes: u64,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout_minutes: 30,
            event_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_minutes * 60)
    }
}

/// Per-state job counts plus capacity, for diagnostics and status displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub max_concurrent: usize,
    pub can_start_new: bool,
    pub state_counts: HashMap<String, usize>,
}

pub struct JobScheduler {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    supervisor: TimeoutSupervisor,
    events: EventSender,
    cancellations: DashMap<JobId, CancellationToken>,
    last_rejection: Mutex<Option<RejectionReason>>,
    processor: Arc<dyn DocumentProcessor>,
    index: Arc<dyn IndexManager>,
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        processor: Arc<dyn DocumentProcessor>,
        index: Arc<dyn IndexManager>,
    ) -> Arc<Self> {
        let (events, _) = event_channel(config.event_capacity);
        let supervisor = TimeoutSupervisor::new(events.clone());
        info!(
            max_concurrent = config.max_concurrent_jobs,
            timeout_minutes = config.job_timeout_minutes,
            "job scheduler initialized"
        );
        Arc::new(Self {
            config,
            registry: Arc::new(JobRegistry::new()),
            supervisor,
            events,
            cancellations: DashMap::new(),
            last_rejection: Mutex::new(None),
            processor,
            index,
        })
    }

    /// Subscribe to the lifecycle event stream. Any number of listeners may
    /// subscribe; each gets every event from the point of subscription.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> &TimeoutSupervisor {
        &self.supervisor
    }

    /// Start an indexing job for a resource key.
    ///
    /// Returns `None` when the concurrency ceiling is reached or a
    /// non-terminal job already holds the key; the distinction is available
    /// via [`last_rejection_reason`](Self::last_rejection_reason). On success
    /// the job is Running, its watchdog is armed, and the worker task owns a
    /// cancellation token checked between files.
    pub fn start(self: &Arc<Self>, resource_key: &str) -> Option<JobId> {
        let job = match self
            .registry
            .admit(resource_key, self.config.max_concurrent_jobs)
        {
            Ok(job) => job,
            Err(reason) => {
                warn!(
                    resource_key,
                    reason = ?reason,
                    active = self.registry.active_count(),
                    max = self.config.max_concurrent_jobs,
                    "indexing job rejected"
                );
                *self.last_rejection.lock().expect("rejection lock poisoned") = Some(reason);
                return None;
            }
        };
        *self.last_rejection.lock().expect("rejection lock poisoned") = None;

        let job_id = job.id;
        // Admission inserts a Pending record; the job is observable as
        // Running before the worker task gets a chance to run.
        if let Err(e) = self.registry.mark_running(job_id) {
            warn!(job_id = %job_id, error = %e, "failed to mark admitted job running");
            return None;
        }

        let token = CancellationToken::new();
        self.cancellations.insert(job_id, token.clone());
        self.supervisor
            .start_timeout(job_id, self.config.job_timeout());

        // Emit Started before the worker task exists so its progress events
        // can never precede it in the stream.
        info!(job_id = %job_id, resource_key, "indexing job started");
        let _ = self.events.send(JobEvent::Started {
            job_id,
            resource_key: resource_key.to_string(),
        });

        let worker = IndexingWorker::new(
            job_id,
            resource_key.to_string(),
            Arc::clone(&self.processor),
            Arc::clone(&self.index),
            token,
        );
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            worker.run(scheduler).await;
        });
        Some(job_id)
    }

    /// Request cooperative cancellation of a job.
    ///
    /// Returns once the cancellation signal is issued, not once the worker
    /// has exited: a worker that never reaches a checkpoint keeps running,
    /// but its resource key is released immediately and its watchdog is
    /// cancelled, so retrying other work is never blocked.
    pub fn stop(&self, job_id: JobId) -> bool {
        if let Some((_, token)) = self.cancellations.remove(&job_id) {
            token.cancel();
        }
        self.supervisor.cancel_timeout(job_id);

        match self.registry.cancel(job_id) {
            Ok(job) => {
                info!(job_id = %job_id, resource_key = %job.resource_key, "indexing job cancelled");
                let _ = self.events.send(JobEvent::Cancelled { job_id });
                true
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "stop requested for inactive job");
                false
            }
        }
    }

    /// Best-effort progress update, re-emitted to subscribers. Per-job
    /// emission order is preserved; there is no cross-job ordering.
    pub fn report_progress(&self, job_id: JobId, message: &str, current: u64, total: u64) {
        self.registry.record_progress(job_id, current, total);
        let _ = self.events.send(JobEvent::Progress {
            job_id,
            message: message.to_string(),
            current,
            total,
        });
    }

    pub fn report_completed(&self, job_id: JobId, statistics: JobStatistics) {
        self.supervisor.cancel_timeout(job_id);
        self.cancellations.remove(&job_id);

        match self.registry.complete(job_id, statistics.clone()) {
            Ok(job) => {
                info!(
                    job_id = %job_id,
                    resource_key = %job.resource_key,
                    files_processed = statistics.files_processed,
                    documents_added = statistics.documents_added,
                    "indexing job completed"
                );
                let _ = self.events.send(JobEvent::Completed { job_id, statistics });
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "completion for inactive job dropped");
            }
        }
    }

    /// Surface a worker failure as an event. The raw message is carried
    /// as-is; classifying it is the recovery coordinator's policy.
    pub fn report_error(&self, job_id: JobId, message: &str) {
        self.supervisor.cancel_timeout(job_id);
        self.cancellations.remove(&job_id);

        match self.registry.fail(job_id, message) {
            Ok(job) => {
                warn!(job_id = %job_id, resource_key = %job.resource_key, message, "indexing job failed");
                let _ = self.events.send(JobEvent::Failed {
                    job_id,
                    message: message.to_string(),
                });
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "error report for inactive job dropped");
            }
        }
    }

    /// Terminal transition after a timeout decision to stop the job. Cancels
    /// the worker's token; no extra event is emitted since the watchdog
    /// already published `TimeoutOccurred`.
    pub fn mark_timed_out(&self, job_id: JobId) -> bool {
        if let Some((_, token)) = self.cancellations.remove(&job_id) {
            token.cancel();
        }
        self.supervisor.cancel_timeout(job_id);

        match self.registry.time_out(job_id) {
            Ok(job) => {
                warn!(job_id = %job_id, resource_key = %job.resource_key, "indexing job timed out");
                true
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "timeout transition for inactive job dropped");
                false
            }
        }
    }

    /// Re-arm the watchdog with the configured deadline; used when the
    /// timeout decision is to let the job keep running.
    pub fn rearm_timeout(&self, job_id: JobId) {
        match self.registry.get(job_id) {
            Some(job) if job.is_active() => {
                self.supervisor
                    .start_timeout(job_id, self.config.job_timeout());
            }
            _ => {
                warn!(job_id = %job_id, "not re-arming timeout for inactive job");
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn job_info(&self, job_id: JobId) -> Option<Job> {
        self.registry.get(job_id)
    }

    /// Why the most recent `start` returned `None`, if it did.
    pub fn last_rejection_reason(&self) -> Option<RejectionReason> {
        *self.last_rejection.lock().expect("rejection lock poisoned")
    }

    pub fn status_summary(&self) -> SchedulerStatus {
        let active = self.registry.active_count();
        let mut state_counts = HashMap::new();
        let mut total = 0;
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Cancelled,
            JobState::TimedOut,
        ] {
            let count = self.registry.count_in_state(state);
            total += count;
            if count > 0 {
                state_counts.insert(state.as_str().to_string(), count);
            }
        }
        SchedulerStatus {
            total_jobs: total,
            active_jobs: active,
            max_concurrent: self.config.max_concurrent_jobs,
            can_start_new: active < self.config.max_concurrent_jobs,
            state_counts,
        }
    }

    /// Cancel every active job and watchdog; used at process exit.
    pub fn shutdown(&self) {
        for entry in self.cancellations.iter() {
            entry.value().cancel();
        }
        self.cancellations.clear();
        self.supervisor.cancel_all();

        let mut stopped = 0;
        for resource_key in self.registry.active_resource_keys() {
            if let Some(job_id) = self.registry.active_job_for(&resource_key) {
                if self.registry.cancel(job_id).is_ok() {
                    let _ = self.events.send(JobEvent::Cancelled { job_id });
                    stopped += 1;
                }
            }
        }
        info!(stopped, "job scheduler shut down");
    }
}
