//! Per-job timeout watchdog.
//!
//! One one-shot timer per job, firing independent of the worker's
//! responsiveness: a hung worker is still flagged at its deadline. The
//! supervisor never inspects or interrupts the worker itself; acting on a
//! fired timeout is the recovery coordinator's job.

use crate::events::{EventSender, JobEvent};
use crate::job::JobId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

struct SupervisorInner {
    timers: DashMap<JobId, TimerEntry>,
    events: EventSender,
    generation: AtomicU64,
}

/// Watchdog timer table. Cheap to clone; all clones share one table.
#[derive(Clone)]
pub struct TimeoutSupervisor {
    inner: Arc<SupervisorInner>,
}

impl TimeoutSupervisor {
    pub fn new(events: EventSender) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                timers: DashMap::new(),
                events,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Arm a one-shot deadline timer for a job. Restart semantics: an
    /// existing timer for the same job is cancelled first, synchronously, so
    /// the replaced timer can never fire after this call returns. On firing
    /// the supervisor emits [`JobEvent::TimeoutOccurred`] exactly once and
    /// forgets the entry; there is no automatic re-arm.
    pub fn start_timeout(&self, job_id: JobId, duration: Duration) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some((_, previous)) = self.inner.timers.remove(&job_id) {
            previous.handle.abort();
            info!(job_id = %job_id, "replacing existing timeout timer");
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // The generation check makes firing and replacement mutually
            // exclusive: a timer that was replaced or cancelled finds a
            // different (or no) generation here and stays silent.
            let fired = inner
                .timers
                .remove_if(&job_id, |_, entry| entry.generation == generation)
                .is_some();
            if fired {
                warn!(job_id = %job_id, "indexing job timed out");
                let _ = inner.events.send(JobEvent::TimeoutOccurred { job_id });
            }
        });

        self.inner
            .timers
            .insert(job_id, TimerEntry { generation, handle });

        info!(job_id = %job_id, timeout_secs = duration.as_secs(), "timeout watchdog armed");
    }

    /// Cancel the timer for a job. Not an error when no timer exists.
    pub fn cancel_timeout(&self, job_id: JobId) {
        match self.inner.timers.remove(&job_id) {
            Some((_, entry)) => {
                entry.handle.abort();
                info!(job_id = %job_id, "timeout watchdog cancelled");
            }
            None => {
                debug!(job_id = %job_id, "no timeout watchdog to cancel");
            }
        }
    }

    pub fn is_active(&self, job_id: JobId) -> bool {
        self.inner.timers.contains_key(&job_id)
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        self.inner.timers.iter().map(|entry| *entry.key()).collect()
    }

    /// Cancel every active timer; used on process shutdown.
    pub fn cancel_all(&self) {
        let job_ids: Vec<JobId> = self.active_jobs();
        for job_id in &job_ids {
            self.cancel_timeout(*job_id);
        }
        info!(count = job_ids.len(), "cancelled all timeout watchdogs");
    }
}
