//! In-memory job registry.
//!
//! Owns every [`Job`] record plus a secondary index from resource key to the
//! one non-terminal job for that key. Both structures live behind a single
//! mutex so a logical operation (admission, transition) is atomic; the lock
//! is never held across an external call.

use crate::error::{OrchestrationError, Result};
use crate::job::{Job, JobId, JobState, JobStatistics};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Why an admission request was rejected. Both are expected backpressure
/// conditions, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The global concurrency ceiling is reached.
    ConcurrencyLimit,
    /// A non-terminal job already exists for the resource key.
    ResourceBusy,
}

#[derive(Default)]
struct RegistryInner {
    jobs: HashMap<JobId, Job>,
    /// Non-terminal jobs only; entries are removed on terminal transition.
    by_resource: HashMap<String, JobId>,
}

/// Thread-safe table of job metadata. Single writer set: the scheduler and
/// the recovery coordinator, each mutating under the registry lock.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic admission check: concurrency ceiling and per-resource
    /// exclusivity are verified under one lock, then the job record is
    /// inserted. There is no partial admission.
    pub fn admit(
        &self,
        resource_key: &str,
        max_active: usize,
    ) -> std::result::Result<Job, RejectionReason> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        if inner.by_resource.contains_key(resource_key) {
            return Err(RejectionReason::ResourceBusy);
        }
        let active = inner
            .jobs
            .values()
            .filter(|job| job.is_active())
            .count();
        if active >= max_active {
            return Err(RejectionReason::ConcurrencyLimit);
        }

        let job = Job::new(resource_key);
        inner.by_resource.insert(resource_key.to_string(), job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Exclusivity-only variant of [`admit`](Self::admit).
    pub fn create(&self, resource_key: &str) -> Result<Job> {
        self.admit(resource_key, usize::MAX)
            .map_err(|_| OrchestrationError::ResourceBusy(resource_key.to_string()))
    }

    pub fn get(&self, job_id: JobId) -> Option<Job> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.jobs.get(&job_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.by_resource.len()
    }

    pub fn active_resource_keys(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.by_resource.keys().cloned().collect()
    }

    /// The non-terminal job currently holding a resource key, if any.
    pub fn active_job_for(&self, resource_key: &str) -> Option<JobId> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.by_resource.get(resource_key).copied()
    }

    /// Jobs currently in the given state.
    pub fn count_in_state(&self, state: JobState) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.jobs.values().filter(|job| job.state == state).count()
    }

    pub fn mark_running(&self, job_id: JobId) -> Result<Job> {
        self.transition(job_id, JobState::Running, None, None)
    }

    pub fn complete(&self, job_id: JobId, statistics: JobStatistics) -> Result<Job> {
        self.transition(job_id, JobState::Completed, Some(statistics), None)
    }

    pub fn fail(&self, job_id: JobId, message: &str) -> Result<Job> {
        self.transition(job_id, JobState::Failed, None, Some(message.to_string()))
    }

    pub fn cancel(&self, job_id: JobId) -> Result<Job> {
        self.transition(job_id, JobState::Cancelled, None, None)
    }

    pub fn time_out(&self, job_id: JobId) -> Result<Job> {
        self.transition(job_id, JobState::TimedOut, None, None)
    }

    /// Best-effort statistics update from a progress event. Unknown or
    /// terminal jobs are ignored with a debug log; progress may race a
    /// terminal transition and that is not an error.
    pub fn record_progress(&self, job_id: JobId, current: u64, total: u64) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.is_active() => {
                if total > 0 {
                    job.statistics.files_found = total;
                }
                job.statistics.files_processed = current;
            }
            Some(job) => {
                debug!(job_id = %job_id, state = %job.state, "progress after terminal state ignored");
            }
            None => {
                debug!(job_id = %job_id, "progress for unknown job ignored");
            }
        }
    }

    /// Remove a terminal job record. Records are never removed silently;
    /// eviction is always an explicit call.
    pub fn evict(&self, job_id: JobId) -> Result<Job> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        match inner.jobs.get(&job_id) {
            Some(job) if job.state.is_terminal() => {
                Ok(inner.jobs.remove(&job_id).expect("checked above"))
            }
            Some(_) => Err(OrchestrationError::JobNotTerminal(job_id)),
            None => Err(OrchestrationError::JobNotFound(job_id)),
        }
    }

    /// Sweep all terminal job records out of the table, returning how many
    /// were removed.
    pub fn evict_finished(&self) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| job.is_active());
        before - inner.jobs.len()
    }

    fn transition(
        &self,
        job_id: JobId,
        next: JobState,
        statistics: Option<JobStatistics>,
        error_message: Option<String>,
    ) -> Result<Job> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(OrchestrationError::JobNotFound(job_id))?;

        if !job.state.can_transition_to(next) {
            warn!(
                job_id = %job_id,
                from = %job.state,
                to = %next,
                "rejected invalid state transition"
            );
            return Err(OrchestrationError::InvalidTransition {
                from: job.state,
                to: next,
            });
        }

        job.state = next;
        if let Some(statistics) = statistics {
            job.statistics = statistics;
        }
        if let Some(message) = error_message {
            job.error_message = Some(message);
        }
        if next.is_terminal() {
            job.finished_at = Some(Utc::now());
        }
        let snapshot = job.clone();

        if next.is_terminal() {
            // Release the resource key so a fresh start can be admitted.
            inner.by_resource.remove(&snapshot.resource_key);
        }
        Ok(snapshot)
    }
}
