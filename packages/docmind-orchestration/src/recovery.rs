//! Recovery coordination: error classification, cleanup, state reset.
//!
//! A single coordinator task consumes the scheduler's event stream and turns
//! failures into cleanup actions against the external collaborators. Timeout
//! outcomes are decided by the caller (a UI prompt, a CLI flag) and fed back
//! through [`RecoveryCoordinator::handle_timeout`]; the coordinator contains
//! no presentation logic.
//!
//! Every cleanup step is isolated: a failing step is logged and the
//! remaining steps still run, so [`RecoveryCoordinator::reset_state`] can
//! always succeed afterwards.

use crate::classifier::{classify, ErrorKind};
use crate::events::JobEvent;
use crate::interfaces::{IndexManager, SearchManager, StatusSink, StatusSnapshot};
use crate::job::{JobId, JobStatistics};
use crate::scheduler::JobScheduler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Caller-supplied outcome for a fired timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutDecision {
    /// Re-arm the watchdog and let the job keep running.
    Continue,
    /// Cooperative stop plus full cleanup.
    StopAndReset,
    /// Cooperative stop, cleanup, then re-submit the same resource key after
    /// a fixed delay.
    StopAndRestart,
}

/// Write-once record of an observed failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub job_id: JobId,
    pub raw_message: String,
    pub kind: ErrorKind,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Delay before re-submitting a resource after `StopAndRestart`.
    pub restart_delay_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            restart_delay_secs: 3,
        }
    }
}

impl RecoveryConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

#[derive(Default)]
struct ResourceStates {
    indexed: HashSet<String>,
    errored: HashMap<String, ErrorKind>,
    last_error: Option<String>,
}

pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    scheduler: Arc<JobScheduler>,
    index: Arc<dyn IndexManager>,
    search: Arc<dyn SearchManager>,
    status: Arc<dyn StatusSink>,
    resources: Mutex<ResourceStates>,
    records: Mutex<Vec<ErrorRecord>>,
}

impl RecoveryCoordinator {
    pub fn new(
        config: RecoveryConfig,
        scheduler: Arc<JobScheduler>,
        index: Arc<dyn IndexManager>,
        search: Arc<dyn SearchManager>,
        status: Arc<dyn StatusSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            scheduler,
            index,
            search,
            status,
            resources: Mutex::new(ResourceStates::default()),
            records: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the coordinator event loop. The returned handle finishes when
    /// the scheduler's event channel closes.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run().await })
    }

    /// Single-consumer event loop over the scheduler's lifecycle stream.
    pub async fn run(self: Arc<Self>) {
        let mut events = self.scheduler.subscribe();
        loop {
            match events.recv().await {
                Ok(JobEvent::Completed { job_id, statistics }) => {
                    self.handle_completed(job_id, &statistics).await;
                }
                Ok(JobEvent::Failed { job_id, message }) => {
                    self.handle_error(job_id, &message).await;
                }
                Ok(JobEvent::TimeoutOccurred { job_id }) => {
                    // The decision comes from the caller; nothing to do yet.
                    warn!(job_id = %job_id, "timeout observed, awaiting decision");
                }
                Ok(JobEvent::Progress {
                    job_id,
                    message,
                    current,
                    total,
                }) => {
                    self.status.progress(job_id, &message, current, total).await;
                }
                Ok(JobEvent::Started { .. }) | Ok(JobEvent::Cancelled { .. }) => {
                    self.publish_aggregate().await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "recovery coordinator lagged behind event stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("recovery coordinator stopped");
    }

    /// Post-completion reconciliation: suggestion caches are stale against
    /// the new index and the resource becomes queryable.
    pub async fn handle_completed(&self, job_id: JobId, statistics: &JobStatistics) {
        self.scheduler.supervisor().cancel_timeout(job_id);

        if let Err(e) = self.search.clear_suggestion_cache().await {
            error!(job_id = %job_id, error = %e, "suggestion cache clear failed");
        }

        let Some(job) = self.scheduler.job_info(job_id) else {
            warn!(job_id = %job_id, "completed job missing from registry");
            return;
        };

        {
            let mut resources = self.resources.lock().expect("resource lock poisoned");
            resources.errored.remove(&job.resource_key);
            resources.indexed.insert(job.resource_key.clone());
        }
        self.status
            .resource_indexed(&job.resource_key, statistics)
            .await;
        self.publish_aggregate().await;

        info!(
            job_id = %job_id,
            resource_key = %job.resource_key,
            files_processed = statistics.files_processed,
            "completion reconciled"
        );
    }

    /// Classify a failure and run the kind-specific cleanup routine.
    ///
    /// `Timeout`-classified messages are handled exclusively through
    /// [`handle_timeout`](Self::handle_timeout); one arriving here is logged
    /// and not double-processed. For every other kind the common tail runs:
    /// partial index cleared (except `FileAccess`, which keeps the files
    /// that succeeded), suggestion cache cleared, resource marked errored,
    /// aggregate status republished.
    pub async fn handle_error(&self, job_id: JobId, raw_message: &str) {
        let kind = classify(raw_message);
        if kind == ErrorKind::Timeout {
            info!(job_id = %job_id, "timeout-classified error already handled via timeout channel");
            return;
        }

        self.records.lock().expect("record lock poisoned").push(ErrorRecord {
            job_id,
            raw_message: raw_message.to_string(),
            kind,
            observed_at: Utc::now(),
        });
        error!(job_id = %job_id, kind = %kind, raw_message, "indexing job error");

        if kind.clears_partial_index() {
            if let Err(e) = self.index.clear_index().await {
                error!(job_id = %job_id, error = %e, "partial index clear failed");
            }
        } else {
            info!(job_id = %job_id, kind = %kind, "partial results retained");
        }

        if let Err(e) = self.search.clear_suggestion_cache().await {
            error!(job_id = %job_id, error = %e, "suggestion cache clear failed");
        }

        if let Some(job) = self.scheduler.job_info(job_id) {
            self.mark_errored(&job.resource_key, kind, raw_message).await;
        } else {
            warn!(job_id = %job_id, "failed job missing from registry");
        }

        self.publish_aggregate().await;
    }

    /// Apply a caller decision to a fired timeout.
    pub async fn handle_timeout(&self, job_id: JobId, decision: TimeoutDecision) {
        info!(job_id = %job_id, decision = ?decision, "applying timeout decision");
        match decision {
            TimeoutDecision::Continue => {
                self.scheduler.rearm_timeout(job_id);
            }
            TimeoutDecision::StopAndReset => {
                self.stop_and_clean(job_id).await;
            }
            TimeoutDecision::StopAndRestart => {
                let resource_key = self
                    .scheduler
                    .job_info(job_id)
                    .map(|job| job.resource_key);
                self.stop_and_clean(job_id).await;

                let Some(resource_key) = resource_key else {
                    warn!(job_id = %job_id, "no resource key to restart");
                    return;
                };
                let scheduler = Arc::clone(&self.scheduler);
                let delay = self.config.restart_delay();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    match scheduler.start(&resource_key) {
                        Some(new_id) => {
                            info!(resource_key, new_job_id = %new_id, "timed-out job restarted");
                        }
                        None => {
                            warn!(resource_key, "restart after timeout was rejected");
                        }
                    }
                });
            }
        }
    }

    /// Return all externally observable state to the "ready" baseline.
    /// Idempotent and best-effort; callable after any terminal outcome.
    pub async fn reset_state(&self) {
        if let Err(e) = self.index.clear_index().await {
            error!(error = %e, "index clear failed during reset");
        }
        if let Err(e) = self.search.clear_suggestion_cache().await {
            error!(error = %e, "suggestion cache clear failed during reset");
        }

        {
            let mut resources = self.resources.lock().expect("resource lock poisoned");
            resources.indexed.clear();
            resources.errored.clear();
            resources.last_error = None;
        }
        self.publish_aggregate().await;
        info!("orchestration state reset to baseline");
    }

    /// The aggregate snapshot as it would be published right now.
    pub fn current_snapshot(&self) -> StatusSnapshot {
        let resources = self.resources.lock().expect("resource lock poisoned");
        StatusSnapshot {
            active_job_count: self.scheduler.active_count(),
            indexed_resource_count: resources.indexed.len(),
            last_error: resources.last_error.clone(),
        }
    }

    pub fn error_records(&self) -> Vec<ErrorRecord> {
        self.records.lock().expect("record lock poisoned").clone()
    }

    async fn stop_and_clean(&self, job_id: JobId) {
        let resource_key = self
            .scheduler
            .job_info(job_id)
            .map(|job| job.resource_key);

        self.scheduler.mark_timed_out(job_id);

        self.records.lock().expect("record lock poisoned").push(ErrorRecord {
            job_id,
            raw_message: "indexing job timed out".to_string(),
            kind: ErrorKind::Timeout,
            observed_at: Utc::now(),
        });

        // A timed-out job leaves the index in an unknown partial state.
        if let Err(e) = self.index.clear_index().await {
            error!(job_id = %job_id, error = %e, "partial index clear failed");
        }
        if let Err(e) = self.search.clear_suggestion_cache().await {
            error!(job_id = %job_id, error = %e, "suggestion cache clear failed");
        }

        if let Some(resource_key) = resource_key {
            self.mark_errored(&resource_key, ErrorKind::Timeout, "indexing job timed out")
                .await;
        }
        self.publish_aggregate().await;
    }

    async fn mark_errored(&self, resource_key: &str, kind: ErrorKind, raw_message: &str) {
        {
            let mut resources = self.resources.lock().expect("resource lock poisoned");
            resources.indexed.remove(resource_key);
            resources.errored.insert(resource_key.to_string(), kind);
            resources.last_error = Some(format!("{kind}: {raw_message}"));
        }
        self.status.resource_errored(resource_key, kind).await;
    }

    async fn publish_aggregate(&self) {
        let snapshot = self.current_snapshot();
        self.status.publish_status(snapshot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestrationError, Result};
    use crate::interfaces::{Document, DocumentProcessor, IndexStats};
    use crate::job::JobState;
    use crate::scheduler::SchedulerConfig;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StalledProcessor;

    #[async_trait]
    impl DocumentProcessor for StalledProcessor {
        async fn list_files(&self, _resource_key: &str) -> Result<Vec<PathBuf>> {
            futures::future::pending::<()>().await;
            unreachable!()
        }

        async fn process_file(&self, _path: &Path) -> Result<Document> {
            unreachable!()
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        clears: AtomicUsize,
        fail_clear: AtomicBool,
    }

    #[async_trait]
    impl IndexManager for RecordingIndex {
        async fn add_document(&self, _document: Document) -> Result<()> {
            Ok(())
        }

        async fn clear_index(&self) -> Result<()> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            if self.fail_clear.load(Ordering::SeqCst) {
                return Err(OrchestrationError::index("index store unavailable"));
            }
            Ok(())
        }

        async fn index_stats(&self) -> Result<IndexStats> {
            Ok(IndexStats::default())
        }
    }

    #[derive(Default)]
    struct RecordingSearch {
        cache_clears: AtomicUsize,
    }

    #[async_trait]
    impl SearchManager for RecordingSearch {
        async fn clear_suggestion_cache(&self) -> Result<()> {
            self.cache_clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingStatus {
        snapshots: Mutex<Vec<StatusSnapshot>>,
        indexed: Mutex<Vec<String>>,
        errored: Mutex<Vec<(String, ErrorKind)>>,
    }

    #[async_trait]
    impl StatusSink for RecordingStatus {
        async fn publish_status(&self, snapshot: StatusSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot);
        }

        async fn resource_indexed(&self, resource_key: &str, _statistics: &JobStatistics) {
            self.indexed.lock().unwrap().push(resource_key.to_string());
        }

        async fn resource_errored(&self, resource_key: &str, kind: ErrorKind) {
            self.errored
                .lock()
                .unwrap()
                .push((resource_key.to_string(), kind));
        }
    }

    struct Harness {
        scheduler: Arc<JobScheduler>,
        coordinator: Arc<RecoveryCoordinator>,
        index: Arc<RecordingIndex>,
        search: Arc<RecordingSearch>,
        status: Arc<RecordingStatus>,
    }

    fn harness() -> Harness {
        let index = Arc::new(RecordingIndex::default());
        let search = Arc::new(RecordingSearch::default());
        let status = Arc::new(RecordingStatus::default());
        let scheduler = JobScheduler::new(
            SchedulerConfig::default(),
            Arc::new(StalledProcessor),
            Arc::clone(&index) as Arc<dyn IndexManager>,
        );
        let coordinator = RecoveryCoordinator::new(
            RecoveryConfig::default(),
            Arc::clone(&scheduler),
            Arc::clone(&index) as Arc<dyn IndexManager>,
            Arc::clone(&search) as Arc<dyn SearchManager>,
            Arc::clone(&status) as Arc<dyn StatusSink>,
        );
        Harness {
            scheduler,
            coordinator,
            index,
            search,
            status,
        }
    }

    #[tokio::test]
    async fn test_file_access_error_retains_partial_index() {
        let h = harness();
        let job_id = h.scheduler.start("/docs/a").unwrap();

        h.coordinator
            .handle_error(job_id, "File not found: /docs/a/x.pdf")
            .await;

        assert_eq!(h.index.clears.load(Ordering::SeqCst), 0);
        assert_eq!(h.search.cache_clears.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.status.errored.lock().unwrap().as_slice(),
            &[("/docs/a".to_string(), ErrorKind::FileAccess)]
        );

        let records = h.coordinator.error_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ErrorKind::FileAccess);
        assert_eq!(records[0].job_id, job_id);
    }

    #[tokio::test]
    async fn test_permission_error_clears_partial_index() {
        let h = harness();
        let job_id = h.scheduler.start("/docs/a").unwrap();

        h.coordinator
            .handle_error(job_id, "Permission denied: /docs/a")
            .await;

        assert_eq!(h.index.clears.load(Ordering::SeqCst), 1);
        assert_eq!(h.search.cache_clears.load(Ordering::SeqCst), 1);
        let snapshot = h.coordinator.current_snapshot();
        assert!(snapshot.last_error.unwrap().starts_with("permission"));
    }

    #[tokio::test]
    async fn test_timeout_classified_error_is_not_double_processed() {
        let h = harness();
        let job_id = h.scheduler.start("/docs/a").unwrap();

        h.coordinator
            .handle_error(job_id, "operation timeout after 30m")
            .await;

        assert!(h.coordinator.error_records().is_empty());
        assert_eq!(h.index.clears.load(Ordering::SeqCst), 0);
        assert_eq!(h.search.cache_clears.load(Ordering::SeqCst), 0);
        assert!(h.status.errored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failing_step() {
        let h = harness();
        h.index.fail_clear.store(true, Ordering::SeqCst);
        let job_id = h.scheduler.start("/docs/a").unwrap();

        h.coordinator.handle_error(job_id, "disk full").await;

        // Index clear failed, but the remaining steps still ran.
        assert_eq!(h.index.clears.load(Ordering::SeqCst), 1);
        assert_eq!(h.search.cache_clears.load(Ordering::SeqCst), 1);
        assert_eq!(h.status.errored.lock().unwrap().len(), 1);
        assert!(!h.status.snapshots.lock().unwrap().is_empty());

        // And reset afterwards still succeeds.
        h.coordinator.reset_state().await;
        assert!(h.coordinator.current_snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn test_reset_state_is_idempotent() {
        let h = harness();
        let job_id = h.scheduler.start("/docs/a").unwrap();
        h.coordinator.handle_error(job_id, "corrupt segment").await;
        h.scheduler.stop(job_id);

        h.coordinator.reset_state().await;
        let first = h.coordinator.current_snapshot();
        h.coordinator.reset_state().await;
        let second = h.coordinator.current_snapshot();

        assert_eq!(first, second);
        assert_eq!(first.indexed_resource_count, 0);
        assert!(first.last_error.is_none());
    }

    #[tokio::test]
    async fn test_handle_completed_marks_resource_indexed() {
        let h = harness();
        let job_id = h.scheduler.start("/docs/a").unwrap();
        let statistics = JobStatistics {
            files_found: 10,
            files_processed: 10,
            documents_added: 9,
            ..Default::default()
        };
        h.scheduler.report_completed(job_id, statistics.clone());

        h.coordinator.handle_completed(job_id, &statistics).await;

        assert_eq!(
            h.status.indexed.lock().unwrap().as_slice(),
            &["/docs/a".to_string()]
        );
        assert_eq!(h.search.cache_clears.load(Ordering::SeqCst), 1);
        let snapshot = h.coordinator.current_snapshot();
        assert_eq!(snapshot.indexed_resource_count, 1);
        assert_eq!(snapshot.active_job_count, 0);
    }

    #[tokio::test]
    async fn test_timeout_continue_rearms_watchdog() {
        let h = harness();
        let job_id = h.scheduler.start("/docs/a").unwrap();
        // Simulate the fired watchdog having removed its entry.
        h.scheduler.supervisor().cancel_timeout(job_id);

        h.coordinator
            .handle_timeout(job_id, TimeoutDecision::Continue)
            .await;

        assert!(h.scheduler.supervisor().is_active(job_id));
        assert_eq!(
            h.scheduler.job_info(job_id).unwrap().state,
            JobState::Running
        );
    }

    #[tokio::test]
    async fn test_timeout_stop_and_reset() {
        let h = harness();
        let job_id = h.scheduler.start("/docs/a").unwrap();

        h.coordinator
            .handle_timeout(job_id, TimeoutDecision::StopAndReset)
            .await;

        assert_eq!(
            h.scheduler.job_info(job_id).unwrap().state,
            JobState::TimedOut
        );
        assert_eq!(h.index.clears.load(Ordering::SeqCst), 1);
        assert_eq!(h.search.cache_clears.load(Ordering::SeqCst), 1);
        let records = h.coordinator.error_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ErrorKind::Timeout);

        // The key is immediately available for a fresh start.
        assert!(h.scheduler.start("/docs/a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stop_and_restart_resubmits_after_delay() {
        let h = harness();
        let job_id = h.scheduler.start("/docs/a").unwrap();

        h.coordinator
            .handle_timeout(job_id, TimeoutDecision::StopAndRestart)
            .await;
        assert_eq!(
            h.scheduler.job_info(job_id).unwrap().state,
            JobState::TimedOut
        );

        tokio::time::sleep(Duration::from_secs(4)).await;

        let restarted = h.scheduler.registry().active_job_for("/docs/a");
        assert!(restarted.is_some());
        assert_ne!(restarted.unwrap(), job_id);
    }
}
