//! Default indexing worker.
//!
//! Drives the `DocumentProcessor` and `IndexManager` collaborators for one
//! job: scan the resource, then process files one at a time, checking the
//! cancellation token between files. Per-file failures are tolerated and
//! counted; only a failure to scan the resource at all fails the job.

use crate::interfaces::{DocumentProcessor, IndexManager};
use crate::job::{JobId, JobStatistics};
use crate::scheduler::JobScheduler;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct IndexingWorker {
    job_id: JobId,
    resource_key: String,
    processor: Arc<dyn DocumentProcessor>,
    index: Arc<dyn IndexManager>,
    cancel: CancellationToken,
}

impl IndexingWorker {
    pub fn new(
        job_id: JobId,
        resource_key: String,
        processor: Arc<dyn DocumentProcessor>,
        index: Arc<dyn IndexManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            resource_key,
            processor,
            index,
            cancel,
        }
    }

    /// Run the job to completion, cancellation, or error. All outcomes are
    /// reported back through the scheduler; this task never panics outward.
    pub async fn run(self, scheduler: Arc<JobScheduler>) {
        let started = Instant::now();

        scheduler.report_progress(self.job_id, "scanning", 0, 0);
        let files = match self.processor.list_files(&self.resource_key).await {
            Ok(files) => files,
            Err(e) => {
                scheduler.report_error(self.job_id, &e.to_string());
                return;
            }
        };
        info!(
            job_id = %self.job_id,
            resource_key = %self.resource_key,
            files = files.len(),
            "scan finished"
        );

        let total = files.len() as u64;
        let mut statistics = JobStatistics {
            files_found: total,
            ..Default::default()
        };

        for (position, path) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                // The scheduler already transitioned the job and released
                // the resource key; just stop doing work.
                info!(job_id = %self.job_id, "worker observed cancellation, exiting");
                return;
            }

            match self.processor.process_file(path).await {
                Ok(document) => match self.index.add_document(document).await {
                    Ok(()) => {
                        statistics.files_processed += 1;
                        statistics.documents_added += 1;
                    }
                    Err(e) => {
                        statistics.files_failed += 1;
                        warn!(job_id = %self.job_id, path = %path.display(), error = %e, "index insert failed");
                    }
                },
                Err(e) => {
                    statistics.files_failed += 1;
                    debug!(job_id = %self.job_id, path = %path.display(), error = %e, "file skipped");
                }
            }

            scheduler.report_progress(self.job_id, "processing", (position + 1) as u64, total);
        }

        statistics.processing_time_seconds = started.elapsed().as_secs_f64();
        scheduler.report_completed(self.job_id, statistics);
    }
}
