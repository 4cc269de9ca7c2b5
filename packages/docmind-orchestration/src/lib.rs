/*
 * DocMind Orchestration - Background Indexing Job Supervision
 *
 * Orchestration core for long-running document-indexing operations.
 *
 * Architecture:
 * - Job Registry (admission, state machine, statistics)
 * - Job Scheduler (bounded concurrency, one job per resource key)
 * - Timeout Supervisor (per-job one-shot watchdogs)
 * - Error Classifier (closed taxonomy, priority keyword matching)
 * - Recovery Coordinator (cleanup policy, state reconciliation)
 *
 * Parsing, index mutation, search, and presentation are external
 * collaborators behind typed trait boundaries.
 */

pub mod classifier;
pub mod error;
pub mod events;
pub mod interfaces;
pub mod job;
pub mod registry;
pub mod recovery;
pub mod scheduler;
pub mod timeout;
pub mod worker;

// Re-exports
pub use classifier::{classify, ErrorKind};
pub use error::{OrchestrationError, Result};
pub use events::{event_channel, EventReceiver, EventSender, JobEvent};
pub use interfaces::{
    Document, DocumentProcessor, IndexManager, IndexStats, SearchManager, StatusSink,
    StatusSnapshot,
};
pub use job::{Job, JobId, JobState, JobStatistics};
pub use recovery::{ErrorRecord, RecoveryConfig, RecoveryCoordinator, TimeoutDecision};
pub use registry::{JobRegistry, RejectionReason};
pub use scheduler::{JobScheduler, SchedulerConfig, SchedulerStatus};
pub use timeout::TimeoutSupervisor;
pub use worker::IndexingWorker;
