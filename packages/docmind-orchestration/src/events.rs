//! Typed job lifecycle events.
//!
//! All components publish into one `tokio::sync::broadcast` channel: the
//! recovery coordinator is the policy-driving consumer, and any number of
//! downstream listeners (UI, logging, metrics) subscribe to the same stream.
//! Events for a single job are emitted in order (`progress* -> terminal`);
//! no interleaving order is guaranteed across jobs.

use crate::job::{JobId, JobStatistics};
use tokio::sync::broadcast;

pub type EventSender = broadcast::Sender<JobEvent>;
pub type EventReceiver = broadcast::Receiver<JobEvent>;

#[derive(Debug, Clone)]
pub enum JobEvent {
    Started {
        job_id: JobId,
        resource_key: String,
    },
    /// Raw progress values plus a stage tag; no text formatting happens here.
    Progress {
        job_id: JobId,
        message: String,
        current: u64,
        total: u64,
    },
    Completed {
        job_id: JobId,
        statistics: JobStatistics,
    },
    /// Carries the raw message; classification is recovery policy, not
    /// detection.
    Failed {
        job_id: JobId,
        message: String,
    },
    Cancelled {
        job_id: JobId,
    },
    /// Watchdog deadline fired; emitted exactly once per armed timer.
    TimeoutOccurred {
        job_id: JobId,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id }
            | JobEvent::TimeoutOccurred { job_id } => *job_id,
        }
    }
}

pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}
