//! Typed collaborator boundaries.
//!
//! The orchestration core never probes its host for optional capabilities;
//! each collaborator is an explicit trait object handed to a component's
//! constructor. Implementations are assumed independently thread-safe.

use crate::classifier::ErrorKind;
use crate::error::Result;
use crate::job::{JobId, JobStatistics};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A parsed document ready for index insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub document_count: u64,
}

/// Aggregate status published to the UI-facing sink. Raw values only; any
/// text formatting is the consumer's concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub active_job_count: usize,
    pub indexed_resource_count: usize,
    pub last_error: Option<String>,
}

/// Scans a resource and parses its files into documents. Cancellation is
/// cooperative: the worker stops calling between files once its token is set.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// List the files under a resource key (e.g. a folder path).
    async fn list_files(&self, resource_key: &str) -> Result<Vec<PathBuf>>;

    /// Parse one file into a document.
    async fn process_file(&self, path: &Path) -> Result<Document>;
}

/// Full-text/semantic index mutation, as far as this core needs it.
#[async_trait]
pub trait IndexManager: Send + Sync {
    async fn add_document(&self, document: Document) -> Result<()>;

    /// Drop the whole index, including any partially-built state.
    async fn clear_index(&self) -> Result<()>;

    async fn index_stats(&self) -> Result<IndexStats>;
}

#[async_trait]
pub trait SearchManager: Send + Sync {
    async fn clear_suggestion_cache(&self) -> Result<()>;
}

/// UI-facing state sink. Infallible: a display layer that cannot render a
/// status update has nothing useful to report back.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish_status(&self, snapshot: StatusSnapshot);

    async fn resource_indexed(&self, resource_key: &str, statistics: &JobStatistics);

    async fn resource_errored(&self, resource_key: &str, kind: ErrorKind);

    /// Raw progress pass-through for display.
    async fn progress(&self, job_id: JobId, message: &str, current: u64, total: u64) {
        let _ = (job_id, message, current, total);
    }
}
