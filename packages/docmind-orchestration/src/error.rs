use crate::job::{JobId, JobState};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Resource busy: a non-terminal job already exists for '{0}'")]
    ResourceBusy(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job is not terminal: {0}")]
    JobNotTerminal(JobId),

    #[error("Document processing failed: {0}")]
    Processing(String),

    #[error("Index operation failed: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestrationError {
    pub fn processing<E: std::fmt::Display>(e: E) -> Self {
        Self::Processing(e.to_string())
    }

    pub fn index<E: std::fmt::Display>(e: E) -> Self {
        Self::Index(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}
