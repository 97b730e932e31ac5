//! Pipeline Error Types
//!
//! Fatal failures of a single invocation. Expected aborts (upstream not
//! ready, reservation lost) are not errors; they are reported through
//! [`crate::coordination::Readiness`] and [`crate::coordination::WaveOutcome`].

use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::{JobId, JobStatus};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse configuration '{path}': {message}")]
    Config { path: PathBuf, message: String },

    #[error("Pool metadata error: {0}")]
    Metadata(String),

    #[error("Input '{path}' is not accessible: {message}")]
    Input { path: PathBuf, message: String },

    #[error("Reference '{path}' could not be partitioned: {message}")]
    Reference { path: PathBuf, message: String },

    #[error("Upstream job {job} ({script}) is not usable: {status}")]
    UpstreamFailed {
        job: JobId,
        script: PathBuf,
        status: JobStatus,
    },

    #[error("Accounting for job {job} unavailable after {attempts} attempts")]
    AccountingUnavailable { job: JobId, attempts: u32 },

    #[error("Scheduler rejected '{script}': {message}")]
    Submission { script: PathBuf, message: String },

    #[error("Scheduler command '{command}' failed: {message}")]
    Scheduler { command: String, message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
