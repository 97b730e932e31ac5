//! Scheduler Client Module
//!
//! Everything that talks to the cluster batch system goes through the
//! [`Scheduler`] trait so the coordination logic can run against a fake
//! queue in tests and against Slurm in production.
//!
//! - [`slurm`]: `sbatch`/`squeue`/`seff`/`scancel` backend
//! - [`accounting`]: status parsing and the bounded retry policy
//! - [`dry_run`]: wrapper that records submissions without sending them

pub mod accounting;
pub mod dry_run;
pub mod slurm;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use accounting::{parse_status, query_status, RetryPolicy};
pub use dry_run::DryRunScheduler;
pub use slurm::SlurmScheduler;

/// Scheduler-assigned job identifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the job id from a Slurm log name of the form `<name>_<id>.out`.
    pub fn from_output_file(path: &Path) -> Option<Self> {
        let stem = path.file_name()?.to_str()?.strip_suffix(".out")?;
        let (_, id) = stem.rsplit_once('_')?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self::new(id))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the live queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: JobId,
    pub user: String,
    pub name: String,
    pub state: String,
}

impl QueuedJob {
    /// True when every filter term is a substring of the job name.
    pub fn matches(&self, filters: &[&str]) -> bool {
        filters.iter().all(|term| self.name.contains(term))
    }
}

/// Terminal or transient state of a job as reported by accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    /// Finished with exit code 0.
    Completed,
    Failed { state: String, exit_code: Option<i32> },
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "still pending"),
            Self::Running => write!(f, "still running"),
            Self::Completed => write!(f, "COMPLETED (exit code 0)"),
            Self::Failed {
                state,
                exit_code: Some(code),
            } => write!(f, "{} (exit code {})", state, code),
            Self::Failed {
                state,
                exit_code: None,
            } => write!(f, "{}", state),
        }
    }
}

/// Operations the orchestrator needs from a batch scheduler.
pub trait Scheduler {
    /// Submits a rendered job script and returns the assigned id.
    ///
    /// Dependencies are part of the script header, so the scheduler
    /// enforces them without help from this process.
    fn submit(&self, script: &Path) -> Result<JobId>;

    /// Returns queued or running jobs whose name contains every filter term.
    fn queue(&self, filters: &[&str]) -> Result<Vec<QueuedJob>>;

    /// Returns raw accounting text for a job. May be stale or empty shortly
    /// after the job finishes; callers retry through [`query_status`].
    fn accounting(&self, job: &JobId) -> Result<String>;

    /// Cancels jobs; used only to clean up a wave that could not be completed.
    fn cancel(&self, jobs: &[JobId]) -> Result<()>;
}
