//! Job Accounting
//!
//! Slurm's accounting database lags behind job completion, so a freshly
//! finished job can report nothing, or a stale state, for a few seconds.
//! [`query_status`] retries under an explicit [`RetryPolicy`] and surfaces
//! [`PipelineError::AccountingUnavailable`] once the bound is reached.

use std::thread;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{JobId, JobStatus, Scheduler};
use crate::error::{PipelineError, Result};

/// Bounded retry with a fixed delay between attempts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Parses the `State:` line of `seff` output.
///
/// Returns `None` when no state line is present, which is how an
/// accounting record that has not landed yet looks.
///
/// ```
/// use poolrunner::scheduler::{parse_status, JobStatus};
///
/// let text = "Job ID: 12\nState: COMPLETED (exit code 0)\nCores: 1\n";
/// assert_eq!(parse_status(text), Some(JobStatus::Completed));
/// ```
pub fn parse_status(text: &str) -> Option<JobStatus> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("State:"))?;

    let rest = line.trim_start_matches("State:").trim();
    let state = rest.split_whitespace().next()?.to_uppercase();

    let exit_code = rest
        .to_lowercase()
        .split("exit code")
        .nth(1)
        .and_then(|tail| tail.trim().trim_end_matches(')').trim().parse::<i32>().ok());

    let status = match state.as_str() {
        "RUNNING" | "COMPLETING" => JobStatus::Running,
        "PENDING" | "REQUEUED" | "CONFIGURING" => JobStatus::Pending,
        "COMPLETED" if exit_code.unwrap_or(0) == 0 => JobStatus::Completed,
        _ => JobStatus::Failed { state, exit_code },
    };

    Some(status)
}

/// Queries a job's status, retrying while accounting is unavailable.
pub fn query_status<S: Scheduler + ?Sized>(
    scheduler: &S,
    job: &JobId,
    policy: &RetryPolicy,
) -> Result<JobStatus> {
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match scheduler.accounting(job) {
            Ok(text) => match parse_status(&text) {
                Some(status) => {
                    debug!("Job {}: {} (attempt {})", job, status, attempt);
                    return Ok(status);
                }
                None => debug!("Job {}: no accounting state yet (attempt {})", job, attempt),
            },
            Err(e) => warn!("Accounting query for job {} failed: {}", job, e),
        }

        if attempt < attempts {
            thread::sleep(policy.delay);
        }
    }

    Err(PipelineError::AccountingUnavailable {
        job: job.clone(),
        attempts,
    })
}
