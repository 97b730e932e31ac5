//! In-memory scheduler for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{JobId, QueuedJob, Scheduler};
use crate::error::{PipelineError, Result};

#[derive(Default)]
struct State {
    next_id: u64,
    submitted: Vec<(PathBuf, JobId)>,
    queue: Vec<QueuedJob>,
    /// job -> (failing calls before the record appears, record text)
    accounting: HashMap<JobId, (u32, String)>,
    accounting_calls: HashMap<JobId, u32>,
    fail_submission_at: Option<usize>,
    cancelled: Vec<JobId>,
}

pub(crate) struct FakeScheduler {
    state: Mutex<State>,
}

impl FakeScheduler {
    pub(crate) fn new(first_id: u64) -> Self {
        Self {
            state: Mutex::new(State {
                next_id: first_id,
                ..State::default()
            }),
        }
    }

    pub(crate) fn push_queued(&self, id: &str, name: &str) {
        self.state.lock().unwrap().queue.push(QueuedJob {
            id: JobId::new(id),
            user: "tester".to_string(),
            name: name.to_string(),
            state: "RUNNING".to_string(),
        });
    }

    pub(crate) fn set_accounting(&self, job: &JobId, text: &str) {
        self.set_accounting_after(job, 0, text);
    }

    /// The first `failures` queries for `job` fail before `text` is returned.
    pub(crate) fn set_accounting_after(&self, job: &JobId, failures: u32, text: &str) {
        self.state
            .lock()
            .unwrap()
            .accounting
            .insert(job.clone(), (failures, text.to_string()));
    }

    /// Makes the n-th submission (0-based) fail.
    pub(crate) fn fail_submission_at(&self, n: usize) {
        self.state.lock().unwrap().fail_submission_at = Some(n);
    }

    pub(crate) fn submitted(&self) -> Vec<(PathBuf, JobId)> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<JobId> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub(crate) fn accounting_calls(&self, job: &JobId) -> u32 {
        let state = self.state.lock().unwrap();
        state.accounting_calls.get(job).copied().unwrap_or(0)
    }
}

impl Scheduler for FakeScheduler {
    fn submit(&self, script: &Path) -> Result<JobId> {
        let mut state = self.state.lock().unwrap();
        if state.fail_submission_at == Some(state.submitted.len()) {
            return Err(PipelineError::Submission {
                script: script.to_path_buf(),
                message: "sbatch: error: Batch job submission failed".to_string(),
            });
        }

        let id = JobId::new(state.next_id.to_string());
        state.next_id += 1;
        state.submitted.push((script.to_path_buf(), id.clone()));
        Ok(id)
    }

    fn queue(&self, filters: &[&str]) -> Result<Vec<QueuedJob>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .queue
            .iter()
            .filter(|job| job.matches(filters))
            .cloned()
            .collect())
    }

    fn accounting(&self, job: &JobId) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let calls = {
            let calls = state.accounting_calls.entry(job.clone()).or_insert(0);
            *calls += 1;
            *calls
        };

        match state.accounting.get(job) {
            Some((failures, text)) if calls > *failures => Ok(text.clone()),
            Some(_) => Ok(String::new()),
            None => Err(PipelineError::Scheduler {
                command: format!("seff {}", job),
                message: "Job not found".to_string(),
            }),
        }
    }

    fn cancel(&self, jobs: &[JobId]) -> Result<()> {
        self.state.lock().unwrap().cancelled.extend_from_slice(jobs);
        Ok(())
    }
}
