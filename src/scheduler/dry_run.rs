//! Dry-Run Scheduler
//!
//! Reads go to the wrapped scheduler so readiness checks see the real
//! queue; submissions are only logged and receive synthetic ids.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use log::info;

use super::{JobId, QueuedJob, Scheduler};
use crate::error::Result;

pub struct DryRunScheduler<S> {
    inner: S,
    next_id: Cell<u64>,
    submitted: RefCell<Vec<PathBuf>>,
}

impl<S: Scheduler> DryRunScheduler<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            next_id: Cell::new(1),
            submitted: RefCell::new(Vec::new()),
        }
    }

    /// Scripts that would have been submitted, in order.
    pub fn submitted(&self) -> Vec<PathBuf> {
        self.submitted.borrow().clone()
    }
}

impl<S: Scheduler> Scheduler for DryRunScheduler<S> {
    fn submit(&self, script: &Path) -> Result<JobId> {
        let n = self.next_id.get();
        self.next_id.set(n + 1);
        self.submitted.borrow_mut().push(script.to_path_buf());

        let id = JobId::new(format!("dryrun{}", n));
        info!("[DRY RUN] would sbatch {} (placeholder id {})", script.display(), id);
        Ok(id)
    }

    fn queue(&self, filters: &[&str]) -> Result<Vec<QueuedJob>> {
        self.inner.queue(filters)
    }

    fn accounting(&self, job: &JobId) -> Result<String> {
        self.inner.accounting(job)
    }

    fn cancel(&self, jobs: &[JobId]) -> Result<()> {
        info!("[DRY RUN] would cancel {} jobs", jobs.len());
        Ok(())
    }
}
