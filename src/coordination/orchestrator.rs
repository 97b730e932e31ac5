//! Wave Orchestrator
//!
//! Drives one invocation for one pool through the coordination state
//! machine: check prerequisites, win the reservation, submit one calling
//! job per (caller, partition), then one merge job per caller that
//! depends on exactly that caller's calling jobs.
//!
//! Scripts are written into `<pool>/shfiles/variant_calling/` before each
//! submission. A merge script is only written once every calling job of
//! the wave has an id. If any submission fails, the jobs already
//! submitted by this invocation are cancelled (best effort) and the error
//! is returned; the reservation file stays in place.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use super::prereqs::PrerequisiteChecker;
use super::reservation::{Acquisition, Reservation};
use super::timeline::WaveTimeline;
use super::{CallerWave, NotReady, Readiness, WaveOutcome, WaveState, WaveSummary};
use crate::config::Config;
use crate::error::Result;
use crate::jobs::{calling_job, merge_job, Caller, CallingContext};
use crate::partition::{ensure_partitions, PartitionSet};
use crate::pipeline::{PipelineLayout, PoolMetadata};
use crate::scheduler::{JobId, Scheduler};

pub struct Orchestrator<'a, S: Scheduler + ?Sized, R: Reservation + ?Sized> {
    config: &'a Config,
    layout: &'a PipelineLayout,
    metadata: &'a PoolMetadata,
    scheduler: &'a S,
    reservation: &'a R,
}

impl<'a, S: Scheduler + ?Sized, R: Reservation + ?Sized> Orchestrator<'a, S, R> {
    pub fn new(
        config: &'a Config,
        layout: &'a PipelineLayout,
        metadata: &'a PoolMetadata,
        scheduler: &'a S,
        reservation: &'a R,
    ) -> Self {
        Self {
            config,
            layout,
            metadata,
            scheduler,
            reservation,
        }
    }

    /// Runs the state machine for `pool` as invocation `owner`.
    pub fn run(&self, pool: &str, owner: &JobId) -> Result<WaveOutcome> {
        let mut timeline = WaveTimeline::new(pool);
        let outcome = self.run_with_timeline(pool, owner, &mut timeline);
        debug!("{}", timeline.report());
        outcome
    }

    pub fn run_with_timeline(
        &self,
        pool: &str,
        owner: &JobId,
        timeline: &mut WaveTimeline,
    ) -> Result<WaveOutcome> {
        timeline.enter(WaveState::CheckingPrereqs);
        let bams = match self.check(pool, owner) {
            Ok(Readiness::Ready(bams)) => bams,
            Ok(Readiness::NotReady(reason)) => {
                match reason {
                    NotReady::IncompleteUpstream { .. } => warn!("{} not ready: {}", pool, reason),
                    NotReady::UpstreamInFlight { .. } => info!("{} not ready: {}", pool, reason),
                }
                timeline.enter(WaveState::Aborted);
                return Ok(WaveOutcome::NotReady(reason));
            }
            Err(e) => {
                timeline.enter(WaveState::Aborted);
                return Err(e);
            }
        };

        timeline.enter(WaveState::Reserving);
        match self.reservation.try_acquire(pool, owner.as_str()) {
            Ok(Acquisition::Won) => {}
            Ok(Acquisition::Lost { holder }) => {
                info!(
                    "Another invocation ({}) already launched {}",
                    holder.as_deref().unwrap_or("unknown"),
                    pool
                );
                timeline.enter(WaveState::Aborted);
                return Ok(WaveOutcome::RaceLost { holder });
            }
            Err(e) => {
                timeline.enter(WaveState::Aborted);
                return Err(e);
            }
        }

        let mut submitted = Vec::new();
        match self.launch(pool, &bams, &mut submitted, timeline) {
            Ok(summary) => {
                timeline.enter(WaveState::Done);
                info!(
                    "Launched {} jobs for {} over {} partitions",
                    summary.job_count(),
                    pool,
                    summary.partitions
                );
                Ok(WaveOutcome::Submitted(summary))
            }
            Err(e) => {
                error!("Wave for {} failed: {}", pool, e);
                self.cancel_partial(&submitted);
                error!(
                    "Remove {} before re-running {}",
                    self.layout.reservation_path(pool).display(),
                    pool
                );
                Err(e)
            }
        }
    }

    fn check(&self, pool: &str, owner: &JobId) -> Result<Readiness> {
        let samples = self.metadata.samples(pool)?;
        PrerequisiteChecker::new(
            self.scheduler,
            self.layout,
            &self.config.upstream.tag,
            self.config.scheduler.accounting_retry,
        )
        .check(pool, samples, owner)
    }

    /// Fan-out for every caller, then fan-in. Every id obtained is pushed
    /// to `submitted` as soon as it exists.
    fn launch(
        &self,
        pool: &str,
        bams: &[PathBuf],
        submitted: &mut Vec<JobId>,
        timeline: &mut WaveTimeline,
    ) -> Result<WaveSummary> {
        timeline.enter(WaveState::FanningOut);

        let reference = self.metadata.reference(pool)?;
        let partitions = ensure_partitions(reference, self.config.partitions.count)?;
        let script_dir = self.layout.calling_script_dir(pool);

        let mut callers: Vec<Caller> = Vec::new();
        for caller in &self.config.calling.callers {
            if !callers.contains(caller) {
                callers.push(*caller);
            }
        }
        if callers.is_empty() {
            warn!("No callers configured, nothing to submit for {}", pool);
        }

        let mut fanned = Vec::with_capacity(callers.len());
        for caller in callers {
            let ploidy = match caller {
                Caller::Crisp => Some(self.metadata.ploidy(pool)?),
                Caller::Varscan => self.metadata.ploidy(pool).ok(),
            };
            let output_dir = self.layout.caller_output_dir(pool, caller.name());
            fs::create_dir_all(&output_dir)?;

            let ctx = CallingContext {
                pool,
                reference,
                ploidy,
                bams,
                output_dir,
            };
            let jobs = self.fan_out(caller, &ctx, &partitions, &script_dir, submitted)?;
            fanned.push((caller, jobs));
        }

        timeline.enter(WaveState::FanningIn);
        let pooldir = self.layout.pool_dir(pool);
        let mut waves = Vec::with_capacity(fanned.len());

        for (caller, jobs) in fanned {
            let script = merge_job(caller, pool, &pooldir, &jobs, self.config);
            let merge_script = script.write_to(&script_dir)?;
            let merge = self.scheduler.submit(&merge_script)?;
            submitted.push(merge.clone());

            info!(
                "Submitted {} as job {} after {} {} jobs",
                script.name(),
                merge,
                jobs.len(),
                caller
            );
            waves.push(CallerWave {
                caller,
                jobs,
                merge,
                merge_script,
            });
        }

        Ok(WaveSummary {
            pool: pool.to_string(),
            partitions: partitions.len(),
            waves,
        })
    }

    fn fan_out(
        &self,
        caller: Caller,
        ctx: &CallingContext<'_>,
        partitions: &PartitionSet,
        script_dir: &Path,
        submitted: &mut Vec<JobId>,
    ) -> Result<Vec<JobId>> {
        let mut jobs = Vec::with_capacity(partitions.len());

        for partition in partitions.iter() {
            let script = calling_job(caller, ctx, partition, self.config)?;
            let path = script.write_to(script_dir)?;
            let job = self.scheduler.submit(&path)?;
            debug!("Submitted {} as job {}", script.name(), job);

            submitted.push(job.clone());
            jobs.push(job);
        }

        info!("Submitted {} {} jobs for {}", jobs.len(), caller, ctx.pool);
        Ok(jobs)
    }

    fn cancel_partial(&self, submitted: &[JobId]) {
        if submitted.is_empty() {
            return;
        }
        warn!("Cancelling {} jobs of the incomplete wave", submitted.len());
        if let Err(e) = self.scheduler.cancel(submitted) {
            warn!("Could not cancel jobs {:?}: {}", submitted, e);
        }
    }
}
