//! Fan-Out/Fan-In Coordination Module
//!
//! Turns "one upstream job per sample" into "one downstream wave per
//! pool" without a central coordinator. Every finishing upstream job runs
//! the orchestrator; each run walks the same state machine and at most
//! one of them submits.
//!
//! ```text
//! CheckingPrereqs -> Reserving -> FanningOut -> FanningIn -> Done
//!        |               |
//!        +---> Aborted <-+
//! ```
//!
//! - [`prereqs`]: upstream completion checks
//! - [`reservation`]: single-winner election per pool
//! - [`orchestrator`]: the state machine and wave submission
//! - [`timeline`]: transition timing for logs

pub mod orchestrator;
pub mod prereqs;
pub mod reservation;
pub mod timeline;

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process;

use crate::jobs::Caller;
use crate::scheduler::JobId;

pub use orchestrator::Orchestrator;
pub use prereqs::{PrerequisiteChecker, UpstreamJob};
pub use reservation::{
    build_reservation, Acquisition, DryRunReservation, ExclusiveFileReservation,
    JitteredFileReservation, Reservation,
};
pub use timeline::WaveTimeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveState {
    CheckingPrereqs,
    Reserving,
    FanningOut,
    FanningIn,
    Done,
    Aborted,
}

impl fmt::Display for WaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaveState::CheckingPrereqs => "checking-prereqs",
            WaveState::Reserving => "reserving",
            WaveState::FanningOut => "fanning-out",
            WaveState::FanningIn => "fanning-in",
            WaveState::Done => "done",
            WaveState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Upstream items counted by the prerequisite checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamItem {
    Scripts,
    Outputs,
    Artifacts,
}

impl fmt::Display for UpstreamItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpstreamItem::Scripts => "upstream scripts",
            UpstreamItem::Outputs => "upstream logs",
            UpstreamItem::Artifacts => "indexed realigned BAMs",
        };
        f.write_str(name)
    }
}

/// Why a pool is not ready yet. Never an error: a later trigger retries.
#[derive(Debug, Clone, PartialEq)]
pub enum NotReady {
    IncompleteUpstream {
        missing: UpstreamItem,
        found: usize,
        expected: usize,
    },
    UpstreamInFlight { job: JobId, name: String },
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::IncompleteUpstream {
                missing,
                found,
                expected,
            } => write!(f, "{} of {} {} present", found, expected, missing),
            NotReady::UpstreamInFlight { job, name } => {
                write!(f, "upstream job {} ({}) still queued", job, name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    /// Realigned BAMs in sample order.
    Ready(Vec<PathBuf>),
    NotReady(NotReady),
}

/// Jobs submitted for one caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerWave {
    pub caller: Caller,
    pub jobs: Vec<JobId>,
    pub merge: JobId,
    pub merge_script: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaveSummary {
    pub pool: String,
    pub partitions: usize,
    pub waves: Vec<CallerWave>,
}

impl WaveSummary {
    pub fn job_count(&self) -> usize {
        self.waves.iter().map(|w| w.jobs.len() + 1).sum()
    }
}

/// Result of one orchestrator invocation that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum WaveOutcome {
    Submitted(WaveSummary),
    NotReady(NotReady),
    RaceLost { holder: Option<String> },
}

/// Id this invocation reserves under: the explicit value, else
/// `SLURM_JOB_ID`, else `local-<pid>`.
pub fn invocation_id(explicit: Option<&str>) -> JobId {
    explicit
        .map(str::to_string)
        .or_else(|| env::var("SLURM_JOB_ID").ok())
        .filter(|id| !id.trim().is_empty())
        .map(JobId::new)
        .unwrap_or_else(|| JobId::new(format!("local-{}", process::id())))
}
