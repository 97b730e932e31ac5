//! Slurm Backend
//!
//! Drives the Slurm command line tools.
//!
//! # Binary Resolution
//!
//! Each binary is taken from the configuration when set, otherwise resolved
//! once from `PATH` through `which`, falling back to the bare name.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, info, warn};
use once_cell::sync::Lazy;

use super::{JobId, QueuedJob, Scheduler};
use crate::config::SchedulerConfig;
use crate::error::{PipelineError, Result};

/// `squeue` output format: id, user, name, state.
const QUEUE_FORMAT: &str = "%i|%u|%j|%T";

/// Lazily-resolved paths of the Slurm tools on this node.
static SLURM_BINARIES: Lazy<SlurmBinaries> = Lazy::new(|| SlurmBinaries {
    sbatch: resolve_binary("sbatch"),
    squeue: resolve_binary("squeue"),
    seff: resolve_binary("seff"),
    scancel: resolve_binary("scancel"),
});

#[derive(Debug, Clone)]
struct SlurmBinaries {
    sbatch: PathBuf,
    squeue: PathBuf,
    seff: PathBuf,
    scancel: PathBuf,
}

fn resolve_binary(name: &str) -> PathBuf {
    if let Ok(output) = Command::new("which").arg(name).output() {
        if output.status.success() {
            let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path_str.is_empty() {
                debug!("Using {}: {}", name, path_str);
                return PathBuf::from(path_str);
            }
        }
    }

    warn!("{} not found in PATH, invoking it by name", name);
    PathBuf::from(name)
}

/// Scheduler backed by `sbatch`, `squeue`, `seff` and `scancel`.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    sbatch: PathBuf,
    squeue: PathBuf,
    seff: PathBuf,
    scancel: PathBuf,
    user: Option<String>,
}

impl SlurmScheduler {
    /// Builds a backend from configuration, resolving unset binaries from `PATH`.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        let pick = |configured: &Option<PathBuf>, resolved: &PathBuf| {
            configured.clone().unwrap_or_else(|| resolved.clone())
        };

        Self {
            sbatch: pick(&config.sbatch, &SLURM_BINARIES.sbatch),
            squeue: pick(&config.squeue, &SLURM_BINARIES.squeue),
            seff: pick(&config.seff, &SLURM_BINARIES.seff),
            scancel: pick(&config.scancel, &SLURM_BINARIES.scancel),
            user: config.user.clone().or_else(|| std::env::var("USER").ok()),
        }
    }

    fn run(&self, command: &mut Command, label: &str) -> Result<Output> {
        debug!("Running {:?}", command);
        let output = command.output().map_err(|e| PipelineError::Scheduler {
            command: label.to_string(),
            message: e.to_string(),
        })?;
        Ok(output)
    }
}

impl Scheduler for SlurmScheduler {
    fn submit(&self, script: &Path) -> Result<JobId> {
        let mut command = Command::new(&self.sbatch);

        // Slurm writes %j.out logs relative to the submission directory.
        match (script.parent(), script.file_name()) {
            (Some(dir), Some(name)) if !dir.as_os_str().is_empty() => {
                command.current_dir(dir).arg(name);
            }
            _ => {
                command.arg(script);
            }
        }

        let output = command.output().map_err(|e| PipelineError::Submission {
            script: script.to_path_buf(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(PipelineError::Submission {
                script: script.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = parse_submission(&stdout).ok_or_else(|| PipelineError::Submission {
            script: script.to_path_buf(),
            message: format!("unexpected sbatch output: '{}'", stdout.trim()),
        })?;

        info!("sbatched {} as job {}", script.display(), id);
        Ok(id)
    }

    fn queue(&self, filters: &[&str]) -> Result<Vec<QueuedJob>> {
        let mut command = Command::new(&self.squeue);
        command.arg("-h").arg("-o").arg(QUEUE_FORMAT);
        if let Some(ref user) = self.user {
            command.arg("-u").arg(user);
        }

        let output = self.run(&mut command, "squeue")?;
        if !output.status.success() {
            return Err(PipelineError::Scheduler {
                command: "squeue".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_queue(&stdout)
            .into_iter()
            .filter(|job| job.matches(filters))
            .collect())
    }

    fn accounting(&self, job: &JobId) -> Result<String> {
        let output = self.run(Command::new(&self.seff).arg(job.as_str()), "seff")?;

        if !output.status.success() {
            return Err(PipelineError::Scheduler {
                command: format!("seff {}", job),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn cancel(&self, jobs: &[JobId]) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let mut command = Command::new(&self.scancel);
        command.args(jobs.iter().map(JobId::as_str));

        let output = self.run(&mut command, "scancel")?;
        if !output.status.success() {
            return Err(PipelineError::Scheduler {
                command: "scancel".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Cancelled {} jobs", jobs.len());
        Ok(())
    }
}

/// Extracts the job id from `sbatch` stdout.
///
/// Handles both `Submitted batch job 123` and `--parsable` output
/// (`123` or `123;cluster`).
fn parse_submission(stdout: &str) -> Option<JobId> {
    let token = stdout.split_whitespace().last()?;
    let id = token.split(';').next()?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(JobId::new(id))
}

/// Parses `squeue -h -o "%i|%u|%j|%T"` lines, skipping malformed rows.
fn parse_queue(stdout: &str) -> Vec<QueuedJob> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().splitn(4, '|');
            let id = fields.next()?.trim();
            let user = fields.next()?.trim();
            let name = fields.next()?.trim();
            let state = fields.next().unwrap_or("").trim();
            if id.is_empty() {
                return None;
            }
            Some(QueuedJob {
                id: JobId::new(id),
                user: user.to_string(),
                name: name.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}
