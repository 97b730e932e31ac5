//! Pipeline Configuration
//!
//! Optional YAML file, by default `<parentdir>/poolrunner.yaml`. Every field
//! has a default, so a partial file (or none at all) is valid.
//!
//! # Example YAML Format
//!
//! ```yaml
//! scheduler:
//!   accounting_retry:
//!     max_attempts: 10
//!     delay: 1000
//! reservation:
//!   backend: exclusive
//! partitions:
//!   count: 100
//! calling:
//!   callers: [varscan, crisp]
//!   resources:
//!     time: "23:59:00"
//!     mem: 16000M
//! notify:
//!   mail_user: someone@example.org
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::jobs::{Caller, ResourceRequest};
use crate::scheduler::RetryPolicy;

/// File name looked up in the parent directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "poolrunner.yaml";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub reservation: ReservationConfig,
    pub partitions: PartitionConfig,
    pub upstream: UpstreamConfig,
    pub calling: CallingConfig,
    pub merge: MergeConfig,
    pub notify: NotifyConfig,
    pub hooks: HooksConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sbatch: Option<PathBuf>,
    pub squeue: Option<PathBuf>,
    pub seff: Option<PathBuf>,
    pub scancel: Option<PathBuf>,
    /// Queue owner; defaults to `$USER`.
    pub user: Option<String>,
    pub accounting_retry: RetryPolicy,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReservationBackend {
    /// Atomic create-if-absent.
    #[default]
    Exclusive,
    /// Write, sleep a random jitter, re-read.
    Jittered,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReservationConfig {
    pub backend: ReservationBackend,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            backend: ReservationBackend::default(),
            jitter_min_ms: 0,
            jitter_max_ms: 15_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PartitionConfig {
    /// Number of region files a reference is split into.
    pub count: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { count: 50 }
    }
}

/// Where the realignment stage leaves its scripts, logs and BAMs.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub script_dir: String,
    pub tag: String,
    pub artifact_dir: String,
    pub resources: ResourceRequest,
    /// Command used inside upstream scripts to re-enter the orchestrator.
    pub poolrunner_bin: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            script_dir: "05_indelRealign_shfiles".to_string(),
            tag: "indelRealign".to_string(),
            artifact_dir: "04_realign".to_string(),
            resources: ResourceRequest::new("11:59:00", "6000M").with_ntasks(1),
            poolrunner_bin: "poolrunner".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CallingConfig {
    pub callers: Vec<Caller>,
    pub resources: ResourceRequest,
    pub varscan_jar: String,
    pub crisp_dir: String,
}

impl Default for CallingConfig {
    fn default() -> Self {
        Self {
            callers: vec![Caller::Varscan],
            resources: ResourceRequest::new("23:59:00", "16000M").with_ntasks(1),
            varscan_jar: "$VARSCAN_DIR/VarScan.v2.3.9.jar".to_string(),
            crisp_dir: "$CRISP_DIR".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MergeConfig {
    pub resources: ResourceRequest,
    /// Placeholders: `{pooldir}`, `{program}`, `{pool}`.
    pub command: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            resources: ResourceRequest::new("02:59:00", "20000M").with_cpus(1),
            command: "python $HOME/pipeline/combine_crispORvarscan.py {pooldir} {program} {pool}"
                .to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub mail_user: Option<String>,
    pub mail_type: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            mail_user: None,
            mail_type: "FAIL".to_string(),
        }
    }
}

/// Shell lines shared by every generated script.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HooksConfig {
    /// Environment setup run before pipeline helpers.
    pub preamble: Vec<String>,
    /// Run at the end of every calling and merge job. Placeholder: `{program}`.
    pub post_job: Vec<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            preamble: vec![
                "source $HOME/.bashrc".to_string(),
                "export PYTHONPATH=\"${PYTHONPATH}:$HOME/pipeline\"".to_string(),
            ],
            post_job: vec!["python $HOME/pipeline/balance_queue.py {program}".to_string()],
        }
    }
}

impl Config {
    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        debug!("Config content loaded ({} bytes)", content.len());

        let config: Config = serde_yaml::from_str(&content).map_err(|e| PipelineError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `explicit` if given, else `<parentdir>/poolrunner.yaml` when it
    /// exists, else the built-in defaults.
    pub fn resolve(parentdir: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = parentdir.join(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            debug!("No {} in {}, using defaults", DEFAULT_CONFIG_FILE, parentdir.display());
            Ok(Self::default())
        }
    }
}
