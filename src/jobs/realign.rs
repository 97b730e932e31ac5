//! Upstream Realignment Job
//!
//! One indel-realignment job per sample. Its last step re-enters the
//! orchestrator for the pool, which is what makes the fan-in trigger
//! decentralized: every finishing sample asks whether the pool is ready.

use std::path::{Path, PathBuf};

use log::info;

use super::script::JobScript;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::pipeline::PipelineLayout;
use crate::scheduler::{JobId, Scheduler};

#[derive(Debug, Clone)]
pub struct RealignRequest<'a> {
    pub pool: &'a str,
    pub sample: &'a str,
    /// Duplicate-marked BAM produced by the previous stage.
    pub dupfile: &'a Path,
    pub reference: &'a Path,
}

/// `<pool>-<sample>_<tag>`; also the stem of the script and its logs.
pub fn upstream_job_name(pool: &str, sample: &str, tag: &str) -> String {
    format!("{}-{}_{}", pool, sample, tag)
}

pub fn realign_job(layout: &PipelineLayout, request: &RealignRequest<'_>, config: &Config) -> JobScript {
    let upstream = &config.upstream;
    let aligndir = layout.artifact_dir(request.pool);
    let targets = aligndir.join(format!("{}_realignment_targets.list", request.sample));
    let realigned = layout.realigned_bam(request.pool, request.sample);

    JobScript::new(
        upstream_job_name(request.pool, request.sample, &upstream.tag),
        &upstream.resources,
    )
    .notify(&config.notify)
    .line("module load gatk/3.8")
    .line(format!(
        "java -Djava.io.tmpdir=$SLURM_TMPDIR -Xmx8g -jar $EBROOTGATK/GenomeAnalysisTK.jar \
-T IndelRealigner -R {} -I {} -targetIntervals {} -o {}",
        request.reference.display(),
        request.dupfile.display(),
        targets.display(),
        realigned.display()
    ))
    .line("module unload gatk")
    .blank()
    .comment("start variant calling if every realigned BAM of the pool exists")
    .lines(config.hooks.preamble.iter().cloned())
    .line(format!(
        "{} call {} {}",
        upstream.poolrunner_bin,
        layout.parentdir().display(),
        request.pool
    ))
}

/// Writes and submits the realignment job of one sample.
///
/// The job runs from the script directory, so both inputs are resolved to
/// absolute paths first; a missing input fails here rather than in GATK.
pub fn submit_realign<S: Scheduler + ?Sized>(
    scheduler: &S,
    layout: &PipelineLayout,
    request: &RealignRequest<'_>,
    config: &Config,
) -> Result<(PathBuf, JobId)> {
    let dupfile = resolve_input(request.dupfile)?;
    let reference = resolve_input(request.reference)?;
    let request = RealignRequest {
        dupfile: &dupfile,
        reference: &reference,
        ..request.clone()
    };

    let script = realign_job(layout, &request, config);
    let path = script.write_to(&layout.upstream_script_dir(request.pool))?;
    let job = scheduler.submit(&path)?;

    info!("Submitted {} as job {}", script.name(), job);
    Ok((path, job))
}

fn resolve_input(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| PipelineError::Input {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
