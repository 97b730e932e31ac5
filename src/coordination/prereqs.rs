//! Prerequisite Checker
//!
//! Decides from the filesystem and the scheduler alone whether every
//! upstream realignment job of a pool has finished successfully.
//!
//! # Checks, in order
//!
//! 1. one upstream script per sample exists
//! 2. each script has a `<stem>_<jobid>.out` log (most recent wins)
//! 3. no upstream job of the pool other than the caller is still queued,
//!    matched by exact job name
//! 4. accounting reports every logged job as completed with exit code 0
//! 5. every sample has an indexed realigned BAM
//!
//! Incomplete counts and in-flight jobs are expected while siblings are
//! still running and come back as [`Readiness::NotReady`]. Definite
//! failures are errors.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info};

use super::{NotReady, Readiness, UpstreamItem};
use crate::error::{PipelineError, Result};
use crate::jobs::upstream_job_name;
use crate::pipeline::metadata::POOL_SAMPLES_FILE;
use crate::pipeline::PipelineLayout;
use crate::scheduler::{query_status, JobId, RetryPolicy, Scheduler};

/// A sample's upstream script and the log of its latest run.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamJob {
    pub sample: String,
    pub script: PathBuf,
    pub output: Option<(PathBuf, JobId)>,
}

pub struct PrerequisiteChecker<'a, S: Scheduler + ?Sized> {
    scheduler: &'a S,
    layout: &'a PipelineLayout,
    tag: &'a str,
    retry: RetryPolicy,
}

impl<'a, S: Scheduler + ?Sized> PrerequisiteChecker<'a, S> {
    pub fn new(scheduler: &'a S, layout: &'a PipelineLayout, tag: &'a str, retry: RetryPolicy) -> Self {
        Self {
            scheduler,
            layout,
            tag,
            retry,
        }
    }

    /// Runs every check for `pool`.
    ///
    /// `own_job` is excluded from the queue check: the invocation usually
    /// runs as the tail of one of the upstream jobs.
    pub fn check(&self, pool: &str, samples: &[String], own_job: &JobId) -> Result<Readiness> {
        if samples.is_empty() {
            return Err(PipelineError::Metadata(format!(
                "pool '{}' has no samples in {}",
                pool, POOL_SAMPLES_FILE
            )));
        }
        let expected = samples.len();

        let upstream = self.discover(pool, samples)?;
        let scripts = upstream.iter().filter(|job| job.script.is_file()).count();
        if scripts < expected {
            return Ok(incomplete(UpstreamItem::Scripts, scripts, expected));
        }

        let logged: Vec<(&UpstreamJob, &JobId)> = upstream
            .iter()
            .filter_map(|job| job.output.as_ref().map(|(_, id)| (job, id)))
            .collect();
        if logged.len() < expected {
            return Ok(incomplete(UpstreamItem::Outputs, logged.len(), expected));
        }

        // The substring query also returns jobs of pools named `<pool>-...`.
        let names: HashSet<String> = samples
            .iter()
            .map(|sample| upstream_job_name(pool, sample, self.tag))
            .collect();
        let pool_prefix = format!("{}-", pool);
        let queued = self.scheduler.queue(&[pool_prefix.as_str(), self.tag])?;
        if let Some(job) = queued
            .into_iter()
            .find(|job| &job.id != own_job && names.contains(&job.name))
        {
            debug!("{} still queued as {} ({})", job.name, job.id, job.state);
            return Ok(Readiness::NotReady(NotReady::UpstreamInFlight {
                job: job.id,
                name: job.name,
            }));
        }

        for (job, id) in &logged {
            if *id == own_job {
                debug!("Skipping accounting for own job {}", id);
                continue;
            }
            let status = query_status(self.scheduler, id, &self.retry)?;
            if !status.is_success() {
                return Err(PipelineError::UpstreamFailed {
                    job: (*id).clone(),
                    script: job.script.clone(),
                    status,
                });
            }
        }

        let artifacts = self.artifacts(pool, samples);
        if artifacts.len() < expected {
            return Ok(incomplete(UpstreamItem::Artifacts, artifacts.len(), expected));
        }

        info!("All {} upstream jobs of {} completed", expected, pool);
        Ok(Readiness::Ready(artifacts))
    }

    /// Locates each sample's script and most recent log.
    pub fn discover(&self, pool: &str, samples: &[String]) -> Result<Vec<UpstreamJob>> {
        let dir = self.layout.upstream_script_dir(pool);
        let logs = list_outputs(&dir)?;

        Ok(samples
            .iter()
            .map(|sample| {
                let stem = upstream_job_name(pool, sample, self.tag);
                UpstreamJob {
                    sample: sample.clone(),
                    script: dir.join(format!("{}.sh", stem)),
                    output: most_recent_output(&logs, &stem),
                }
            })
            .collect())
    }

    /// Realigned BAMs, in sample order, whose index is present.
    fn artifacts(&self, pool: &str, samples: &[String]) -> Vec<PathBuf> {
        samples
            .iter()
            .map(|sample| self.layout.realigned_bam(pool, sample))
            .filter(|bam| has_index(bam))
            .collect()
    }
}

fn incomplete(missing: UpstreamItem, found: usize, expected: usize) -> Readiness {
    debug!("{}: {} of {} present", missing, found, expected);
    Readiness::NotReady(NotReady::IncompleteUpstream {
        missing,
        found,
        expected,
    })
}

/// `x.bam` is indexed by `x.bai` (GATK) or `x.bam.bai` (samtools).
fn has_index(bam: &Path) -> bool {
    let short = bam.with_extension("bai");
    let long = PathBuf::from(format!("{}.bai", bam.display()));
    short.is_file() || long.is_file()
}

fn list_outputs(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut outputs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("out") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        outputs.push((path, modified));
    }
    Ok(outputs)
}

/// Picks the newest `<stem>_<digits>.out`, by mtime then job id.
fn most_recent_output(logs: &[(PathBuf, SystemTime)], stem: &str) -> Option<(PathBuf, JobId)> {
    logs.iter()
        .filter_map(|(path, modified)| {
            let id = JobId::from_output_file(path)?;
            if path.file_name()?.to_str()? != format!("{}_{}.out", stem, id) {
                return None;
            }
            let numeric: u64 = id.as_str().parse().ok()?;
            Some((modified, numeric, path, id))
        })
        .max_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)))
        .map(|(_, _, path, id)| (path.clone(), id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use crate::scheduler::fake::FakeScheduler;
    use crate::scheduler::JobStatus;
    use std::time::Duration;
    use tempfile::tempdir;

    const COMPLETED: &str = "Job ID: 1\nState: COMPLETED (exit code 0)\n";

    struct Fixture {
        _temp: tempfile::TempDir,
        layout: PipelineLayout,
        samples: Vec<String>,
    }

    impl Fixture {
        fn new(samples: &[&str]) -> Self {
            let temp = tempdir().unwrap();
            let layout = PipelineLayout::new(temp.path(), &UpstreamConfig::default());
            fs::create_dir_all(layout.upstream_script_dir("poolA")).unwrap();
            fs::create_dir_all(layout.artifact_dir("poolA")).unwrap();
            Self {
                _temp: temp,
                layout,
                samples: samples.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn stem(&self, sample: &str) -> String {
            upstream_job_name("poolA", sample, "indelRealign")
        }

        fn script(&self, sample: &str) {
            let dir = self.layout.upstream_script_dir("poolA");
            fs::write(dir.join(format!("{}.sh", self.stem(sample))), "#!/bin/bash\n").unwrap();
        }

        fn log(&self, sample: &str, job: u64) {
            let dir = self.layout.upstream_script_dir("poolA");
            fs::write(dir.join(format!("{}_{}.out", self.stem(sample), job)), "done\n").unwrap();
        }

        fn artifact(&self, sample: &str) {
            let bam = self.layout.realigned_bam("poolA", sample);
            fs::write(&bam, "").unwrap();
            fs::write(bam.with_extension("bai"), "").unwrap();
        }

        /// Scripts, logs and artifacts for every sample; job ids from 100.
        fn complete(&self, scheduler: &FakeScheduler) {
            for (i, sample) in self.samples.iter().enumerate() {
                self.script(sample);
                self.log(sample, 100 + i as u64);
                self.artifact(sample);
                scheduler.set_accounting(&JobId::new((100 + i).to_string()), COMPLETED);
            }
        }

        fn checker<'a>(&'a self, scheduler: &'a FakeScheduler) -> PrerequisiteChecker<'a, FakeScheduler> {
            let retry = RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            };
            PrerequisiteChecker::new(scheduler, &self.layout, "indelRealign", retry)
        }
    }

    #[test]
    fn test_ready_returns_bams_in_sample_order() {
        let fixture = Fixture::new(&["s2", "s1", "s3"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("102"))
            .unwrap();

        let expected: Vec<PathBuf> = ["s2", "s1", "s3"]
            .iter()
            .map(|s| fixture.layout.realigned_bam("poolA", s))
            .collect();
        assert_eq!(readiness, Readiness::Ready(expected));
    }

    #[test]
    fn test_missing_script_is_not_ready() {
        let fixture = Fixture::new(&["s1", "s2", "s3"]);
        let scheduler = FakeScheduler::new(1);
        fixture.script("s1");
        fixture.script("s2");

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("7"))
            .unwrap();

        assert_eq!(
            readiness,
            Readiness::NotReady(NotReady::IncompleteUpstream {
                missing: UpstreamItem::Scripts,
                found: 2,
                expected: 3,
            })
        );
    }

    #[test]
    fn test_missing_log_is_not_ready() {
        let fixture = Fixture::new(&["s1", "s2"]);
        let scheduler = FakeScheduler::new(1);
        fixture.script("s1");
        fixture.script("s2");
        fixture.log("s1", 100);

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("100"))
            .unwrap();

        assert!(matches!(
            readiness,
            Readiness::NotReady(NotReady::IncompleteUpstream {
                missing: UpstreamItem::Outputs,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_queued_sibling_is_in_flight() {
        let fixture = Fixture::new(&["s1", "s2"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);
        scheduler.push_queued("100", "poolA-s1_indelRealign");
        scheduler.push_queued("101", "poolA-s2_indelRealign");

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("101"))
            .unwrap();

        assert_eq!(
            readiness,
            Readiness::NotReady(NotReady::UpstreamInFlight {
                job: JobId::new("100"),
                name: "poolA-s1_indelRealign".to_string(),
            })
        );
    }

    #[test]
    fn test_own_job_and_other_pools_ignored_in_queue() {
        let fixture = Fixture::new(&["s1", "s2"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);
        scheduler.push_queued("101", "poolA-s2_indelRealign");
        scheduler.push_queued("900", "poolAB-s9_indelRealign");
        scheduler.push_queued("901", "poolA-varscan_bedfile_0");

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("101"))
            .unwrap();

        assert!(matches!(readiness, Readiness::Ready(_)));
        assert_eq!(scheduler.accounting_calls(&JobId::new("101")), 0);
    }

    #[test]
    fn test_hyphenated_sibling_pool_not_in_flight() {
        let fixture = Fixture::new(&["s1"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);
        scheduler.push_queued("900", "poolA-2-s7_indelRealign");

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("555"))
            .unwrap();

        assert_eq!(
            readiness,
            Readiness::Ready(vec![fixture.layout.realigned_bam("poolA", "s1")])
        );
    }

    #[test]
    fn test_pool_without_samples_is_error() {
        let fixture = Fixture::new(&[]);
        let scheduler = FakeScheduler::new(1);

        let err = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("555"))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Metadata(_)));
        assert!(err.to_string().contains("poolsamps.json"));
    }

    #[test]
    fn test_failed_upstream_is_error() {
        let fixture = Fixture::new(&["s1", "s2"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);
        scheduler.set_accounting(&JobId::new("100"), "State: FAILED (exit code 1)\n");

        let err = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("101"))
            .unwrap_err();

        match err {
            PipelineError::UpstreamFailed { job, status, script } => {
                assert_eq!(job, JobId::new("100"));
                assert_eq!(
                    status,
                    JobStatus::Failed {
                        state: "FAILED".to_string(),
                        exit_code: Some(1)
                    }
                );
                assert!(script.ends_with("poolA-s1_indelRealign.sh"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_accounting_lag_is_retried() {
        let fixture = Fixture::new(&["s1"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);
        scheduler.set_accounting_after(&JobId::new("100"), 2, COMPLETED);

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("555"))
            .unwrap();

        assert!(matches!(readiness, Readiness::Ready(_)));
        assert_eq!(scheduler.accounting_calls(&JobId::new("100")), 3);
    }

    #[test]
    fn test_accounting_unavailable_is_error() {
        let fixture = Fixture::new(&["s1"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);
        scheduler.set_accounting_after(&JobId::new("100"), 5, COMPLETED);

        let err = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("555"))
            .unwrap_err();

        assert!(matches!(err, PipelineError::AccountingUnavailable { attempts: 3, .. }));
    }

    #[test]
    fn test_missing_index_is_not_ready() {
        let fixture = Fixture::new(&["s1", "s2"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);
        fs::remove_file(fixture.layout.realigned_bam("poolA", "s2").with_extension("bai")).unwrap();

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("555"))
            .unwrap();

        assert!(matches!(
            readiness,
            Readiness::NotReady(NotReady::IncompleteUpstream {
                missing: UpstreamItem::Artifacts,
                found: 1,
                expected: 2,
            })
        ));
    }

    #[test]
    fn test_samtools_style_index_accepted() {
        let fixture = Fixture::new(&["s1"]);
        let scheduler = FakeScheduler::new(1);
        fixture.complete(&scheduler);
        let bam = fixture.layout.realigned_bam("poolA", "s1");
        fs::rename(bam.with_extension("bai"), format!("{}.bai", bam.display())).unwrap();

        let readiness = fixture
            .checker(&scheduler)
            .check("poolA", &fixture.samples, &JobId::new("555"))
            .unwrap();
        assert!(matches!(readiness, Readiness::Ready(_)));
    }

    #[test]
    fn test_most_recent_output_prefers_latest_run() {
        let now = SystemTime::now();
        let earlier = now - Duration::from_secs(60);
        let logs = vec![
            (PathBuf::from("poolA-s1_indelRealign_100.out"), earlier),
            (PathBuf::from("poolA-s1_indelRealign_250.out"), now),
            (PathBuf::from("poolA-s10_indelRealign_300.out"), now),
            (PathBuf::from("poolA-s1_indelRealign_notes.out"), now),
        ];

        let (path, id) = most_recent_output(&logs, "poolA-s1_indelRealign").unwrap();
        assert_eq!(id, JobId::new("250"));
        assert_eq!(path, PathBuf::from("poolA-s1_indelRealign_250.out"));

        assert!(most_recent_output(&logs, "poolA-s2_indelRealign").is_none());
    }

    #[test]
    fn test_most_recent_output_ties_broken_by_job_id() {
        let now = SystemTime::now();
        let logs = vec![
            (PathBuf::from("x_indelRealign_99.out"), now),
            (PathBuf::from("x_indelRealign_100.out"), now),
        ];
        let (_, id) = most_recent_output(&logs, "x_indelRealign").unwrap();
        assert_eq!(id, JobId::new("100"));
    }
}
