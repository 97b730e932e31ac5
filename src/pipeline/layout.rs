//! Directory Layout
//!
//! Every path the orchestrator reads or writes is derived here from the
//! parent directory and a pool name, so concurrent invocations agree on
//! names without talking to each other.
//!
//! ```text
//! <parentdir>/
//!   poolsamps.json  poolref.json  ploidy.json
//!   <pool>/
//!     04_realign/<sample>_realigned_reads.bam(.bai)
//!     shfiles/05_indelRealign_shfiles/<pool>-<sample>_indelRealign.sh
//!     shfiles/variant_calling/<pool>_variant_calling_reservation.txt
//!     <caller>/<pool>_<caller>_bedfile_<n>.vcf
//! ```

use std::path::{Path, PathBuf};

use crate::config::UpstreamConfig;
use crate::error::{PipelineError, Result};

/// Script directory shared by the calling and merge jobs of a pool.
const CALLING_SCRIPT_DIR: &str = "variant_calling";

#[derive(Debug, Clone)]
pub struct PipelineLayout {
    parentdir: PathBuf,
    upstream_script_dir: String,
    artifact_dir: String,
}

impl PipelineLayout {
    pub fn new(parentdir: impl Into<PathBuf>, upstream: &UpstreamConfig) -> Self {
        Self {
            parentdir: parentdir.into(),
            upstream_script_dir: upstream.script_dir.clone(),
            artifact_dir: upstream.artifact_dir.clone(),
        }
    }

    /// Splits a pool directory into its layout and pool name.
    pub fn from_pool_dir(pooldir: &Path, upstream: &UpstreamConfig) -> Result<(Self, String)> {
        let pool = pooldir
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                PipelineError::Metadata(format!("'{}' is not a pool directory", pooldir.display()))
            })?;
        let parentdir = pooldir.parent().unwrap_or_else(|| Path::new("."));

        Ok((Self::new(parentdir, upstream), pool.to_string()))
    }

    pub fn parentdir(&self) -> &Path {
        &self.parentdir
    }

    pub fn pool_dir(&self, pool: &str) -> PathBuf {
        self.parentdir.join(pool)
    }

    pub fn upstream_script_dir(&self, pool: &str) -> PathBuf {
        self.pool_dir(pool).join("shfiles").join(&self.upstream_script_dir)
    }

    pub fn artifact_dir(&self, pool: &str) -> PathBuf {
        self.pool_dir(pool).join(&self.artifact_dir)
    }

    pub fn calling_script_dir(&self, pool: &str) -> PathBuf {
        self.pool_dir(pool).join("shfiles").join(CALLING_SCRIPT_DIR)
    }

    pub fn reservation_path(&self, pool: &str) -> PathBuf {
        self.calling_script_dir(pool)
            .join(format!("{}_{}_reservation.txt", pool, CALLING_SCRIPT_DIR))
    }

    pub fn caller_output_dir(&self, pool: &str, program: &str) -> PathBuf {
        self.pool_dir(pool).join(program)
    }

    /// Alignment produced by the realignment stage for one sample.
    pub fn realigned_bam(&self, pool: &str, sample: &str) -> PathBuf {
        self.artifact_dir(pool)
            .join(format!("{}_realigned_reads.bam", sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> PipelineLayout {
        PipelineLayout::new("/data/run1", &UpstreamConfig::default())
    }

    #[test]
    fn test_reservation_path_depends_only_on_pool() {
        let a = layout().reservation_path("poolA");
        let b = layout().reservation_path("poolA");

        assert_eq!(a, b);
        assert_eq!(
            a,
            PathBuf::from("/data/run1/poolA/shfiles/variant_calling/poolA_variant_calling_reservation.txt")
        );
        assert_ne!(a, layout().reservation_path("poolB"));
    }

    #[test]
    fn test_upstream_paths() {
        let layout = layout();
        assert_eq!(
            layout.upstream_script_dir("poolA"),
            PathBuf::from("/data/run1/poolA/shfiles/05_indelRealign_shfiles")
        );
        assert_eq!(
            layout.realigned_bam("poolA", "s1"),
            PathBuf::from("/data/run1/poolA/04_realign/s1_realigned_reads.bam")
        );
    }

    #[test]
    fn test_from_pool_dir() {
        let (layout, pool) =
            PipelineLayout::from_pool_dir(Path::new("/data/run1/poolA"), &UpstreamConfig::default())
                .unwrap();

        assert_eq!(pool, "poolA");
        assert_eq!(layout.parentdir(), Path::new("/data/run1"));
    }

    #[test]
    fn test_from_pool_dir_rejects_root() {
        assert!(PipelineLayout::from_pool_dir(Path::new("/"), &UpstreamConfig::default()).is_err());
    }
}
