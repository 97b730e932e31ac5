//! Pool Metadata
//!
//! Read-only view of the mappings written by the pipeline setup step:
//! `poolsamps.json` (pool -> samples), `poolref.json` (pool -> reference)
//! and `ploidy.json` (pool -> ploidy). The latter is optional and only
//! needed by callers that model pool size.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::de::DeserializeOwned;

use crate::error::{PipelineError, Result};

pub const POOL_SAMPLES_FILE: &str = "poolsamps.json";
pub const POOL_REF_FILE: &str = "poolref.json";
pub const PLOIDY_FILE: &str = "ploidy.json";

#[derive(Debug, Clone, Default)]
pub struct PoolMetadata {
    pool_samples: BTreeMap<String, Vec<String>>,
    pool_ref: BTreeMap<String, PathBuf>,
    ploidy: BTreeMap<String, u32>,
}

impl PoolMetadata {
    /// Loads the mappings from the pipeline parent directory.
    pub fn load(parentdir: &Path) -> Result<Self> {
        let pool_samples = read_json(&parentdir.join(POOL_SAMPLES_FILE))?;
        let pool_ref = read_json(&parentdir.join(POOL_REF_FILE))?;

        let ploidy_path = parentdir.join(PLOIDY_FILE);
        let ploidy = if ploidy_path.exists() {
            read_json(&ploidy_path)?
        } else {
            debug!("No {} in {}", PLOIDY_FILE, parentdir.display());
            BTreeMap::new()
        };

        let metadata = Self {
            pool_samples,
            pool_ref,
            ploidy,
        };
        info!(
            "Loaded metadata for {} pools from {}",
            metadata.pool_samples.len(),
            parentdir.display()
        );
        Ok(metadata)
    }

    pub fn samples(&self, pool: &str) -> Result<&[String]> {
        self.pool_samples
            .get(pool)
            .map(Vec::as_slice)
            .ok_or_else(|| unknown_pool(pool, POOL_SAMPLES_FILE))
    }

    pub fn reference(&self, pool: &str) -> Result<&Path> {
        self.pool_ref
            .get(pool)
            .map(PathBuf::as_path)
            .ok_or_else(|| unknown_pool(pool, POOL_REF_FILE))
    }

    pub fn ploidy(&self, pool: &str) -> Result<u32> {
        self.ploidy
            .get(pool)
            .copied()
            .ok_or_else(|| unknown_pool(pool, PLOIDY_FILE))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        PipelineError::Metadata(format!("cannot read '{}': {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn unknown_pool(pool: &str, file: &str) -> PipelineError {
    PipelineError::Metadata(format!("pool '{}' not found in {}", pool, file))
}
