//! PoolRunner - Slurm Fan-Out/Fan-In for Pooled Variant Calling
//!
//! Launches the variant-calling stage of a pooled-sequencing pipeline on
//! a Slurm cluster. Each sample's realignment job re-enters PoolRunner
//! when it finishes; the last one to find every sibling complete submits
//! one calling job per (caller, genome partition) and a merge job per
//! caller that waits on them.
//!
//! # Architecture
//!
//! - [`coordination`]: prerequisite checks, reservation and the wave state machine
//! - [`scheduler`]: the [`Scheduler`] trait and its Slurm and dry-run backends
//! - [`jobs`]: batch script generation
//! - [`partition`]: reference splitting into BED files
//! - [`pipeline`]: directory layout and pool metadata
//! - [`config`]: optional YAML configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use poolrunner::coordination::{invocation_id, ExclusiveFileReservation, Orchestrator};
//! use poolrunner::{Config, PipelineLayout, PoolMetadata, SlurmScheduler};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let parentdir = Path::new("/scratch/run1");
//!     let config = Config::resolve(parentdir, None)?;
//!     let layout = PipelineLayout::new(parentdir, &config.upstream);
//!     let metadata = PoolMetadata::load(parentdir)?;
//!
//!     let scheduler = SlurmScheduler::from_config(&config.scheduler);
//!     let reservation = ExclusiveFileReservation::new(layout.clone());
//!
//!     let outcome = Orchestrator::new(&config, &layout, &metadata, &scheduler, &reservation)
//!         .run("poolA", &invocation_id(None))?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordination;
pub mod error;
pub mod jobs;
pub mod partition;
pub mod pipeline;
pub mod scheduler;

// Re-export commonly used types
pub use config::Config;
pub use coordination::{Orchestrator, WaveOutcome};
pub use error::{PipelineError, Result};
pub use pipeline::{PipelineLayout, PoolMetadata};
pub use scheduler::{JobId, Scheduler, SlurmScheduler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "PoolRunner";
