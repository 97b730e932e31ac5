//! Job Script Module
//!
//! Generation of every batch script the pipeline submits.
//!
//! - [`script`]: resource requests and the generic `#SBATCH` renderer
//! - [`commands`]: per-partition calling jobs and the merge job
//! - [`realign`]: upstream realignment jobs that re-enter the orchestrator

pub mod commands;
pub mod realign;
pub mod script;

pub use commands::{calling_job, merge_job, Caller, CallingContext};
pub use realign::{realign_job, submit_realign, upstream_job_name, RealignRequest};
pub use script::{JobScript, ResourceRequest};
