//! Pipeline Filesystem Module
//!
//! The pipeline keeps no registry of its own; everything is reconstructed
//! from the parent directory on each invocation.
//!
//! - [`layout`]: path derivation for pools, stages and reservations
//! - [`metadata`]: pool -> samples / reference / ploidy mappings

pub mod layout;
pub mod metadata;

pub use layout::PipelineLayout;
pub use metadata::PoolMetadata;
