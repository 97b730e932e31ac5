//! Fan-In Reservation
//!
//! Several upstream jobs of a pool can finish at nearly the same moment
//! and each re-enters the orchestrator. The reservation picks exactly one
//! of them to submit the downstream wave; the others stand down.
//!
//! # Backends
//!
//! - [`ExclusiveFileReservation`]: atomic create-if-absent of the
//!   reservation file; the filesystem decides the winner.
//! - [`JitteredFileReservation`]: write the owner id, sleep a random
//!   jitter, re-read; the last writer wins. Kept for compatibility with
//!   pipelines already relying on it.
//! - [`DryRunReservation`]: reports what would happen without writing.
//!
//! A reservation file is never removed: its presence is what makes a
//! second trigger for the same pool a no-op.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use rand::Rng;

use crate::config::{ReservationBackend, ReservationConfig};
use crate::error::Result;
use crate::pipeline::PipelineLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Won,
    /// Someone else holds the reservation. `holder` is the recorded
    /// owner, when readable.
    Lost { holder: Option<String> },
}

pub trait Reservation {
    fn try_acquire(&self, pool: &str, owner: &str) -> Result<Acquisition>;
}

/// Builds the configured backend.
pub fn build_reservation(
    config: &ReservationConfig,
    layout: PipelineLayout,
    dry_run: bool,
) -> Box<dyn Reservation> {
    if dry_run {
        return Box::new(DryRunReservation::new(layout));
    }
    match config.backend {
        ReservationBackend::Exclusive => Box::new(ExclusiveFileReservation::new(layout)),
        ReservationBackend::Jittered => Box::new(JitteredFileReservation::new(
            layout,
            Duration::from_millis(config.jitter_min_ms),
            Duration::from_millis(config.jitter_max_ms),
        )),
    }
}

pub struct ExclusiveFileReservation {
    layout: PipelineLayout,
}

impl ExclusiveFileReservation {
    pub fn new(layout: PipelineLayout) -> Self {
        Self { layout }
    }
}

impl Reservation for ExclusiveFileReservation {
    fn try_acquire(&self, pool: &str, owner: &str) -> Result<Acquisition> {
        let path = self.layout.reservation_path(pool);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", owner)?;
                file.sync_all()?;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = read_holder(&path)?;
                debug!("Reservation for {} already held by {:?}", pool, holder);
                return Ok(Acquisition::Lost { holder });
            }
            Err(e) => return Err(e.into()),
        }

        let holder = read_holder(&path)?;
        if holder.as_deref() == Some(owner) {
            info!("Reserved {} for {}", pool, owner);
            Ok(Acquisition::Won)
        } else {
            Ok(Acquisition::Lost { holder })
        }
    }
}

pub struct JitteredFileReservation {
    layout: PipelineLayout,
    min: Duration,
    max: Duration,
}

impl JitteredFileReservation {
    pub fn new(layout: PipelineLayout, min: Duration, max: Duration) -> Self {
        Self { layout, min, max }
    }

    fn jitter(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let millis = rand::rng().random_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(millis as u64)
    }
}

impl Reservation for JitteredFileReservation {
    fn try_acquire(&self, pool: &str, owner: &str) -> Result<Acquisition> {
        let path = self.layout.reservation_path(pool);
        if path.exists() {
            let holder = read_holder(&path)?;
            debug!("Reservation for {} already held by {:?}", pool, holder);
            return Ok(Acquisition::Lost { holder });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, format!("{}\n", owner))?;

        let jitter = self.jitter();
        debug!("Waiting {:?} before confirming reservation of {}", jitter, pool);
        thread::sleep(jitter);

        let holder = read_holder(&path)?;
        if holder.as_deref() == Some(owner) {
            info!("Reserved {} for {}", pool, owner);
            Ok(Acquisition::Won)
        } else {
            Ok(Acquisition::Lost { holder })
        }
    }
}

pub struct DryRunReservation {
    layout: PipelineLayout,
}

impl DryRunReservation {
    pub fn new(layout: PipelineLayout) -> Self {
        Self { layout }
    }
}

impl Reservation for DryRunReservation {
    fn try_acquire(&self, pool: &str, owner: &str) -> Result<Acquisition> {
        let path = self.layout.reservation_path(pool);
        if path.exists() {
            return Ok(Acquisition::Lost {
                holder: read_holder(&path)?,
            });
        }
        info!("[DRY RUN] Would reserve {} for {} at {}", pool, owner, path.display());
        Ok(Acquisition::Won)
    }
}

/// First whitespace-separated token of the reservation file.
fn read_holder(path: &std::path::Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.split_whitespace().next().map(str::to_string)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
