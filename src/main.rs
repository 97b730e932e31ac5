//! PoolRunner CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Called from the tail of every realignment job
//! poolrunner call /scratch/run1 poolA
//!
//! # Report readiness without reserving or submitting
//! poolrunner check /scratch/run1 poolA
//!
//! # Pre-split a reference into region files
//! poolrunner partition /refs/genome.fa --count 100
//!
//! # Write and submit the realignment job of one sample
//! poolrunner realign /scratch/run1/poolA s1 s1_dedup.bam /refs/genome.fa
//!
//! # Preview a wave
//! poolrunner --dry-run call /scratch/run1 poolA
//! ```
//!
//! Exit status is 0 when the wave was submitted, when the pool is not
//! ready yet and when another invocation already launched it; 1 on errors.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{error, info};

use poolrunner::coordination::{
    build_reservation, invocation_id, PrerequisiteChecker, Readiness, WaveSummary,
};
use poolrunner::jobs::{submit_realign, RealignRequest};
use poolrunner::partition::ensure_partitions;
use poolrunner::scheduler::DryRunScheduler;
use poolrunner::{
    Config, Orchestrator, PipelineLayout, PoolMetadata, Scheduler, SlurmScheduler, WaveOutcome,
    APP_NAME, VERSION,
};

#[derive(Debug, Parser)]
#[command(name = "poolrunner", version, about = "Slurm fan-out/fan-in for pooled variant calling")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <parentdir>/poolrunner.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write scripts and log what would be submitted, without sbatch
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch variant calling for a pool if every upstream job finished
    Call {
        parentdir: PathBuf,
        pool: String,
        /// Reservation owner (default: $SLURM_JOB_ID)
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Report whether a pool is ready, without reserving or submitting
    Check {
        parentdir: PathBuf,
        pool: String,
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Split a reference into region files
    Partition {
        reference: PathBuf,
        /// Number of partitions (default: from config)
        #[arg(long)]
        count: Option<usize>,
    },
    /// Write and submit the indel-realignment job of one sample
    Realign {
        pooldir: PathBuf,
        sample: String,
        dupfile: PathBuf,
        reference: PathBuf,
    },
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "{} [{}] {}", now, record.level(), record.args())
                }
                _ => writeln!(buf, "{} {}", now, record.args()),
            }
        })
        .init();
}

fn scheduler_for(config: &Config, dry_run: bool) -> Box<dyn Scheduler> {
    let slurm = SlurmScheduler::from_config(&config.scheduler);
    if dry_run {
        Box::new(DryRunScheduler::new(slurm))
    } else {
        Box::new(slurm)
    }
}

fn print_summary(summary: &WaveSummary) {
    println!(
        "{} {}: {} jobs over {} partitions",
        "Submitted".green().bold(),
        summary.pool,
        summary.job_count(),
        summary.partitions
    );
    for wave in &summary.waves {
        println!(
            "  {:8} {} calling jobs, merge job {}",
            wave.caller.to_string(),
            wave.jobs.len(),
            wave.merge
        );
    }
}

fn call(cli: &Cli, parentdir: &Path, pool: &str, job_id: Option<&str>) -> poolrunner::Result<()> {
    let parentdir = &parentdir.canonicalize()?;
    let config = Config::resolve(parentdir, cli.config.as_deref())?;
    let layout = PipelineLayout::new(parentdir, &config.upstream);
    let metadata = PoolMetadata::load(parentdir)?;
    let owner = invocation_id(job_id);
    info!("Invocation {} for pool {}", owner, pool);

    let scheduler = scheduler_for(&config, cli.dry_run);
    let reservation = build_reservation(&config.reservation, layout.clone(), cli.dry_run);

    let outcome = Orchestrator::new(&config, &layout, &metadata, scheduler.as_ref(), reservation.as_ref())
        .run(pool, &owner)?;

    match outcome {
        WaveOutcome::Submitted(summary) => print_summary(&summary),
        WaveOutcome::NotReady(reason) => {
            println!("{} {}: {}", "Not ready".yellow().bold(), pool, reason)
        }
        WaveOutcome::RaceLost { holder } => println!(
            "{} {}: already launched by {}",
            "Skipped".yellow().bold(),
            pool,
            holder.as_deref().unwrap_or("another invocation")
        ),
    }
    Ok(())
}

fn check(cli: &Cli, parentdir: &Path, pool: &str, job_id: Option<&str>) -> poolrunner::Result<()> {
    let parentdir = &parentdir.canonicalize()?;
    let config = Config::resolve(parentdir, cli.config.as_deref())?;
    let layout = PipelineLayout::new(parentdir, &config.upstream);
    let metadata = PoolMetadata::load(parentdir)?;
    let scheduler = SlurmScheduler::from_config(&config.scheduler);

    let checker = PrerequisiteChecker::new(
        &scheduler,
        &layout,
        &config.upstream.tag,
        config.scheduler.accounting_retry,
    );
    match checker.check(pool, metadata.samples(pool)?, &invocation_id(job_id))? {
        Readiness::Ready(bams) => {
            println!("{} {}: {} realigned BAMs", "Ready".green().bold(), pool, bams.len());
            for bam in bams {
                println!("  {}", bam.display());
            }
        }
        Readiness::NotReady(reason) => {
            println!("{} {}: {}", "Not ready".yellow().bold(), pool, reason)
        }
    }
    Ok(())
}

fn partition(cli: &Cli, reference: &Path, count: Option<usize>) -> poolrunner::Result<()> {
    let config_dir = reference.parent().unwrap_or_else(|| Path::new("."));
    let config = Config::resolve(config_dir, cli.config.as_deref())?;
    let count = count.unwrap_or(config.partitions.count);

    let set = ensure_partitions(reference, count)?;
    println!(
        "{} {} region files in {}",
        "Partitioned".green().bold(),
        set.len(),
        set.dir.display()
    );
    Ok(())
}

fn realign(
    cli: &Cli,
    pooldir: &Path,
    sample: &str,
    dupfile: &Path,
    reference: &Path,
) -> poolrunner::Result<()> {
    let pooldir = pooldir.canonicalize()?;
    let parentdir = pooldir.parent().unwrap_or_else(|| Path::new("/"));
    let config = Config::resolve(parentdir, cli.config.as_deref())?;
    let (layout, pool) = PipelineLayout::from_pool_dir(&pooldir, &config.upstream)?;
    let scheduler = scheduler_for(&config, cli.dry_run);

    let request = RealignRequest {
        pool: &pool,
        sample,
        dupfile,
        reference,
    };
    let (script, job) = submit_realign(scheduler.as_ref(), &layout, &request, &config)?;
    println!(
        "{} {} as job {}",
        "Submitted".green().bold(),
        script.display(),
        job
    );
    Ok(())
}

/// Main application entry point.
fn run(cli: &Cli) -> poolrunner::Result<()> {
    info!("{} v{}", APP_NAME, VERSION);
    if cli.dry_run {
        info!("Mode: DRY RUN (nothing is submitted)");
    }

    match &cli.command {
        Command::Call {
            parentdir,
            pool,
            job_id,
        } => call(cli, parentdir, pool, job_id.as_deref()),
        Command::Check {
            parentdir,
            pool,
            job_id,
        } => check(cli, parentdir, pool, job_id.as_deref()),
        Command::Partition { reference, count } => partition(cli, reference, *count),
        Command::Realign {
            pooldir,
            sample,
            dupfile,
            reference,
        } => realign(cli, pooldir, sample, dupfile, reference),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
