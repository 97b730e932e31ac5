//! Caller Commands
//!
//! Builds the per-partition calling jobs and the per-caller merge job.
//!
//! Each calling job runs one caller over one region file, converts the
//! resulting VCF to a table with GATK `VariantsToTable`, compresses the
//! VCF and finally runs the post-job hooks. The merge job waits on every
//! calling job of its caller via `afterok`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::script::JobScript;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::partition::Partition;
use crate::scheduler::JobId;

/// Variant caller run per partition.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Caller {
    Varscan,
    Crisp,
}

impl Caller {
    pub fn name(&self) -> &'static str {
        match self {
            Caller::Varscan => "varscan",
            Caller::Crisp => "crisp",
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pool-level inputs shared by every calling job of a wave.
#[derive(Debug, Clone)]
pub struct CallingContext<'a> {
    pub pool: &'a str,
    pub reference: &'a Path,
    /// Required by CRISP only.
    pub ploidy: Option<u32>,
    /// Realigned BAMs in sample order.
    pub bams: &'a [PathBuf],
    /// Directory receiving this caller's VCFs and tables.
    pub output_dir: PathBuf,
}

const TABLE_FIELDS: &[&str] = &[
    "CHROM", "POS", "REF", "ALT", "AF", "QUAL", "DP", "CT", "AC", "VT", "EMstats", "HWEstats",
    "VF", "VP", "HP", "MQS", "TYPE", "FILTER",
];

/// Replaces `{key}` placeholders in a configured template.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

pub fn calling_job_name(pool: &str, caller: Caller, index: usize) -> String {
    format!("{}-{}_bedfile_{}", pool, caller, index)
}

pub fn merge_job_name(pool: &str, caller: Caller) -> String {
    format!("{}-combine-{}", pool, caller)
}

/// Builds the calling job for one partition.
pub fn calling_job(
    caller: Caller,
    ctx: &CallingContext<'_>,
    partition: &Partition,
    config: &Config,
) -> Result<JobScript> {
    let vcf = ctx.output_dir.join(format!(
        "{}_{}_bedfile_{}.vcf",
        ctx.pool,
        caller,
        partition.index()
    ));

    let (call_lines, final_vcf, cleanup) = match caller {
        Caller::Varscan => (varscan_lines(ctx, partition, &vcf, config), vcf.clone(), Vec::new()),
        Caller::Crisp => {
            let ploidy = ctx.ploidy.ok_or_else(|| {
                PipelineError::Metadata(format!("no ploidy recorded for pool '{}'", ctx.pool))
            })?;
            crisp_lines(ctx, partition, &vcf, ploidy, config)
        }
    };

    let table = with_suffix(&final_vcf, "_table.txt");
    let mut table_cmd = format!("gatk VariantsToTable --variant {}", final_vcf.display());
    for field in TABLE_FIELDS {
        table_cmd.push_str(" -F ");
        table_cmd.push_str(field);
    }
    table_cmd.push_str(&format!(" -O {} --split-multi-allelic", table.display()));

    let script = JobScript::new(
        calling_job_name(ctx.pool, caller, partition.index()),
        &config.calling.resources,
    )
    .notify(&config.notify)
    .comment(&format!("{} over {}", caller, partition.path().display()))
    .lines(call_lines)
    .blank()
    .comment("vcf -> table, multiallelic sites split over lines")
    .line("module load gatk/4.1.0.0")
    .line(table_cmd)
    .line("module unload gatk")
    .blank()
    .line(format!("cd {}", ctx.output_dir.display()))
    .line(format!("gzip {}", final_vcf.display()))
    .lines(cleanup)
    .blank();

    Ok(with_hooks(script, caller, config))
}

/// Builds the merge job that waits on every calling job of `caller`.
pub fn merge_job(
    caller: Caller,
    pool: &str,
    pooldir: &Path,
    dependencies: &[JobId],
    config: &Config,
) -> JobScript {
    let pooldir = pooldir.display().to_string();
    let command = fill_template(
        &config.merge.command,
        &[("pooldir", &pooldir), ("program", caller.name()), ("pool", pool)],
    );

    let script = JobScript::new(merge_job_name(pool, caller), &config.merge.resources)
        .after_ok(dependencies)
        .notify(&config.notify)
        .lines(config.hooks.preamble.iter().cloned())
        .blank()
        .line(command)
        .blank();

    with_hooks(script, caller, config)
}

fn with_hooks(script: JobScript, caller: Caller, config: &Config) -> JobScript {
    if config.hooks.post_job.is_empty() {
        return script;
    }

    let hooks: Vec<String> = config
        .hooks
        .post_job
        .iter()
        .map(|hook| fill_template(hook, &[("program", caller.name())]))
        .collect();

    script
        .comment("rebalance pending jobs")
        .lines(config.hooks.preamble.iter().cloned())
        .lines(hooks)
}

fn varscan_lines(
    ctx: &CallingContext<'_>,
    partition: &Partition,
    vcf: &Path,
    config: &Config,
) -> Vec<String> {
    let bed = partition.path().display();
    let mut lines = vec!["module load samtools/1.9".to_string()];
    let mut slices = Vec::with_capacity(ctx.bams.len());

    for bam in ctx.bams {
        let sample = bam
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split("_realigned").next())
            .unwrap_or("sample");
        let slice = format!("$SLURM_TMPDIR/{}_realigned_{}.bam", sample, partition.index());
        lines.push(format!("samtools view -b -L {} {} > {}", bed, bam.display(), slice));
        slices.push(slice);
    }

    lines.push(format!(
        "samtools mpileup -B -f {} {} | java -Xmx15g -jar {} mpileup2cns \
--min-coverage 8 --p-value 0.05 --min-var-freq 0.000625 --strand-filter 1 \
--min-freq-for-hom 0.80 --min-avg-qual 20 --output-vcf 1 > {}",
        ctx.reference.display(),
        slices.join(" "),
        config.calling.varscan_jar,
        vcf.display()
    ));
    lines.push("module unload samtools".to_string());
    lines
}

/// Returns the call lines, the VCF handed to `VariantsToTable` and the
/// cleanup lines run after compression.
fn crisp_lines(
    ctx: &CallingContext<'_>,
    partition: &Partition,
    vcf: &Path,
    ploidy: u32,
    config: &Config,
) -> (Vec<String>, PathBuf, Vec<String>) {
    let crisp_dir = &config.calling.crisp_dir;
    let log = with_suffix(vcf, ".log");
    let converted = with_suffix(vcf, "_converted.vcf");
    let bams: Vec<String> = ctx
        .bams
        .iter()
        .map(|bam| format!("--bam {}", bam.display()))
        .collect();

    let lines = vec![
        "module load python/2.7.14".to_string(),
        format!(
            "{}/CRISP {} --ref {} --VCF {} --poolsize {} --mbq 20 --minc 5 --bed {} > {}",
            crisp_dir,
            bams.join(" "),
            ctx.reference.display(),
            vcf.display(),
            ploidy,
            partition.path().display(),
            log.display()
        ),
        "touch $SLURM_TMPDIR/bam_file_list.txt".to_string(),
        format!(
            "{}/scripts/convert_pooled_vcf.py {} $SLURM_TMPDIR/bam_file_list.txt {} > {}",
            crisp_dir,
            vcf.display(),
            ploidy,
            converted.display()
        ),
        "module unload python".to_string(),
    ];
    let cleanup = vec![
        format!("gzip {}", vcf.display()),
        format!("rm {}", log.display()),
    ];

    (lines, converted, cleanup)
}

/// `x/name.vcf` -> `x/name<suffix>`.
fn with_suffix(vcf: &Path, suffix: &str) -> PathBuf {
    let stem = vcf
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    vcf.with_file_name(format!("{}{}", stem, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Region;

    fn partition() -> Partition {
        Partition::new(
            3,
            PathBuf::from("/refs/bedfiles_genome/genome_bedfile_3.bed"),
            vec![Region::new("chr1", 0, 1000)],
        )
    }

    fn bams() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/data/poolA/04_realign/s1_realigned_reads.bam"),
            PathBuf::from("/data/poolA/04_realign/s2_realigned_reads.bam"),
        ]
    }

    fn context(bams: &[PathBuf], ploidy: Option<u32>) -> CallingContext<'_> {
        CallingContext {
            pool: "poolA",
            reference: Path::new("/refs/genome.fa"),
            ploidy,
            bams,
            output_dir: PathBuf::from("/data/poolA/varscan"),
        }
    }

    #[test]
    fn test_caller_serde_names() {
        let callers: Vec<Caller> = serde_yaml::from_str("[varscan, crisp]").unwrap();
        assert_eq!(callers, vec![Caller::Varscan, Caller::Crisp]);
        assert_eq!(Caller::Crisp.to_string(), "crisp");
    }

    #[test]
    fn test_fill_template() {
        let filled = fill_template(
            "combine.py {pooldir} {program} {pool} {unknown}",
            &[("pooldir", "/data/poolA"), ("program", "varscan"), ("pool", "poolA")],
        );
        assert_eq!(filled, "combine.py /data/poolA varscan poolA {unknown}");
    }

    #[test]
    fn test_varscan_job() {
        let bams = bams();
        let script = calling_job(Caller::Varscan, &context(&bams, None), &partition(), &Config::default())
            .unwrap();

        assert_eq!(script.name(), "poolA-varscan_bedfile_3");
        let text = script.render();
        assert!(text.contains("#SBATCH --time=23:59:00"));
        assert!(text.contains(
            "samtools view -b -L /refs/bedfiles_genome/genome_bedfile_3.bed \
/data/poolA/04_realign/s1_realigned_reads.bam > $SLURM_TMPDIR/s1_realigned_3.bam"
        ));
        assert!(text.contains(
            "samtools mpileup -B -f /refs/genome.fa $SLURM_TMPDIR/s1_realigned_3.bam $SLURM_TMPDIR/s2_realigned_3.bam"
        ));
        assert!(text.contains("> /data/poolA/varscan/poolA_varscan_bedfile_3.vcf"));
        assert!(text.contains("-O /data/poolA/varscan/poolA_varscan_bedfile_3_table.txt"));
        assert!(text.contains("gzip /data/poolA/varscan/poolA_varscan_bedfile_3.vcf"));
        assert!(text.contains("python $HOME/pipeline/balance_queue.py varscan"));
    }

    #[test]
    fn test_crisp_job_uses_converted_vcf() {
        let bams = bams();
        let mut ctx = context(&bams, Some(40));
        ctx.output_dir = PathBuf::from("/data/poolA/crisp");

        let text = calling_job(Caller::Crisp, &ctx, &partition(), &Config::default())
            .unwrap()
            .render();

        assert!(text.contains("--bam /data/poolA/04_realign/s1_realigned_reads.bam --bam /data/poolA/04_realign/s2_realigned_reads.bam"));
        assert!(text.contains("--poolsize 40"));
        assert!(text.contains("gatk VariantsToTable --variant /data/poolA/crisp/poolA_crisp_bedfile_3_converted.vcf"));
        assert!(text.contains("rm /data/poolA/crisp/poolA_crisp_bedfile_3.log"));
    }

    #[test]
    fn test_crisp_requires_ploidy() {
        let bams = bams();
        let result = calling_job(Caller::Crisp, &context(&bams, None), &partition(), &Config::default());
        assert!(matches!(result, Err(PipelineError::Metadata(_))));
    }

    #[test]
    fn test_merge_job() {
        let deps = vec![JobId::new("11"), JobId::new("12")];
        let script = merge_job(Caller::Varscan, "poolA", Path::new("/data/poolA"), &deps, &Config::default());

        assert_eq!(script.name(), "poolA-combine-varscan");
        let text = script.render();
        assert!(text.contains("#SBATCH --dependency=afterok:11:12"));
        assert!(text.contains("#SBATCH --mem=20000M"));
        assert!(text.contains("python $HOME/pipeline/combine_crispORvarscan.py /data/poolA varscan poolA"));
    }

    #[test]
    fn test_no_hooks_configured() {
        let mut config = Config::default();
        config.hooks.post_job.clear();

        let text = merge_job(Caller::Varscan, "poolA", Path::new("/data/poolA"), &[], &config).render();
        assert!(!text.contains("balance_queue"));
        assert!(!text.contains("--dependency"));
    }
}
