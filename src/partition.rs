//! Region Partitioner
//!
//! Splits a reference genome into a fixed number of BED files so that
//! variant calling can run one job per slice.
//!
//! # Algorithm
//!
//! Contig lengths come from the `.fai` index next to the reference, or
//! from the FASTA records themselves when no index exists. Contigs are laid
//! end to end in file order and the concatenated coordinate space is cut
//! into `count` slices of nearly equal length; a slice may span contigs.
//! Regions are 0-based and half-open, as in BED.
//!
//! # On Disk
//!
//! `<refdir>/bedfiles_<stem>/<stem>_bedfile_<n>.bed`, `n` starting at 0.
//! The set is written into a private directory and published with a
//! single rename, so concurrent callers either see the whole set or none.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use log::{debug, info, warn};
use noodles::bed;
use noodles::core::Position;
use noodles::fasta::{self, fai};

use crate::error::{PipelineError, Result};

/// A contiguous span of one contig, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub contig: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(contig: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            contig: contig.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// One region file.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    index: usize,
    path: PathBuf,
    regions: Vec<Region>,
}

impl Partition {
    pub fn new(index: usize, path: PathBuf, regions: Vec<Region>) -> Self {
        Self {
            index,
            path,
            regions,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn span(&self) -> u64 {
        self.regions.iter().map(Region::len).sum()
    }
}

/// Partitions of one reference, ordered by index.
#[derive(Debug, Clone)]
pub struct PartitionSet {
    pub dir: PathBuf,
    pub partitions: Vec<Partition>,
}

impl PartitionSet {
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }
}

/// `genome.fa` -> `genome`, `genome.fasta.gz` -> `genome`.
pub fn reference_stem(reference: &Path) -> String {
    let name = reference
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("reference");
    name.split(".fa").next().unwrap_or(name).to_string()
}

pub fn partition_dir(reference: &Path) -> PathBuf {
    let parent = reference.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("bedfiles_{}", reference_stem(reference)))
}

/// Returns the partition set of `reference`, creating it when absent.
///
/// An existing set is reused as is, whatever its size.
pub fn ensure_partitions(reference: &Path, count: usize) -> Result<PartitionSet> {
    let dir = partition_dir(reference);

    if dir.is_dir() {
        let set = load_partitions(&dir)?;
        if !set.is_empty() {
            debug!("Reusing {} partitions in {}", set.len(), dir.display());
            return Ok(set);
        }
        warn!("{} exists but holds no bed files", dir.display());
    }

    create_partitions(reference, count)
}

/// Reads a published partition set.
pub fn load_partitions(dir: &Path) -> Result<PartitionSet> {
    let mut partitions = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(index) = bed_index(&path) else {
            continue;
        };
        let regions = read_bed(&path)?;
        partitions.push(Partition::new(index, path, regions));
    }

    partitions.sort_by_key(Partition::index);
    Ok(PartitionSet {
        dir: dir.to_path_buf(),
        partitions,
    })
}

/// Splits `reference` into `count` BED files and publishes them.
pub fn create_partitions(reference: &Path, count: usize) -> Result<PartitionSet> {
    let contigs = read_contig_lengths(reference)?;
    let slices = split_regions(&contigs, count).ok_or_else(|| PipelineError::Reference {
        path: reference.to_path_buf(),
        message: "reference contains no sequence".to_string(),
    })?;

    let dir = partition_dir(reference);
    let stem = reference_stem(reference);
    let staging = dir.with_file_name(format!(
        ".{}.tmp{}",
        dir.file_name().and_then(|n| n.to_str()).unwrap_or("bedfiles"),
        process::id()
    ));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    for (index, regions) in slices.iter().enumerate() {
        write_bed(&staging.join(bed_name(&stem, index)), regions)?;
    }

    if let Err(e) = fs::rename(&staging, &dir) {
        // Another caller may have published first.
        let _ = fs::remove_dir_all(&staging);
        if dir.is_dir() {
            let set = load_partitions(&dir)?;
            if !set.is_empty() {
                debug!("Partitions for {} published concurrently", reference.display());
                return Ok(set);
            }
        }
        return Err(e.into());
    }

    info!(
        "Split {} into {} region files in {}",
        reference.display(),
        slices.len(),
        dir.display()
    );

    let partitions: Vec<Partition> = slices
        .into_iter()
        .enumerate()
        .map(|(index, regions)| Partition::new(index, dir.join(bed_name(&stem, index)), regions))
        .collect();
    for partition in &partitions {
        debug!(
            "{} covers {} bp in {} regions",
            partition.path().display(),
            partition.span(),
            partition.regions().len()
        );
    }
    Ok(PartitionSet { dir, partitions })
}

/// Contig names and lengths in file order.
pub fn read_contig_lengths(reference: &Path) -> Result<Vec<(String, u64)>> {
    let index = PathBuf::from(format!("{}.fai", reference.display()));
    if index.is_file() {
        debug!("Reading contig lengths from {}", index.display());
        return read_fai(&index).map_err(|e| reference_error(&index, e));
    }
    debug!("No index for {}, reading sequence records", reference.display());
    read_fasta_lengths(reference).map_err(|e| reference_error(reference, e))
}

fn read_fai(path: &Path) -> io::Result<Vec<(String, u64)>> {
    let mut reader = File::open(path)
        .map(BufReader::new)
        .map(fai::io::Reader::new)?;
    let index = reader.read_index()?;
    let records: &[fai::Record] = index.as_ref();

    Ok(records
        .iter()
        .map(|record| (String::from_utf8_lossy(record.name()).into_owned(), record.length()))
        .collect())
}

fn read_fasta_lengths(path: &Path) -> io::Result<Vec<(String, u64)>> {
    let mut reader = File::open(path)
        .map(BufReader::new)
        .map(fasta::io::Reader::new)?;

    let mut contigs = Vec::new();
    for result in reader.records() {
        let record = result?;
        let name = String::from_utf8_lossy(record.name()).into_owned();
        contigs.push((name, record.sequence().len() as u64));
    }
    Ok(contigs)
}

fn reference_error(path: &Path, e: io::Error) -> PipelineError {
    PipelineError::Reference {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Cuts the concatenated contigs into `count` slices.
///
/// Slice `i` covers `[i * total / count, (i + 1) * total / count)` of the
/// concatenated coordinates. `count` is clamped to `[1, total]` so that no
/// slice is empty. Returns `None` when there is no sequence at all.
pub fn split_regions(contigs: &[(String, u64)], count: usize) -> Option<Vec<Vec<Region>>> {
    let total: u64 = contigs.iter().map(|(_, len)| len).sum();
    if total == 0 {
        return None;
    }
    let count = (count.max(1) as u64).min(total);

    let mut slices = Vec::with_capacity(count as usize);
    let mut contig = 0;
    let mut offset = 0u64;

    for i in 0..count {
        let start = (i as u128 * total as u128 / count as u128) as u64;
        let end = ((i + 1) as u128 * total as u128 / count as u128) as u64;
        let mut regions = Vec::new();
        let mut pos = start;

        while pos < end {
            while offset + contigs[contig].1 <= pos {
                offset += contigs[contig].1;
                contig += 1;
            }
            let (name, len) = &contigs[contig];
            let stop = end.min(offset + len);
            regions.push(Region::new(name.clone(), pos - offset, stop - offset));
            pos = stop;
        }
        slices.push(regions);
    }
    Some(slices)
}

fn bed_name(stem: &str, index: usize) -> String {
    format!("{}_bedfile_{}.bed", stem, index)
}

fn bed_index(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?.strip_suffix(".bed")?;
    let (_, index) = name.rsplit_once("_bedfile_")?;
    index.parse().ok()
}

/// BED positions on disk are 0-based; `Position` is 1-based.
fn position(n: u64) -> io::Result<Position> {
    usize::try_from(n)
        .ok()
        .and_then(Position::new)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid position {}", n)))
}

fn write_bed(path: &Path, regions: &[Region]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    {
        let mut writer = bed::io::Writer::<3, _>::new(&mut out);
        for region in regions {
            let record = bed::feature::RecordBuf::<3>::builder()
                .set_reference_sequence_name(region.contig.clone())
                .set_feature_start(position(region.start + 1)?)
                .set_feature_end(position(region.end)?)
                .build();
            writer.write_feature_record(&record)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn read_bed(path: &Path) -> Result<Vec<Region>> {
    let mut reader = File::open(path)
        .map(BufReader::new)
        .map(bed::io::Reader::<3, _>::new)?;
    let malformed = |message: String| PipelineError::Reference {
        path: path.to_path_buf(),
        message,
    };

    let mut regions = Vec::new();
    let mut record = bed::Record::<3>::default();
    while reader
        .read_record(&mut record)
        .map_err(|e| malformed(e.to_string()))?
        != 0
    {
        let start = record.feature_start().map_err(|e| malformed(e.to_string()))?;
        let end = record
            .feature_end()
            .ok_or_else(|| malformed("missing end position".to_string()))?
            .map_err(|e| malformed(e.to_string()))?;

        let region = Region::new(
            record.reference_sequence_name().to_string(),
            usize::from(start) as u64 - 1,
            usize::from(end) as u64,
        );
        if region.is_empty() {
            return Err(malformed(format!(
                "empty region {}:{}-{}",
                region.contig, region.start, region.end
            )));
        }
        regions.push(region);
    }
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn contigs(lengths: &[(&str, u64)]) -> Vec<(String, u64)> {
        lengths.iter().map(|(n, l)| (n.to_string(), *l)).collect()
    }

    #[test]
    fn test_split_covers_every_base_once() {
        let contigs = contigs(&[("chr1", 1000), ("chr2", 10), ("chr3", 0), ("chr4", 333)]);
        let slices = split_regions(&contigs, 7).unwrap();

        assert_eq!(slices.len(), 7);
        let spans: Vec<u64> = slices.iter().map(|s| s.iter().map(Region::len).sum()).collect();
        assert_eq!(spans.iter().sum::<u64>(), 1343);
        let (min, max) = (spans.iter().min().unwrap(), spans.iter().max().unwrap());
        assert!(max - min <= 1);

        // Regions are contiguous in concatenated order.
        let flat: Vec<&Region> = slices.iter().flatten().collect();
        for pair in flat.windows(2) {
            if pair[0].contig == pair[1].contig {
                assert_eq!(pair[0].end, pair[1].start);
            } else {
                assert_eq!(pair[1].start, 0);
            }
        }
        assert!(flat.iter().all(|r| r.contig != "chr3"));
    }

    #[test]
    fn test_split_spans_contig_boundary() {
        let contigs = contigs(&[("a", 5), ("b", 5)]);
        let slices = split_regions(&contigs, 3).unwrap();

        assert_eq!(slices[0], vec![Region::new("a", 0, 3)]);
        assert_eq!(slices[1], vec![Region::new("a", 3, 5), Region::new("b", 0, 1)]);
        assert_eq!(slices[2], vec![Region::new("b", 1, 5)]);
    }

    #[test]
    fn test_split_clamps_count_to_length() {
        let slices = split_regions(&contigs(&[("tiny", 3)]), 10).unwrap();
        assert_eq!(slices.len(), 3);
        assert!(slices.iter().all(|s| s.len() == 1 && s[0].len() == 1));
    }

    #[test]
    fn test_split_empty_reference() {
        assert!(split_regions(&contigs(&[("x", 0)]), 4).is_none());
        assert!(split_regions(&[], 4).is_none());
    }

    #[test]
    fn test_reference_stem() {
        assert_eq!(reference_stem(Path::new("/refs/genome.fa")), "genome");
        assert_eq!(reference_stem(Path::new("/refs/genome.fasta")), "genome");
        assert_eq!(reference_stem(Path::new("/refs/genome.fa.gz")), "genome");
        assert_eq!(
            partition_dir(Path::new("/refs/genome.fasta")),
            PathBuf::from("/refs/bedfiles_genome")
        );
    }

    #[test]
    fn test_fasta_records_without_index() {
        let temp_dir = tempdir().unwrap();
        let reference = temp_dir.path().join("genome.fa");
        fs::write(&reference, ">chr1 description\nACGTACGT\nACG\n>chr2\nAAAA\n").unwrap();

        let lengths = read_contig_lengths(&reference).unwrap();
        assert_eq!(lengths, contigs(&[("chr1", 11), ("chr2", 4)]));
    }

    #[test]
    fn test_fai_preferred_over_records() {
        let temp_dir = tempdir().unwrap();
        let reference = temp_dir.path().join("genome.fa");
        fs::write(&reference, ">chr1\nAC\n").unwrap();
        fs::write(
            temp_dir.path().join("genome.fa.fai"),
            "chr1\t2000\t6\t60\t61\nchr2\t500\t2100\t60\t61\n",
        )
        .unwrap();

        let lengths = read_contig_lengths(&reference).unwrap();
        assert_eq!(lengths, contigs(&[("chr1", 2000), ("chr2", 500)]));
    }

    #[test]
    fn test_ensure_creates_then_reuses() {
        let temp_dir = tempdir().unwrap();
        let reference = temp_dir.path().join("genome.fa");
        fs::write(&reference, ">chr1\nACGTACGTAC\n>chr2\nACGTACGTAC\n").unwrap();

        let created = ensure_partitions(&reference, 4).unwrap();
        assert_eq!(created.len(), 4);
        assert_eq!(created.dir, temp_dir.path().join("bedfiles_genome"));
        assert!(created.dir.join("genome_bedfile_0.bed").is_file());
        assert!(created.dir.join("genome_bedfile_3.bed").is_file());

        let bed = fs::read_to_string(created.dir.join("genome_bedfile_0.bed")).unwrap();
        assert_eq!(bed, "chr1\t0\t5\n");

        // A different count does not rewrite a published set.
        let reused = ensure_partitions(&reference, 9).unwrap();
        assert_eq!(reused.len(), 4);
        assert_eq!(reused.partitions, created.partitions);

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_load_orders_by_index() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("bedfiles_genome");
        fs::create_dir_all(&dir).unwrap();
        for index in [10, 2, 0, 1] {
            fs::write(dir.join(bed_name("genome", index)), format!("chr1\t{}\t{}\n", index, index + 1))
                .unwrap();
        }
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let set = load_partitions(&dir).unwrap();
        let indices: Vec<usize> = set.iter().map(Partition::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 10]);
        assert_eq!(set.partitions[3].regions(), [Region::new("chr1", 10, 11)]);
    }

    #[test]
    fn test_empty_bed_region_rejected() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join(bed_name("genome", 0));
        fs::write(&path, "chr1\t10\t10\n").unwrap();

        assert!(matches!(read_bed(&path), Err(PipelineError::Reference { .. })));
    }

    #[test]
    fn test_written_bed_reads_back() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join(bed_name("genome", 1));
        let regions = vec![Region::new("chr1", 3, 5), Region::new("chr2", 0, 1)];

        write_bed(&path, &regions).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "chr1\t3\t5\nchr2\t0\t1\n");
        assert_eq!(read_bed(&path).unwrap(), regions);
    }

    #[test]
    fn test_missing_reference() {
        let temp_dir = tempdir().unwrap();
        let result = ensure_partitions(&temp_dir.path().join("absent.fa"), 4);
        assert!(matches!(result, Err(PipelineError::Reference { .. })));
    }
}
