use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use lazy_static::lazy_static;
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

use crate::cli::Arguments;

// External software
pub const GZIP_EXT: &str = "gz";
pub const CUTADAPT_TAG: &str = "cutadapt";
pub const VSEARCH_TAG: &str = "vsearch";


lazy_static! {
    /// Oldest (major, minor) release each tool is known to work with.
    pub static ref TOOL_VERSIONS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert(CUTADAPT_TAG, (3, 0));
        m.insert(VSEARCH_TAG, (2, 15));
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VsearchSubcommand {
    FastxUniques,
    ClusterSize,
}

impl VsearchSubcommand {
    pub fn as_flag(&self) -> &'static str {
        match self {
            VsearchSubcommand::FastxUniques => "--fastx_uniques",
            VsearchSubcommand::ClusterSize => "--cluster_size",
        }
    }
}

// Static Filenames
pub const TEMP_DIR_NAME: &str = "temp_files";
pub const TRIMMED_R1: &str = "reads_1.trimmed.fastq";
pub const TRIMMED_R2: &str = "reads_2.trimmed.fastq";
pub const COMBINED_FASTQ: &str = "all.trimmed.fastq";
pub const UNIQUES_FASTA: &str = "unique_sequences.fasta";
pub const OTUS_FASTA: &str = "otus.fasta";
pub const CLUSTERS_UC: &str = "clusters.uc";
pub const OTU_REPORT_SUFFIX: &str = "otu_report.csv";
pub const SUMMARY_REPORT_SUFFIX: &str = "summary_report.csv";
pub const DEFAULT_MODEL_PATH: &str = "models/tax_classifier.bin";


// Static Parameters
pub const DEFAULT_IDENTITY: f64 = 0.97;
pub const DEFAULT_QUALITY_CUTOFF: u8 = 20;
pub const DEFAULT_MIN_LENGTH: usize = 150;
pub const DEFAULT_MAX_AMBIGUOUS: f64 = 0.05;
pub const MAX_KMER_SIZE: usize = 12;
pub const MODEL_FORMAT_VERSION: u32 = 1;

pub const EXCLUDED_LABEL: &str = "Excluded";
pub const UNASSIGNED_LABEL: &str = "Unassigned";

pub const FASTA_TAG : &str = "fasta";
pub const FASTQ_TAG : &str = "fastq";
pub const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fna", "ffn", "frn"];
pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("{tool} failed: {error}")]
    ExternalTool { tool: String, error: String },

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Invalid sequence '{id}': {reason}")]
    InvalidSequence { id: String, reason: String },

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Dimension mismatch: model expects {expected} features, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}


pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub work_dir: PathBuf,
    pub sample_name: String,
    pub args: Arguments,
    pub thread_pool: Arc<ThreadPool>,
    pub threads: usize,
    pub available_ram: u64,
}

impl RunConfig {
    /// Builds the run configuration and the worker pool shared by the per-OTU stages.
    /// The working directory for intermediates is `<out_dir>/temp_files`.
    pub fn new(
        args: Arguments,
        cwd: PathBuf,
        out_dir: PathBuf,
        sample_name: String,
        threads: usize,
        available_ram: u64,
    ) -> Result<Self> {
        let threads = threads.max(1);
        let thread_pool = Arc::new(ThreadPoolBuilder::new().num_threads(threads).build()?);
        let work_dir = out_dir.join(TEMP_DIR_NAME);
        Ok(RunConfig {
            cwd,
            out_dir,
            work_dir,
            sample_name,
            args,
            thread_pool,
            threads,
            available_ram,
        })
    }

    /// Resolves a user-supplied path against the run's working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            self.cwd.join(path)
        }
    }
}
