// Stage inputs/outputs and the executors that wrap the external tools
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use tokio::task;

use crate::config::defs::{
    PipelineError, RunConfig, CLUSTERS_UC, COMBINED_FASTQ, CUTADAPT_TAG, OTUS_FASTA, TRIMMED_R1, TRIMMED_R2,
    UNIQUES_FASTA, VSEARCH_TAG,
};
use crate::utils::command::cutadapt::CutadaptConfig;
use crate::utils::command::vsearch::VsearchConfig;
use crate::utils::command::{generate_cli, tool_program, ArgGenerator};
use crate::utils::fastx::{concatenate_fastq, record_counter};
use crate::utils::file::validate_input_file;
use crate::utils::otu::{parse_uc, read_size_annotated_fasta, reconcile, size_annotated_total, OtuTable};
use crate::utils::streams::spawn_and_wait;


/// One step of the pipeline: consumes the previous stage's artifact and produces the next.
pub trait StageExecutor {
    type Input;
    type Output;

    fn name(&self) -> &'static str;

    fn execute(&self, input: Self::Input) -> impl Future<Output = Result<Self::Output, PipelineError>> + Send;
}


/// A validated paired-end sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub forward: PathBuf,
    pub reverse: PathBuf,
    pub read_count: u64,
}

impl Sample {
    /// Checks both mates exist, parse as FASTQ and hold the same non-zero number of reads.
    pub async fn load(name: String, forward: PathBuf, reverse: PathBuf) -> Result<Self, PipelineError> {
        let forward = validate_input_file(&forward, "forward reads")?;
        let reverse = validate_input_file(&reverse, "reverse reads")?;

        let (forward_count, reverse_count) = tokio::try_join!(
            count_reads(forward.clone()),
            count_reads(reverse.clone()),
        )
            .map_err(|e| PipelineError::Input(format!("{:#}", e)))?;

        if forward_count == 0 {
            return Err(PipelineError::Input(format!("No reads in {}", forward.display())));
        }
        if forward_count != reverse_count {
            return Err(PipelineError::Input(format!(
                "Mates differ in read count: {} in {}, {} in {}",
                forward_count,
                forward.display(),
                reverse_count,
                reverse.display()
            )));
        }
        info!("Sample {}: {} read pairs", name, forward_count);
        Ok(Sample { name, forward, reverse, read_count: forward_count })
    }
}

/// Trimmed mates left by cutadapt.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedReads {
    pub forward: PathBuf,
    pub reverse: PathBuf,
    pub read_count: u64,
}


async fn count_reads(path: PathBuf) -> anyhow::Result<u64> {
    let count = task::spawn_blocking(move || {
        record_counter(&path).map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))
    })
        .await??;
    Ok(count)
}

fn tool_args(tool: &str, config: &RunConfig, tool_config: &dyn ArgGenerator) -> Result<Vec<String>, PipelineError> {
    generate_cli(tool, config, tool_config).map_err(|e| PipelineError::InvalidConfig(e.to_string()))
}

async fn run_tool(tool: &'static str, config: &RunConfig, args: Vec<String>) -> Result<(), PipelineError> {
    let program = tool_program(tool, config)?;
    spawn_and_wait(tool, program, &args).await?;
    Ok(())
}

fn malformed(tool: &str, e: anyhow::Error) -> PipelineError {
    PipelineError::ExternalTool {
        tool: tool.to_string(),
        error: format!("{:#}", e),
    }
}

fn require_output(tool: &str, path: &Path) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::ExternalTool {
            tool: tool.to_string(),
            error: format!("Expected output {} was not written", path.display()),
        })
    }
}


/// Adapter and quality trimming with cutadapt.
pub struct CutadaptTrimmer {
    config: Arc<RunConfig>,
}

impl CutadaptTrimmer {
    pub fn new(config: Arc<RunConfig>) -> Self {
        CutadaptTrimmer { config }
    }
}

impl StageExecutor for CutadaptTrimmer {
    type Input = Sample;
    type Output = CleanedReads;

    fn name(&self) -> &'static str {
        CUTADAPT_TAG
    }

    fn execute(&self, sample: Sample) -> impl Future<Output = Result<CleanedReads, PipelineError>> + Send {
        let config = self.config.clone();
        async move {
            let cutadapt_config = CutadaptConfig {
                forward_in: sample.forward.clone(),
                reverse_in: sample.reverse.clone(),
                forward_out: config.work_dir.join(TRIMMED_R1),
                reverse_out: config.work_dir.join(TRIMMED_R2),
            };
            let args = tool_args(CUTADAPT_TAG, &config, &cutadapt_config)?;
            run_tool(CUTADAPT_TAG, &config, args).await?;

            require_output(CUTADAPT_TAG, &cutadapt_config.forward_out)?;
            require_output(CUTADAPT_TAG, &cutadapt_config.reverse_out)?;
            let (forward_count, reverse_count) = tokio::try_join!(
                count_reads(cutadapt_config.forward_out.clone()),
                count_reads(cutadapt_config.reverse_out.clone()),
            )
                .map_err(|e| malformed(CUTADAPT_TAG, e))?;

            if forward_count == 0 {
                return Err(PipelineError::ExternalTool {
                    tool: CUTADAPT_TAG.to_string(),
                    error: "No reads survived trimming".to_string(),
                });
            }
            if forward_count != reverse_count {
                return Err(PipelineError::ExternalTool {
                    tool: CUTADAPT_TAG.to_string(),
                    error: format!("Trimmed mates out of sync: {} vs {} reads", forward_count, reverse_count),
                });
            }
            info!("Trimming kept {} of {} read pairs", forward_count, sample.read_count);

            Ok(CleanedReads {
                forward: cutadapt_config.forward_out,
                reverse: cutadapt_config.reverse_out,
                read_count: forward_count,
            })
        }
    }
}


/// Dereplication and abundance-sorted clustering with vsearch.
pub struct VsearchClusterer {
    config: Arc<RunConfig>,
}

impl VsearchClusterer {
    pub fn new(config: Arc<RunConfig>) -> Self {
        VsearchClusterer { config }
    }
}

impl StageExecutor for VsearchClusterer {
    type Input = CleanedReads;
    type Output = OtuTable;

    fn name(&self) -> &'static str {
        VSEARCH_TAG
    }

    fn execute(&self, reads: CleanedReads) -> impl Future<Output = Result<OtuTable, PipelineError>> + Send {
        let config = self.config.clone();
        async move {
            let work_dir = config.work_dir.clone();
            let combined = work_dir.join(COMBINED_FASTQ);
            let uniques = work_dir.join(UNIQUES_FASTA);
            let centroids_path = work_dir.join(OTUS_FASTA);
            let uc_path = work_dir.join(CLUSTERS_UC);

            let mates = vec![reads.forward.clone(), reads.reverse.clone()];
            let combined_out = combined.clone();
            let written = task::spawn_blocking(move || concatenate_fastq(&mates, &combined_out))
                .await
                .map_err(|e| PipelineError::Other(e.into()))?
                .map_err(|e| PipelineError::IOError(format!("Failed to concatenate mates: {}", e)))?;
            debug!("Concatenated {} reads into {}", written, combined.display());

            let derep_args = tool_args(VSEARCH_TAG, &config, &VsearchConfig::dereplicate(combined, uniques.clone()))?;
            run_tool(VSEARCH_TAG, &config, derep_args).await?;
            require_output(VSEARCH_TAG, &uniques)?;
            let dereplicated = size_annotated_total(&uniques).map_err(|e| malformed(VSEARCH_TAG, e))?;
            info!("Dereplicated {} reads", dereplicated);
            if dereplicated != written {
                return Err(PipelineError::ExternalTool {
                    tool: VSEARCH_TAG.to_string(),
                    error: format!("{} reads fed to dereplication but {} came out", written, dereplicated),
                });
            }

            let cluster_config =
                VsearchConfig::cluster(uniques, config.args.identity, centroids_path.clone(), uc_path.clone());
            let cluster_args = tool_args(VSEARCH_TAG, &config, &cluster_config)?;
            run_tool(VSEARCH_TAG, &config, cluster_args).await?;
            require_output(VSEARCH_TAG, &centroids_path)?;
            require_output(VSEARCH_TAG, &uc_path)?;

            let centroids = read_size_annotated_fasta(&centroids_path).map_err(|e| malformed(VSEARCH_TAG, e))?;
            if centroids.is_empty() {
                return Err(PipelineError::EmptyResult("Clustering produced no OTUs".to_string()));
            }

            let clusters = parse_uc(&uc_path).map_err(|e| malformed(VSEARCH_TAG, e))?;
            reconcile(&centroids, &clusters).map_err(|e| malformed(VSEARCH_TAG, e))?;

            let clustered: u64 = clusters.values().map(|cluster| cluster.members).sum();
            if clustered != dereplicated {
                return Err(PipelineError::ExternalTool {
                    tool: VSEARCH_TAG.to_string(),
                    error: format!("UC file accounts for {} reads but {} were dereplicated", clustered, dereplicated),
                });
            }

            let table = OtuTable::new(centroids, dereplicated)?;
            info!("Clustered {} reads into {} OTUs at {} identity", dereplicated, table.len(), config.args.identity);
            Ok(table)
        }
    }
}
