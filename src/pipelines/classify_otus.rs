use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use crate::config::defs::{PipelineError, RunConfig};
use crate::pipelines::edna_classify::{classify_and_report, prepare_classifier, OtuClassifier};
use crate::pipelines::state::{PipelineStage, RunTracker, StageError};
use crate::utils::file::validate_input_file;
use crate::utils::otu::{read_size_annotated_fasta, OtuTable};
use crate::utils::report::ReportPaths;


/// Reads an existing size-annotated OTU FASTA into a table.
fn load_otu_table(path: PathBuf) -> Result<OtuTable, PipelineError> {
    let path = validate_input_file(&path, "OTU FASTA")?;
    let otus = read_size_annotated_fasta(&path).map_err(|e| PipelineError::Input(format!("{:#}", e)))?;
    let total = otus.iter().map(|otu| otu.abundance).sum();
    let table = OtuTable::new(otus, total)?;
    info!("Loaded {} OTUs ({} reads) from {}", table.len(), total, path.display());
    Ok(table)
}

fn startup(config: &RunConfig) -> Result<(OtuClassifier, OtuTable), PipelineError> {
    let otus_path = config
        .args
        .otus
        .as_deref()
        .map(|p| config.resolve(p))
        .ok_or_else(|| PipelineError::Input("classify_otus needs an OTU FASTA (--otus)".to_string()))?;
    let classifier = prepare_classifier(config)?;
    let table = load_otu_table(otus_path)?;
    Ok((classifier, table))
}

/// Classification and reporting only, starting from OTUs clustered elsewhere.
pub async fn run(config: Arc<RunConfig>) -> Result<ReportPaths, StageError> {
    let mut tracker = RunTracker::new(PipelineStage::FeatureExtraction);
    let (classifier, table) = startup(&config).map_err(|e| tracker.fail(e))?;
    classify_and_report(&config, &classifier, table, &mut tracker).await
}
