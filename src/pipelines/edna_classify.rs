use std::fs;
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::defs::{PipelineError, RunConfig, CUTADAPT_TAG, VSEARCH_TAG};
use crate::pipelines::stages::{CleanedReads, CutadaptTrimmer, Sample, StageExecutor, VsearchClusterer};
use crate::pipelines::state::{PipelineStage, RunTracker, StageError};
use crate::utils::command::check_versions;
use crate::utils::kmer::{feature_len, FeatureOutcome, KmerFeaturizer};
use crate::utils::model::{Assignment, ClassificationResults, LinearModel};
use crate::utils::otu::OtuTable;
use crate::utils::report::{build_report_rows, summarize_by_taxon, write_reports, ReportPaths};


/// The loaded model together with the featurizer configured to match it.
pub struct OtuClassifier {
    pub model: LinearModel,
    pub featurizer: KmerFeaturizer,
}

impl OtuClassifier {
    /// Loads the model artifact and settles k. A `--kmer-size` that disagrees with
    /// the model is rejected here, before any external tool runs.
    pub fn load(config: &RunConfig) -> Result<Self, PipelineError> {
        let model_path = config.resolve(&config.args.model);
        let model = LinearModel::load(&model_path)?;
        info!(
            "Loaded model {}: k={}, {} labels",
            model_path.display(),
            model.kmer_size(),
            model.labels().len()
        );

        let k = config.args.kmer_size.unwrap_or(model.kmer_size());
        let featurizer = KmerFeaturizer::new(k, config.args.max_ambiguous)?;
        if k != model.kmer_size() {
            return Err(PipelineError::DimensionMismatch {
                expected: model.feature_len(),
                found: feature_len(k),
            });
        }
        Ok(OtuClassifier { model, featurizer })
    }
}


fn validate_min_confidence(config: &RunConfig) -> Result<(), PipelineError> {
    match config.args.min_confidence {
        Some(min) if !(0.0..=1.0).contains(&min) => Err(PipelineError::InvalidConfig(format!(
            "--min-confidence must be within [0, 1], got {}",
            min
        ))),
        _ => Ok(()),
    }
}

fn validate_identity(config: &RunConfig) -> Result<(), PipelineError> {
    let identity = config.args.identity;
    if identity > 0.0 && identity <= 1.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!("--identity must be within (0, 1], got {}", identity)))
    }
}

pub(crate) fn prepare_out_dirs(config: &RunConfig) -> Result<(), PipelineError> {
    fs::create_dir_all(&config.work_dir).map_err(|e| {
        PipelineError::IOError(format!("Failed to create {}: {}", config.work_dir.display(), e))
    })
}

/// True when one dense feature vector per worker would take more than half of
/// the available RAM. Zero available RAM means unknown.
fn feature_memory_tight(config: &RunConfig, feature_len: usize) -> bool {
    let per_worker = (feature_len * std::mem::size_of::<f64>()) as u64;
    config.available_ram > 0 && per_worker.saturating_mul(config.threads as u64) > config.available_ram / 2
}

/// Startup checks shared by both entry points: output directories, thresholds, model.
pub(crate) fn prepare_classifier(config: &RunConfig) -> Result<OtuClassifier, PipelineError> {
    validate_min_confidence(config)?;
    prepare_out_dirs(config)?;
    let classifier = OtuClassifier::load(config)?;
    if feature_memory_tight(config, classifier.model.feature_len()) {
        warn!(
            "{} workers with {}-mer vectors may exhaust the {} MiB of available RAM; consider fewer --threads",
            config.threads,
            classifier.featurizer.k(),
            config.available_ram / 1_048_576
        );
    }
    Ok(classifier)
}


/// Featurizes and scores every OTU on the worker pool. A 4^k vector lives only
/// until its OTU is scored, so at most one per worker thread is held at a time.
/// Failures carry the stage they belong to.
fn score_otus(
    config: &RunConfig,
    classifier: &OtuClassifier,
    table: &OtuTable,
) -> Result<ClassificationResults, (PipelineStage, PipelineError)> {
    config.thread_pool.install(|| {
        table
            .otus()
            .par_iter()
            .map(|otu| -> Result<(String, Assignment), (PipelineStage, PipelineError)> {
                let outcome = classifier
                    .featurizer
                    .extract(&otu.id, &otu.sequence)
                    .map_err(|e| (PipelineStage::FeatureExtraction, e))?;
                let assignment = match outcome {
                    FeatureOutcome::Vector(vector) => classifier
                        .model
                        .predict(&vector)
                        .map(Assignment::Classified)
                        .map_err(|e| (PipelineStage::Classification, e))?,
                    FeatureOutcome::Excluded(reason) => {
                        debug!("OTU {} excluded from classification: {}", otu.id, reason);
                        Assignment::Excluded(reason)
                    }
                };
                Ok((otu.id.clone(), assignment))
            })
            .collect()
    })
}


/// Feature extraction, classification and reporting for an OTU table.
/// The tracker must be positioned just before FeatureExtraction.
pub(crate) async fn classify_and_report(
    config: &RunConfig,
    classifier: &OtuClassifier,
    table: OtuTable,
    tracker: &mut RunTracker,
) -> Result<ReportPaths, StageError> {
    tracker.advance(PipelineStage::FeatureExtraction).map_err(|e| tracker.fail(e))?;
    info!("Extracting {}-mer features for {} OTUs", classifier.featurizer.k(), table.len());
    let scored = match score_otus(config, classifier, &table) {
        Err((PipelineStage::FeatureExtraction, e)) => return Err(tracker.fail(e)),
        other => other,
    };

    tracker.advance(PipelineStage::Classification).map_err(|e| tracker.fail(e))?;
    let results = scored.map_err(|(_, e)| tracker.fail(e))?;
    let excluded = results.values().filter(|a| matches!(a, Assignment::Excluded(_))).count();
    if excluded > 0 {
        warn!("{} of {} OTUs could not be scored and are reported as excluded", excluded, table.len());
    }

    tracker.advance(PipelineStage::Aggregation).map_err(|e| tracker.fail(e))?;
    let paths = ReportPaths::new(&config.out_dir, &config.sample_name);
    let rows = build_report_rows(&table, &results).map_err(|e| tracker.fail(e))?;
    let summary = summarize_by_taxon(&rows, config.args.min_confidence);
    write_reports(&paths, &rows, &summary).map_err(|e| tracker.fail(e))?;
    for taxon in summary.iter().take(5) {
        info!("  {}: {} reads", taxon.predicted_class, taxon.abundance);
    }

    tracker.advance(PipelineStage::Done).map_err(|e| tracker.fail(e))?;
    Ok(paths)
}


/// Runs trimming and clustering through the given executors, then classifies and reports.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `classifier` - Model and featurizer loaded at startup.
/// * `sample` - Validated input sample.
/// * `trimmer` - Produces cleaned reads from the sample.
/// * `clusterer` - Produces the OTU table from cleaned reads.
/// * `tracker` - Run state, still Idle.
///
/// # Returns
/// Paths of the written reports, or the first failure tagged with its stage.
pub async fn run_stages<T, C>(
    config: &RunConfig,
    classifier: &OtuClassifier,
    sample: Sample,
    trimmer: &T,
    clusterer: &C,
    tracker: &mut RunTracker,
) -> Result<ReportPaths, StageError>
where
    T: StageExecutor<Input = Sample, Output = CleanedReads>,
    C: StageExecutor<Input = CleanedReads, Output = OtuTable>,
{
    tracker.advance(PipelineStage::Trimming).map_err(|e| tracker.fail(e))?;
    info!("Trimming {} with {}", sample.name, trimmer.name());
    let cleaned = trimmer.execute(sample).await.map_err(|e| tracker.fail(e))?;

    tracker.advance(PipelineStage::Clustering).map_err(|e| tracker.fail(e))?;
    info!("Clustering {} read pairs with {}", cleaned.read_count, clusterer.name());
    let table = clusterer.execute(cleaned).await.map_err(|e| tracker.fail(e))?;

    classify_and_report(config, classifier, table, tracker).await
}


async fn startup(config: &RunConfig) -> Result<(OtuClassifier, Sample), PipelineError> {
    let (file1, file2) = match (&config.args.file1, &config.args.file2) {
        (Some(file1), Some(file2)) => (config.resolve(file1), config.resolve(file2)),
        _ => {
            return Err(PipelineError::Input(
                "edna_classify needs both forward (-i) and reverse (-I) reads".to_string(),
            ));
        }
    };
    validate_identity(config)?;
    let classifier = prepare_classifier(config)?;
    check_versions(vec![CUTADAPT_TAG, VSEARCH_TAG], config).await?;
    let sample = Sample::load(config.sample_name.clone(), file1, file2).await?;
    Ok((classifier, sample))
}

/// Full run: raw paired reads to per-OTU and per-taxon reports.
pub async fn run(config: Arc<RunConfig>) -> Result<ReportPaths, StageError> {
    let mut tracker = RunTracker::new(PipelineStage::Trimming);
    let (classifier, sample) = startup(&config).await.map_err(|e| tracker.fail(e))?;

    let trimmer = CutadaptTrimmer::new(config.clone());
    let clusterer = VsearchClusterer::new(config.clone());
    run_stages(&config, &classifier, sample, &trimmer, &clusterer, &mut tracker).await
}
