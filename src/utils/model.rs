// Pre-trained linear taxonomic classifier: artifact format, loading and scoring
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Result;
use fxhash::FxHashMap;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::config::defs::{PipelineError, MAX_KMER_SIZE, MODEL_FORMAT_VERSION};
use crate::utils::kmer::{feature_len, ExclusionReason};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiClass {
    /// Softmax over all class scores.
    Multinomial,
    /// Independent sigmoid per class, renormalised to sum to 1.
    OneVsRest,
}

/// On-disk model bundle. `coefficients` holds one row of `feature_len` weights per
/// label, in label order. Binary models must be exported with one row per class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub kmer_size: usize,
    pub feature_len: usize,
    pub labels: Vec<String>,
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
    pub multi_class: MultiClass,
}

impl ModelArtifact {
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        writer.flush()?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)
            .map_err(|e| PipelineError::ModelLoad(format!("Cannot open {}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);
        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| PipelineError::ModelLoad(format!("Corrupt model artifact {}: {}", path.display(), e)))
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

/// Outcome for one OTU; exactly one per OTU reaches the reporter.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Classified(Prediction),
    Excluded(ExclusionReason),
}

/// Assignments keyed by OTU identifier.
pub type ClassificationResults = FxHashMap<String, Assignment>;


#[derive(Debug, Clone)]
pub struct LinearModel {
    kmer_size: usize,
    labels: Vec<String>,
    coefficients: Array2<f64>,
    intercepts: Array1<f64>,
    multi_class: MultiClass,
}

impl LinearModel {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        LinearModel::from_artifact(ModelArtifact::read(path)?)
    }

    /// Validates an artifact's internal consistency and builds the scoring matrices.
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, PipelineError> {
        let invalid = |msg: String| Err(PipelineError::ModelLoad(msg));

        if artifact.format_version != MODEL_FORMAT_VERSION {
            return invalid(format!(
                "Unsupported model format version {} (expected {})",
                artifact.format_version, MODEL_FORMAT_VERSION
            ));
        }
        if artifact.kmer_size == 0 || artifact.kmer_size > MAX_KMER_SIZE {
            return invalid(format!("Unsupported k-mer size {}", artifact.kmer_size));
        }
        if artifact.feature_len != feature_len(artifact.kmer_size) {
            return invalid(format!(
                "Feature length {} does not match 4^{} = {}",
                artifact.feature_len, artifact.kmer_size, feature_len(artifact.kmer_size)
            ));
        }
        if artifact.labels.is_empty() {
            return invalid("Model has no labels".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = artifact.labels.iter().find(|l| !seen.insert(l.as_str())) {
            return invalid(format!("Duplicate label '{}'", dup));
        }
        let n_labels = artifact.labels.len();
        if artifact.coefficients.len() != n_labels || artifact.intercepts.len() != n_labels {
            return invalid(format!(
                "{} labels but {} coefficient rows and {} intercepts",
                n_labels, artifact.coefficients.len(), artifact.intercepts.len()
            ));
        }
        if let Some((i, row)) = artifact.coefficients.iter().enumerate().find(|(_, row)| row.len() != artifact.feature_len) {
            return invalid(format!("Coefficient row {} has {} weights, expected {}", i, row.len(), artifact.feature_len));
        }

        let flat: Vec<f64> = artifact.coefficients.into_iter().flatten().collect();
        if flat.iter().chain(artifact.intercepts.iter()).any(|w| !w.is_finite()) {
            return invalid("Model contains non-finite weights".to_string());
        }
        let coefficients = Array2::from_shape_vec((n_labels, artifact.feature_len), flat)
            .map_err(|e| PipelineError::ModelLoad(e.to_string()))?;

        Ok(LinearModel {
            kmer_size: artifact.kmer_size,
            labels: artifact.labels,
            coefficients,
            intercepts: Array1::from(artifact.intercepts),
            multi_class: artifact.multi_class,
        })
    }

    pub fn kmer_size(&self) -> usize {
        self.kmer_size
    }

    pub fn feature_len(&self) -> usize {
        self.coefficients.ncols()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Probability of each label, in label order.
    pub fn predict_proba(&self, features: &[f64]) -> Result<Array1<f64>, PipelineError> {
        if features.len() != self.feature_len() {
            return Err(PipelineError::DimensionMismatch {
                expected: self.feature_len(),
                found: features.len(),
            });
        }
        let scores = self.coefficients.dot(&ArrayView1::from(features)) + &self.intercepts;
        let probs = match self.multi_class {
            MultiClass::Multinomial => softmax(scores),
            MultiClass::OneVsRest => {
                let sig = scores.mapv(|s| 1.0 / (1.0 + (-s).exp()));
                let total = sig.sum();
                sig / total
            }
        };
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(PipelineError::Other(anyhow::anyhow!("Model produced non-finite probabilities")));
        }
        Ok(probs)
    }

    /// Arg-max label and its probability. Ties go to the earlier label.
    pub fn predict(&self, features: &[f64]) -> Result<Prediction, PipelineError> {
        let probs = self.predict_proba(features)?;
        let (best, confidence) = probs
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bp), (i, &p)| if p > bp { (i, p) } else { (bi, bp) });
        Ok(Prediction {
            label: self.labels[best].clone(),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

fn softmax(scores: Array1<f64>) -> Array1<f64> {
    let max = scores.fold(f64::NEG_INFINITY, |m, &s| m.max(s));
    let exp = scores.mapv(|s| (s - max).exp());
    let total = exp.sum();
    exp / total
}
