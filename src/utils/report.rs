// Per-OTU and per-taxon CSV reports
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fxhash::FxHashMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::defs::{PipelineError, EXCLUDED_LABEL, OTU_REPORT_SUFFIX, SUMMARY_REPORT_SUFFIX, UNASSIGNED_LABEL};
use crate::utils::file::file_path_manipulator;
use crate::utils::model::{Assignment, ClassificationResults};
use crate::utils::otu::OtuTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtuReportRow {
    pub otu_id: String,
    pub abundance: u64,
    pub label: String,
    /// Empty for excluded OTUs.
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonSummaryRow {
    pub predicted_class: String,
    pub abundance: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportPaths {
    pub otu_report: PathBuf,
    pub summary_report: PathBuf,
}

impl ReportPaths {
    pub fn new(out_dir: &Path, sample_name: &str) -> Self {
        let sample = PathBuf::from(sample_name);
        ReportPaths {
            otu_report: file_path_manipulator(&sample, Some(out_dir), None, Some(OTU_REPORT_SUFFIX), "_"),
            summary_report: file_path_manipulator(&sample, Some(out_dir), None, Some(SUMMARY_REPORT_SUFFIX), "_"),
        }
    }
}


/// Joins the OTU table with classification results, one row per OTU in table order.
///
/// # Arguments
///
/// * `table` - Clustered OTUs with abundances.
/// * `results` - One assignment per OTU id.
///
/// # Returns
/// Report rows; Consistency error if an id is present on only one side or the
/// abundance total drifts from the clustered read count.
pub fn build_report_rows(table: &OtuTable, results: &ClassificationResults) -> Result<Vec<OtuReportRow>, PipelineError> {
    let table_ids: FxHashMap<&str, ()> = table.otus().iter().map(|otu| (otu.id.as_str(), ())).collect();
    if let Some(orphan) = results.keys().find(|id| !table_ids.contains_key(id.as_str())) {
        return Err(PipelineError::Consistency(format!(
            "Classification result for '{}' has no matching OTU",
            orphan
        )));
    }

    let rows = table
        .otus()
        .iter()
        .map(|otu| {
            let assignment = results.get(&otu.id).ok_or_else(|| {
                PipelineError::Consistency(format!("OTU '{}' has no classification result", otu.id))
            })?;
            let (label, confidence) = match assignment {
                Assignment::Classified(prediction) => (prediction.label.clone(), Some(prediction.confidence)),
                Assignment::Excluded(_) => (EXCLUDED_LABEL.to_string(), None),
            };
            Ok(OtuReportRow {
                otu_id: otu.id.clone(),
                abundance: otu.abundance,
                label,
                confidence,
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    if rows.len() != table.len() {
        return Err(PipelineError::Consistency(format!(
            "{} report rows for {} OTUs",
            rows.len(),
            table.len()
        )));
    }
    let total: u64 = rows.iter().map(|row| row.abundance).sum();
    if total != table.clustered_reads() {
        return Err(PipelineError::Consistency(format!(
            "Report abundance {} differs from {} clustered reads",
            total,
            table.clustered_reads()
        )));
    }
    Ok(rows)
}


/// Sums abundance per predicted class, largest first; ties sort by name.
/// Classified rows below `min_confidence` are pooled as Unassigned.
pub fn summarize_by_taxon(rows: &[OtuReportRow], min_confidence: Option<f64>) -> Vec<TaxonSummaryRow> {
    let mut totals: FxHashMap<&str, u64> = FxHashMap::default();
    for row in rows {
        let class = match (row.confidence, min_confidence) {
            (Some(confidence), Some(min)) if confidence < min => UNASSIGNED_LABEL,
            _ => row.label.as_str(),
        };
        *totals.entry(class).or_insert(0) += row.abundance;
    }

    let mut summary: Vec<TaxonSummaryRow> = totals
        .into_iter()
        .map(|(class, abundance)| TaxonSummaryRow {
            predicted_class: class.to_string(),
            abundance,
        })
        .collect();
    summary.sort_by(|a, b| match b.abundance.cmp(&a.abundance) {
        Ordering::Equal => a.predicted_class.cmp(&b.predicted_class),
        other => other,
    });
    summary
}


fn csv_to_temp<T: Serialize>(dir: &Path, rows: &[T]) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary report in {}", dir.display()))?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    Ok(tmp)
}

/// Writes both reports. Each is fully written to a temporary file in the output
/// directory before either is moved into place.
pub fn write_reports(
    paths: &ReportPaths,
    rows: &[OtuReportRow],
    summary: &[TaxonSummaryRow],
) -> Result<(), PipelineError> {
    let io_error = |e: anyhow::Error| PipelineError::IOError(format!("{:#}", e));
    let dir = paths
        .otu_report
        .parent()
        .ok_or_else(|| PipelineError::IOError(format!("No parent directory for {}", paths.otu_report.display())))?;

    let otu_tmp = csv_to_temp(dir, rows).map_err(io_error)?;
    let summary_tmp = csv_to_temp(dir, summary).map_err(io_error)?;

    otu_tmp
        .persist(&paths.otu_report)
        .map_err(|e| PipelineError::IOError(format!("Failed to write {}: {}", paths.otu_report.display(), e)))?;
    if let Err(e) = summary_tmp.persist(&paths.summary_report) {
        if let Err(cleanup) = fs::remove_file(&paths.otu_report) {
            warn!("Failed to remove {}: {}", paths.otu_report.display(), cleanup);
        }
        return Err(PipelineError::IOError(format!("Failed to write {}: {}", paths.summary_report.display(), e)));
    }

    info!("OTU report written to {}", paths.otu_report.display());
    info!("Taxon summary written to {}", paths.summary_report.display());
    Ok(())
}


fn read_csv<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn read_otu_report(path: &Path) -> Result<Vec<OtuReportRow>> {
    read_csv(path)
}

pub fn read_summary_report(path: &Path) -> Result<Vec<TaxonSummaryRow>> {
    read_csv(path)
}
