// OTU table and parsers for vsearch clustering output
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fxhash::{FxHashMap, FxHashSet};

use crate::config::defs::PipelineError;
use crate::utils::fastx::sequence_reader;

/// One operational taxonomic unit: a cluster centroid and the reads it absorbed.
#[derive(Debug, Clone, PartialEq)]
pub struct Otu {
    pub id: String,
    pub sequence: Vec<u8>,
    pub abundance: u64,
}

/// Ordered OTUs plus the dereplicated read total that went into clustering.
#[derive(Debug, Clone)]
pub struct OtuTable {
    otus: Vec<Otu>,
    clustered_reads: u64,
}

impl OtuTable {
    /// # Arguments
    ///
    /// * `otus` - Centroids in output order.
    /// * `clustered_reads` - Reads fed to clustering; must equal the summed abundance.
    ///
    /// # Returns
    /// EmptyResult when `otus` is empty, Consistency on duplicate ids, zero
    /// abundance or an abundance total that disagrees with `clustered_reads`.
    pub fn new(otus: Vec<Otu>, clustered_reads: u64) -> Result<Self, PipelineError> {
        if otus.is_empty() {
            return Err(PipelineError::EmptyResult("Clustering produced no OTUs".to_string()));
        }
        let mut seen = FxHashSet::default();
        for otu in &otus {
            if !seen.insert(otu.id.as_str()) {
                return Err(PipelineError::Consistency(format!("Duplicate OTU id '{}'", otu.id)));
            }
            if otu.abundance == 0 {
                return Err(PipelineError::Consistency(format!("OTU '{}' has zero abundance", otu.id)));
            }
        }
        let total: u64 = otus.iter().map(|otu| otu.abundance).sum();
        if total != clustered_reads {
            return Err(PipelineError::Consistency(format!(
                "OTU abundances sum to {} but {} reads were clustered",
                total, clustered_reads
            )));
        }
        Ok(OtuTable { otus, clustered_reads })
    }

    pub fn otus(&self) -> &[Otu] {
        &self.otus
    }

    pub fn len(&self) -> usize {
        self.otus.len()
    }

    pub fn clustered_reads(&self) -> u64 {
        self.clustered_reads
    }
}


/// Splits a vsearch label such as `read7;size=12;` into its id and size.
/// Returns None for the size when the label carries no annotation.
pub fn split_size_annotation(label: &str) -> Result<(String, Option<u64>)> {
    let mut id_fields = Vec::new();
    let mut size = None;
    for field in label.split(';') {
        if let Some(value) = field.strip_prefix("size=") {
            let parsed = value
                .parse::<u64>()
                .map_err(|_| anyhow!("Invalid size annotation '{}' in '{}'", value, label))?;
            size = Some(parsed);
        } else if !field.is_empty() {
            id_fields.push(field);
        }
    }
    if id_fields.is_empty() {
        return Err(anyhow!("Label '{}' has no identifier", label));
    }
    Ok((id_fields.join(";"), size))
}


/// Reads a size-annotated FASTA (`>id;size=N`) into OTUs, in file order.
/// Every header must carry a size.
pub fn read_size_annotated_fasta(path: &Path) -> Result<Vec<Otu>> {
    let records = sequence_reader(path)
        .and_then(|reader| reader.into_owned_records())
        .with_context(|| format!("Failed to read {}", path.display()))?;

    records
        .into_iter()
        .map(|record| {
            let (id, size) = split_size_annotation(record.id())?;
            let abundance = size.ok_or_else(|| anyhow!("Header '{}' lacks a ;size= annotation", record.id()))?;
            Ok(Otu {
                id,
                sequence: record.seq().to_vec(),
                abundance,
            })
        })
        .collect()
}

/// Sum of `;size=` annotations in a FASTA, i.e. the read total it represents.
pub fn size_annotated_total(path: &Path) -> Result<u64> {
    Ok(read_size_annotated_fasta(path)?.iter().map(|otu| otu.abundance).sum())
}


#[derive(Debug, Clone, PartialEq)]
pub struct UcCluster {
    pub centroid: String,
    pub members: u64,
}

/// Parses a vsearch UC file into cluster number → centroid id and summed member
/// abundance. `S` and `H` records contribute; `C` and `N` records are skipped.
pub fn parse_uc(path: &Path) -> Result<FxHashMap<u64, UcCluster>> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("Failed to open {}", path.display()))?);
    let mut totals: FxHashMap<u64, u64> = FxHashMap::default();
    let mut centroids: FxHashMap<u64, String> = FxHashMap::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 10 {
            return Err(anyhow!("{}:{}: expected 10 fields, found {}", path.display(), line_no + 1, fields.len()));
        }
        let record_type = fields[0];
        match record_type {
            "S" | "H" => {
                let cluster = fields[1]
                    .parse::<u64>()
                    .map_err(|_| anyhow!("{}:{}: bad cluster number '{}'", path.display(), line_no + 1, fields[1]))?;
                let (id, size) = split_size_annotation(fields[8])?;
                *totals.entry(cluster).or_insert(0) += size.unwrap_or(1);
                if record_type == "S" && centroids.insert(cluster, id).is_some() {
                    return Err(anyhow!("{}:{}: cluster {} has two centroids", path.display(), line_no + 1, cluster));
                }
            }
            "C" | "N" => {}
            other => {
                return Err(anyhow!("{}:{}: unknown record type '{}'", path.display(), line_no + 1, other));
            }
        }
    }

    totals
        .into_iter()
        .map(|(cluster, members)| {
            let centroid = centroids
                .remove(&cluster)
                .ok_or_else(|| anyhow!("Cluster {} has members but no centroid record", cluster))?;
            Ok((cluster, UcCluster { centroid, members }))
        })
        .collect()
}

/// Cross-checks centroid abundances against the UC membership totals.
pub fn reconcile(centroids: &[Otu], clusters: &FxHashMap<u64, UcCluster>) -> Result<()> {
    let by_centroid: FxHashMap<&str, u64> = clusters
        .values()
        .map(|cluster| (cluster.centroid.as_str(), cluster.members))
        .collect();

    if by_centroid.len() != centroids.len() {
        return Err(anyhow!(
            "{} centroids in FASTA but {} clusters in UC file",
            centroids.len(),
            by_centroid.len()
        ));
    }

    let mut seen = FxHashSet::default();
    for otu in centroids {
        if !seen.insert(otu.id.as_str()) {
            return Err(anyhow!("Duplicate centroid id '{}'", otu.id));
        }
        if otu.abundance == 0 {
            return Err(anyhow!("Centroid '{}' has zero abundance", otu.id));
        }
        match by_centroid.get(otu.id.as_str()) {
            Some(&members) if members == otu.abundance => {}
            Some(&members) => {
                return Err(anyhow!(
                    "Centroid '{}' reports size {} but its cluster holds {} reads",
                    otu.id, otu.abundance, members
                ));
            }
            None => return Err(anyhow!("Centroid '{}' has no cluster in the UC file", otu.id)),
        }
    }
    Ok(())
}
