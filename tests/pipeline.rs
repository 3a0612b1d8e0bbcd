#![cfg(unix)]

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use tempfile::{tempdir, TempDir};

use jalnetra_pipelines::config::defs::{PipelineError, RunConfig, MODEL_FORMAT_VERSION, TEMP_DIR_NAME, TRIMMED_R1};
use jalnetra_pipelines::pipelines::state::{PipelineStage, StageError};
use jalnetra_pipelines::pipelines::{classify_otus, edna_classify};
use jalnetra_pipelines::utils::fastx::fastq_generator;
use jalnetra_pipelines::utils::file::WriteToFile;
use jalnetra_pipelines::utils::kmer::kmer_index;
use jalnetra_pipelines::utils::model::{ModelArtifact, MultiClass};
use jalnetra_pipelines::utils::report::{read_otu_report, read_summary_report, ReportPaths};
use jalnetra_pipelines::Arguments;

// 25 read pairs go in, so every fixture accounts for 50 reads.
const READ_PAIRS: usize = 25;
const UNIQUES: &str = ">r1;size=40\nACGTACGTACGT\n>r2;size=8\nACGTACGTACGA\n>r3;size=2\nTTTTAAAACCCC\n";
const CENTROIDS: &str = ">r1;size=48\nACGTACGTACGT\n>r3;size=2\nTTTTAAAACCCC\n";
const UC: &str = "S\t0\t12\t*\t*\t*\t*\t*\tr1;size=40\t*\n\
                  H\t0\t12\t91.7\t+\t0\t0\t11M1I\tr2;size=8\tr1;size=40\n\
                  S\t1\t12\t*\t*\t*\t*\t*\tr3;size=2\t*\n\
                  C\t0\t2\t*\t*\t*\t*\t*\tr1;size=40\t*\n\
                  C\t1\t1\t*\t*\t*\t*\t*\tr3;size=2\t*\n";

const FAKE_CUTADAPT: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo 4.4; exit 0; fi
inputs=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out1="$2"; shift 2 ;;
    -p) out2="$2"; shift 2 ;;
    -q|-m|-a|-A|-j) shift 2 ;;
    *) inputs="$inputs $1"; shift ;;
  esac
done
set -- $inputs
cp "$1" "$out1"
cp "$2" "$out2"
"#;

/// Stub vsearch that answers with canned files from `fixtures`. `cluster_body`
/// replaces the clustering step when given.
fn fake_vsearch(fixtures: &Path, cluster_body: Option<&str>) -> String {
    let fixtures = fixtures.display();
    let default_cluster = format!(r#"cp "{fixtures}/otus.fasta" "$centroids"; cp "{fixtures}/clusters.uc" "$uc""#);
    let cluster = cluster_body.map(str::to_string).unwrap_or(default_cluster);
    format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "vsearch v2.22.1_linux_x86_64, 1.0GB RAM, 2 cores" 1>&2; exit 0; fi
mode="$1"
shift 2
while [ $# -gt 0 ]; do
  case "$1" in
    --fastaout) fastaout="$2"; shift 2 ;;
    --centroids) centroids="$2"; shift 2 ;;
    --uc) uc="$2"; shift 2 ;;
    --id|--threads|--minseqlength) shift 2 ;;
    *) shift ;;
  esac
done
case "$mode" in
  --fastx_uniques) cp "{fixtures}/uniques.fasta" "$fastaout" ;;
  --cluster_size) {cluster} ;;
  *) echo "unexpected mode $mode" 1>&2; exit 2 ;;
esac
"#
    )
}

fn write_script(path: &Path, body: &str) -> Result<()> {
    fs::write(path, body)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn write_reads(path: &Path, reads: usize) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in fastq_generator(reads, 200, 35.0, 3.0)? {
        record.write_to_file(&mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Two-label k=4 model: ACGT-repeat k-mers vote Arthropoda, the poly-T/A/C run votes Ascomycota.
fn write_model(path: &Path) -> Result<()> {
    let mut coefficients = vec![vec![0.0; 256]; 2];
    for kmer in ["ACGT", "CGTA", "GTAC", "TACG"] {
        coefficients[0][kmer_index(kmer.as_bytes()).ok_or_else(|| anyhow!("bad kmer {}", kmer))?] = 5.0;
    }
    for kmer in ["TTTT", "TTTA", "TTAA", "TAAA", "AAAA", "AAAC", "AACC", "ACCC", "CCCC"] {
        coefficients[1][kmer_index(kmer.as_bytes()).ok_or_else(|| anyhow!("bad kmer {}", kmer))?] = 5.0;
    }
    ModelArtifact {
        format_version: MODEL_FORMAT_VERSION,
        kmer_size: 4,
        feature_len: 256,
        labels: vec!["Arthropoda".to_string(), "Ascomycota".to_string()],
        coefficients,
        intercepts: vec![0.0, 0.0],
        multi_class: MultiClass::Multinomial,
    }
        .save(path)
}

struct Workspace {
    dir: TempDir,
    out_dir: PathBuf,
}

impl Workspace {
    fn new(centroids: &str, uc: &str, cluster_body: Option<&str>) -> Result<Self> {
        Self::with_uniques(UNIQUES, centroids, uc, cluster_body)
    }

    fn with_uniques(uniques: &str, centroids: &str, uc: &str, cluster_body: Option<&str>) -> Result<Self> {
        let dir = tempdir()?;
        let fixtures = dir.path().join("fixtures");
        fs::create_dir_all(&fixtures)?;
        fs::write(fixtures.join("uniques.fasta"), uniques)?;
        fs::write(fixtures.join("otus.fasta"), centroids)?;
        fs::write(fixtures.join("clusters.uc"), uc)?;

        write_script(&dir.path().join("cutadapt"), FAKE_CUTADAPT)?;
        write_script(&dir.path().join("vsearch"), &fake_vsearch(&fixtures, cluster_body))?;
        write_reads(&dir.path().join("pond_R1.fastq"), READ_PAIRS)?;
        write_reads(&dir.path().join("pond_R2.fastq"), READ_PAIRS)?;
        write_model(&dir.path().join("model.bin"))?;

        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir)?;
        Ok(Workspace { dir, out_dir })
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().to_string()
    }

    fn config(&self, module: &str, extra: &[&str]) -> Result<Arc<RunConfig>> {
        let (r1, r2, model) = (self.path("pond_R1.fastq"), self.path("pond_R2.fastq"), self.path("model.bin"));
        let (cutadapt, vsearch) = (self.path("cutadapt"), self.path("vsearch"));
        let mut argv = vec![
            "jalnetra-pipelines", "-m", module,
            "-i", r1.as_str(), "-I", r2.as_str(),
            "--model", model.as_str(),
            "--cutadapt-bin", cutadapt.as_str(),
            "--vsearch-bin", vsearch.as_str(),
        ];
        argv.extend_from_slice(extra);
        let args = Arguments::parse_from(argv);
        let config = RunConfig::new(
            args,
            self.dir.path().to_path_buf(),
            self.out_dir.clone(),
            "pond".to_string(),
            2,
            0,
        )?;
        Ok(Arc::new(config))
    }

    fn reports(&self) -> ReportPaths {
        ReportPaths::new(&self.out_dir, "pond")
    }
}


#[tokio::test]
async fn test_edna_classify_end_to_end() -> Result<()> {
    let ws = Workspace::new(CENTROIDS, UC, None)?;
    let paths = edna_classify::run(ws.config("edna_classify", &[])?).await?;
    assert_eq!(paths, ws.reports());

    let rows = read_otu_report(&paths.otu_report)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.iter().map(|r| r.abundance).sum::<u64>(), 2 * READ_PAIRS as u64);
    assert_eq!((rows[0].otu_id.as_str(), rows[0].abundance), ("r1", 48));
    assert_eq!((rows[1].otu_id.as_str(), rows[1].abundance), ("r3", 2));
    assert_eq!(rows[0].label, "Arthropoda");
    assert_eq!(rows[1].label, "Ascomycota");
    for row in &rows {
        let confidence = row.confidence.ok_or_else(|| anyhow!("missing confidence for {}", row.otu_id))?;
        assert!((0.0..=1.0).contains(&confidence));
    }

    let summary = read_summary_report(&paths.summary_report)?;
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].predicted_class, "Arthropoda");
    assert_eq!(summary[0].abundance, 48);

    // intermediates stay in the working directory
    assert!(ws.out_dir.join(TEMP_DIR_NAME).join(TRIMMED_R1).is_file());
    Ok(())
}

#[tokio::test]
async fn test_empty_clustering_fails_without_report() -> Result<()> {
    let ws = Workspace::new("", "", None)?;
    match edna_classify::run(ws.config("edna_classify", &[])?).await {
        Err(StageError { stage, source: PipelineError::EmptyResult(_) }) => {
            assert_eq!(stage, PipelineStage::Clustering);
        }
        other => panic!("expected EmptyResult during clustering, got {:?}", other),
    }
    assert!(!ws.reports().otu_report.exists());
    assert!(!ws.reports().summary_report.exists());
    Ok(())
}

#[tokio::test]
async fn test_clustering_tool_failure_is_stage_tagged() -> Result<()> {
    let ws = Workspace::new(CENTROIDS, UC, Some("echo 'Fatal error: Unable to allocate enough memory' 1>&2; exit 1"))?;
    let err = match edna_classify::run(ws.config("edna_classify", &[])?).await {
        Err(err) => err,
        Ok(paths) => panic!("expected failure, reports written to {:?}", paths),
    };
    assert_eq!(err.stage, PipelineStage::Clustering);
    assert!(matches!(err.source, PipelineError::ExternalTool { .. }));
    let message = err.to_string();
    assert!(message.starts_with("Clustering failed: vsearch failed"));
    assert!(message.contains("Unable to allocate"));
    assert!(!ws.reports().otu_report.exists());
    Ok(())
}

#[tokio::test]
async fn test_inconsistent_uc_is_rejected() -> Result<()> {
    let bad_centroids = ">r1;size=40\nACGTACGTACGT\n>r3;size=2\nTTTTAAAACCCC\n";
    let ws = Workspace::new(bad_centroids, UC, None)?;
    let err = match edna_classify::run(ws.config("edna_classify", &[])?).await {
        Err(err) => err,
        Ok(_) => panic!("expected a size mismatch"),
    };
    assert_eq!(err.stage, PipelineStage::Clustering);
    assert!(matches!(err.source, PipelineError::ExternalTool { .. }));
    Ok(())
}

#[tokio::test]
async fn test_reads_lost_in_dereplication_are_rejected() -> Result<()> {
    let short_uniques = ">r1;size=40\nACGTACGTACGT\n>r3;size=2\nTTTTAAAACCCC\n";
    let ws = Workspace::with_uniques(short_uniques, CENTROIDS, UC, None)?;
    let err = match edna_classify::run(ws.config("edna_classify", &[])?).await {
        Err(err) => err,
        Ok(_) => panic!("expected dereplication to be flagged"),
    };
    assert_eq!(err.stage, PipelineStage::Clustering);
    assert!(matches!(err.source, PipelineError::ExternalTool { .. }));
    assert!(err.to_string().contains("50 reads fed to dereplication but 42 came out"));
    assert!(!ws.reports().otu_report.exists());
    Ok(())
}

#[tokio::test]
async fn test_kmer_mismatch_fails_before_trimming() -> Result<()> {
    let ws = Workspace::new(CENTROIDS, UC, None)?;
    let err = match edna_classify::run(ws.config("edna_classify", &["-k", "6"])?).await {
        Err(err) => err,
        Ok(_) => panic!("expected a dimension mismatch"),
    };
    assert_eq!(err.stage, PipelineStage::Idle);
    assert!(matches!(err.source, PipelineError::DimensionMismatch { expected: 256, found: 4096 }));
    assert!(!ws.out_dir.join(TEMP_DIR_NAME).join(TRIMMED_R1).exists());
    Ok(())
}

#[tokio::test]
async fn test_bad_identity_fails_before_trimming() -> Result<()> {
    let ws = Workspace::new(CENTROIDS, UC, None)?;
    let err = match edna_classify::run(ws.config("edna_classify", &["--identity", "97"])?).await {
        Err(err) => err,
        Ok(_) => panic!("expected an identity out of range"),
    };
    assert_eq!(err.stage, PipelineStage::Idle);
    assert!(matches!(err.source, PipelineError::InvalidConfig(_)));
    assert!(err.to_string().starts_with("Startup failed"));
    assert!(!ws.out_dir.join(TEMP_DIR_NAME).join(TRIMMED_R1).exists());
    Ok(())
}

#[tokio::test]
async fn test_classify_otus_excludes_short_sequences() -> Result<()> {
    let ws = Workspace::new(CENTROIDS, UC, None)?;
    let otus = ws.dir.path().join("otus_in.fasta");
    fs::write(&otus, ">r1;size=120\nACGTACGTACGT\n>r3;size=5\nTTTTAAAACCCC\n>tiny;size=3\nACG\n")?;
    let otus_arg = otus.to_string_lossy().to_string();

    let config = ws.config("classify_otus", &["--otus", otus_arg.as_str(), "--min-confidence", "0.999"])?;
    let paths = classify_otus::run(config).await?;

    let rows = read_otu_report(&paths.otu_report)?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().map(|r| r.abundance).sum::<u64>(), 128);
    let tiny = rows.iter().find(|r| r.otu_id == "tiny").ok_or_else(|| anyhow!("tiny missing"))?;
    assert_eq!(tiny.label, "Excluded");
    assert!(tiny.confidence.is_none());

    let summary = read_summary_report(&paths.summary_report)?;
    assert_eq!(summary.iter().map(|r| r.abundance).sum::<u64>(), 128);
    assert!(summary.iter().any(|r| r.predicted_class == "Excluded" && r.abundance == 3));
    Ok(())
}

#[tokio::test]
async fn test_missing_model_is_startup_error() -> Result<()> {
    let ws = Workspace::new(CENTROIDS, UC, None)?;
    fs::remove_file(ws.dir.path().join("model.bin"))?;
    let err = match edna_classify::run(ws.config("edna_classify", &[])?).await {
        Err(err) => err,
        Ok(_) => panic!("expected a model load failure"),
    };
    assert_eq!(err.stage, PipelineStage::Idle);
    assert!(matches!(err.source, PipelineError::ModelLoad(_)));
    assert!(err.to_string().starts_with("Startup failed"));
    Ok(())
}
