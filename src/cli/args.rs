use clap::Parser;

use crate::config::defs::{
    DEFAULT_IDENTITY, DEFAULT_MAX_AMBIGUOUS, DEFAULT_MIN_LENGTH, DEFAULT_MODEL_PATH,
    DEFAULT_QUALITY_CUTOFF, CUTADAPT_TAG, VSEARCH_TAG,
};

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "jalnetra-pipelines", version, about = "eDNA OTU discovery and classification")]
pub struct Arguments {

    #[arg(short, long, help = "Pipeline module: edna_classify or classify_otus")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "file1", help = "Forward (R1) FASTQ, plain or gzipped")]
    pub file1: Option<String>,

    #[arg(short = 'I', long = "file2", help = "Reverse (R2) FASTQ, plain or gzipped")]
    pub file2: Option<String>,

    #[arg(long, help = "Size-annotated OTU FASTA (>id;size=N) for the classify_otus module")]
    pub otus: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. If not specified, a directory named '<sample_base>_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(short = 's', long = "sample-name")]
    pub sample_name: Option<String>,

    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    pub model: String,

    #[arg(short = 'k', long = "kmer-size", help = "K-mer size; must match the value the model was trained with. Defaults to the model's")]
    pub kmer_size: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_IDENTITY)]
    pub identity: f64,

    #[arg(short = 'a', long = "adapter-fwd")]
    pub adapter_fwd: Option<String>,

    #[arg(short = 'A', long = "adapter-rev")]
    pub adapter_rev: Option<String>,

    #[arg(short = 'q', long = "quality", default_value_t = DEFAULT_QUALITY_CUTOFF)]
    pub quality: u8,

    #[arg(long, default_value_t = DEFAULT_MIN_LENGTH)]
    pub min_length: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_AMBIGUOUS, help = "Largest tolerated fraction of ambiguous IUPAC bases per OTU sequence")]
    pub max_ambiguous: f64,

    #[arg(long, help = "OTUs below this confidence are summed under 'Unassigned' in the per-taxon summary")]
    pub min_confidence: Option<f64>,

    #[arg(long, default_value_t = 8)]
    pub threads: usize,

    #[arg(long, default_value = CUTADAPT_TAG)]
    pub cutadapt_bin: String,

    #[arg(long, default_value = VSEARCH_TAG)]
    pub vsearch_bin: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Arguments::parse_from(["jalnetra-pipelines", "-m", "edna_classify", "-i", "a_R1.fq", "-I", "a_R2.fq"]);
        assert_eq!(args.identity, 0.97);
        assert_eq!(args.quality, 20);
        assert_eq!(args.min_length, 150);
        assert_eq!(args.model, "models/tax_classifier.bin");
        assert_eq!(args.cutadapt_bin, "cutadapt");
        assert!(args.kmer_size.is_none());
        assert!(args.min_confidence.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = Arguments::parse_from([
            "jalnetra-pipelines", "-m", "classify_otus", "--otus", "otus.fasta",
            "-k", "4", "--identity", "0.99", "-a", "AGATCGGAAGAGC", "--min-confidence", "0.6",
        ]);
        assert_eq!(args.module, "classify_otus");
        assert_eq!(args.kmer_size, Some(4));
        assert_eq!(args.identity, 0.99);
        assert_eq!(args.adapter_fwd.as_deref(), Some("AGATCGGAAGAGC"));
        assert_eq!(args.min_confidence, Some(0.6));
    }
}
