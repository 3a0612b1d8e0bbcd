use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::config::defs::{PipelineError, FASTA_EXTS, FASTQ_EXTS, GZIP_EXT};


/// Enum to hold either an uncompressed or gzipped file reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(GzDecoder<File>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

/// Anything that knows how to serialise itself as a FASTX record.
pub trait WriteToFile {
    fn write_to_file<W: Write>(&self, writer: &mut W) -> io::Result<()>;
}

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


/// Strips the known FASTX and gzip extensions off a path.
///
/// # Arguments
///
/// * `path` - e.g. `sample_R1.fastq.gz`
///
/// # Returns
/// (path without the extensions, extensions in order) e.g. (`sample_R1`, [`fastq`, `gz`])
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();
    while let Some(ext) = stem.extension().and_then(|e| e.to_str()).map(str::to_string) {
        let known = ext.eq_ignore_ascii_case(GZIP_EXT)
            || FASTA_EXTS.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            || FASTQ_EXTS.iter().any(|e| e.eq_ignore_ascii_case(&ext));
        if !known {
            break;
        }
        extensions.insert(0, ext);
        stem.set_extension("");
    }
    (stem, extensions)
}


/// Builds a new path from an existing one by optionally relocating it and decorating
/// its file name with a prefix and/or suffix.
///
/// # Arguments
///
/// * `path` - Base path or bare file name.
/// * `dir` - Directory to place the result in. Relative `path`s are joined onto it.
/// * `prefix` - Prepended to the file name, followed by `delimiter`.
/// * `suffix` - Appended to the file name, preceded by `delimiter`.
///
/// # Returns
/// PathBuf
pub fn file_path_manipulator(
    path: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let base = match dir {
        Some(d) if path.is_relative() => d.join(path),
        _ => path.to_path_buf(),
    };
    let file_name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = String::new();
    if let Some(p) = prefix {
        name.push_str(p);
        name.push_str(delimiter);
    }
    name.push_str(&file_name);
    if let Some(s) = suffix {
        name.push_str(delimiter);
        name.push_str(s);
    }

    match base.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}


/// Checks that a user-supplied input file exists, is a regular file and is not empty.
pub fn validate_input_file(path: &Path, label: &str) -> Result<PathBuf, PipelineError> {
    let metadata = fs::metadata(path)
        .map_err(|e| PipelineError::Input(format!("Cannot find {} at {}: {}", label, path.display(), e)))?;
    if !metadata.is_file() {
        return Err(PipelineError::Input(format!("{} at {} is not a file", label, path.display())));
    }
    if metadata.len() == 0 {
        return Err(PipelineError::Input(format!("{} at {} is empty", label, path.display())));
    }
    Ok(path.to_path_buf())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extension_remover() {
        let (stem, exts) = extension_remover(Path::new("/data/sample_R1.fastq.gz"));
        assert_eq!(stem, PathBuf::from("/data/sample_R1"));
        assert_eq!(exts, vec!["fastq".to_string(), "gz".to_string()]);

        let (stem, exts) = extension_remover(Path::new("run.v2.txt"));
        assert_eq!(stem, PathBuf::from("run.v2.txt"));
        assert!(exts.is_empty());
    }

    #[test]
    fn test_file_path_manipulator() {
        let out = file_path_manipulator(Path::new("sample"), Some(Path::new("/out")), None, Some("otu_report.csv"), "_");
        assert_eq!(out, PathBuf::from("/out/sample_otu_report.csv"));

        let abs = file_path_manipulator(Path::new("/in/reads.fq"), Some(Path::new("/out")), Some("trimmed"), None, ".");
        assert_eq!(abs, PathBuf::from("/in/trimmed.reads.fq"));
    }

    #[test]
    fn test_validate_input_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let missing = dir.path().join("missing.fq");
        assert!(matches!(validate_input_file(&missing, "R1"), Err(PipelineError::Input(_))));

        let empty = dir.path().join("empty.fq");
        File::create(&empty)?;
        assert!(matches!(validate_input_file(&empty, "R1"), Err(PipelineError::Input(_))));
        assert!(!is_gzipped(&empty)?);

        let full = dir.path().join("full.fq");
        fs::write(&full, "@r1\nACGT\n+\nIIII\n")?;
        assert_eq!(validate_input_file(&full, "R1")?, full);
        assert!(matches!(validate_input_file(dir.path(), "R1"), Err(PipelineError::Input(_))));
        Ok(())
    }
}
