use seq_io::fasta::{Reader as FastaReader, OwnedRecord as FastaOwnedRecord};
use seq_io::fastq::{Reader as FastqReader, OwnedRecord as FastqOwnedRecord};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use flate2::read::GzDecoder;
use crate::config::defs::{FASTA_EXTS, FASTA_TAG, FASTQ_EXTS, FASTQ_TAG};
use crate::utils::file::{extension_remover, is_gzipped, FileReader, WriteToFile};
use crate::utils::sequence::{normal_phred_qual_string, DNA};
use std::collections::HashMap;
use lazy_static::lazy_static;

lazy_static! {
    static ref R1_R2_TAGS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("R1", "R2");
        m.insert("r1", "r2");
        m.insert("1", "2");
        m.insert("F", "R");
        m.insert("f", "r");
        m.insert("FWD", "REV");
        m.insert("fwd", "rev");
        m.insert("PE1", "PE2");
        m.insert("pe1", "pe2");
        m.insert("READ1", "READ2");
        m.insert("read1", "read2");
        m
    };
}

/// Defines FASTA and FASTQ as part of a unified FASTX structure.
#[derive(Clone, Debug)]
pub enum SequenceRecord {
    Fasta {
        id: String,
        desc: Option<String>,
        seq: Vec<u8>,
    },
    Fastq {
        id: String,
        desc: Option<String>,
        seq: Vec<u8>,
        qual: Vec<u8>,
    },
}

/// Maps id and seq to the correct file type.
impl SequenceRecord {
    pub fn id(&self) -> &str {
        match self {
            SequenceRecord::Fasta { id, .. } => id,
            SequenceRecord::Fastq { id, .. } => id,
        }
    }

    pub fn seq(&self) -> &[u8] {
        match self {
            SequenceRecord::Fasta { seq, .. } => seq,
            SequenceRecord::Fastq { seq, .. } => seq,
        }
    }
}

impl From<FastaOwnedRecord> for SequenceRecord {
    fn from(record: FastaOwnedRecord) -> Self {
        let (id, desc) = parse_header(&record.head, '>');
        SequenceRecord::Fasta {
            id,
            desc,
            seq: record.seq,
        }
    }
}

impl From<FastqOwnedRecord> for SequenceRecord {
    fn from(record: FastqOwnedRecord) -> Self {
        let (id, desc) = parse_header(&record.head, '@');
        SequenceRecord::Fastq {
            id,
            desc,
            seq: record.seq,
            qual: record.qual,
        }
    }
}


/// Enum to hold either FASTA or FASTQ reader
pub enum SequenceReader {
    Fasta(FastaReader<FileReader>),
    Fastq(FastqReader<FileReader>),
}

impl SequenceReader {
    /// Drains the reader into owned records, stopping at the first parse error.
    pub fn into_owned_records(self) -> io::Result<Vec<SequenceRecord>> {
        let mut records = Vec::new();
        match self {
            SequenceReader::Fasta(reader) => {
                for result in reader.into_records() {
                    let record = result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    records.push(record.into());
                }
            }
            SequenceReader::Fastq(reader) => {
                for result in reader.into_records() {
                    let record = result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    records.push(record.into());
                }
            }
        }
        Ok(records)
    }
}

/// Creates a SequenceReader for either FASTA or FASTQ files.
///
///
/// # Arguments
///
/// * `path`: &Path - Valid path to a fastx file.
///
/// # Returns
/// io::Result<SequenceReader>: Result bearing the correct SequenceReader.
///
pub fn sequence_reader(path: &Path) -> io::Result<SequenceReader> {
    let file = File::open(path)?;
    let is_gz = is_gzipped(path)?;
    let reader = if is_gz {
        FileReader::Gzipped(GzDecoder::new(file))
    } else {
        FileReader::Uncompressed(BufReader::new(file))
    };

    let is_fasta = fastx_filetype(path)?;
    match is_fasta.as_str() {
        FASTA_TAG => Ok(SequenceReader::Fasta(FastaReader::new(reader))),
        FASTQ_TAG => Ok(SequenceReader::Fastq(FastqReader::new(reader))),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported file type for path: {:?}", path),
        )),
    }
}


/// Implementation for SequenceRecord
impl WriteToFile for SequenceRecord {
    fn write_to_file<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            SequenceRecord::Fastq { id, desc, seq, qual } => {
                write_fastq_record(writer, id, desc.as_deref(), seq, qual)
            }
            SequenceRecord::Fasta { id, desc, seq } => {
                write_fasta_record(writer, id, desc.as_deref(), seq)
            }
        }
    }
}

pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    id: &str,
    desc: Option<&str>,
    seq: &[u8],
) -> io::Result<()> {
    // Write header
    writer.write_all(b">")?;
    writer.write_all(id.as_bytes())?;
    if let Some(desc) = desc {
        writer.write_all(b" ")?;
        writer.write_all(desc.as_bytes())?;
    }
    writer.write_all(b"\n")?;

    // Write sequence (with line wrapping, e.g., 80 chars per line)
    for chunk in seq.chunks(80) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

pub fn write_fastq_record<W: Write>(
    writer: &mut W,
    id: &str,
    desc: Option<&str>,
    seq: &[u8],
    qual: &[u8],
) -> io::Result<()> {
    // Write header
    writer.write_all(b"@")?;
    writer.write_all(id.as_bytes())?;
    if let Some(desc) = desc {
        writer.write_all(b" ")?;
        writer.write_all(desc.as_bytes())?;
    }
    writer.write_all(b"\n")?;

    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}


/// Determines if a file path is a FASTA, FASTQ, or neither.
/// Checks extensions, not the body.
///
/// # Arguments
///
/// * `path` - Path of a FASTX file, optionally gzipped.
///
/// # Returns
/// Result<String>. Ok fastq or fasta, or err.
///
fn fastx_filetype(path: &Path) -> io::Result<String> {
    let (_, extensions) = extension_remover(path);

    for ext in &extensions {
        if FASTA_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)) {
            return Ok(FASTA_TAG.to_string());
        }

        if FASTQ_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)) {
            return Ok(FASTQ_TAG.to_string());
        }
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "File '{}' has invalid extension(s) '{:?}'. Expected FASTA ({:?}) or FASTQ ({:?}).",
            path.display(),
            extensions,
            FASTA_EXTS,
            FASTQ_EXTS
        ),
    ))
}


/// Tries to locate an R1 tag (R1, _1, fwd, ...) in a read file name and returns
/// the sample prefix in front of it.
///
/// # Arguments
///
/// * `path` - Path to the forward read file.
///
/// # Returns
/// The prefix, or None when no tag is found.
///
pub fn r1r2_base(path: &Path) -> Option<String> {
    let delimiters = ['_', '.', '-'];
    let (stem, _) = extension_remover(path);
    let filename = stem.file_name().and_then(|name| name.to_str())?;

    for &delimiter in delimiters.iter() {
        let parts: Vec<&str> = filename.split(delimiter).collect();
        // index 0 is never a tag, otherwise there would be no prefix
        for (index, part) in parts.iter().enumerate().skip(1) {
            if R1_R2_TAGS.contains_key(part) {
                return Some(parts[..index].join(&delimiter.to_string()));
            }
        }
    }
    None
}

/// Derives a sample name from a read file: the prefix before its R1 tag, or
/// the bare file stem when no tag is present.
pub fn sample_base_name(path: &Path) -> String {
    if let Some(prefix) = r1r2_base(path) {
        return prefix;
    }
    let (stem, _) = extension_remover(path);
    stem.file_name()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "default_sample".to_string())
}

/// Parses a FASTX header.
///
///
/// # Arguments
///
/// * `head` - Header line of a FASTX record.
/// * 'prefix' - Leading, defining character of the header. > for FASTA, @ for FASTQ.
///
/// # Returns
/// Tuple: (id, desc) split of header on whitespace.
///
fn parse_header(head: &[u8], prefix: char) -> (String, Option<String>) {
    let head_str = String::from_utf8_lossy(head).into_owned();
    let parts: Vec<&str> = head_str.splitn(2, |c: char| c.is_whitespace()).collect();
    let id = parts[0].trim_start_matches(prefix).to_string();
    let desc = parts.get(1).map(|s| s.to_string()).filter(|s| !s.is_empty());
    (id, desc)
}



/// Counts the number of records in a FASTX file. Parse errors are returned, not skipped.
///
///
/// # Arguments
///
/// * `path` - Valid path to a fasta or fastq file.
///
/// # Returns
/// u64: Number of records in the file.
///
pub fn record_counter(path: &Path) -> io::Result<u64> {
    let mut counter = 0;
    match sequence_reader(path)? {
        SequenceReader::Fasta(reader) => {
            for result in reader.into_records() {
                result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                counter += 1;
            }
        }
        SequenceReader::Fastq(reader) => {
            for result in reader.into_records() {
                result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                counter += 1;
            }
        }
    }
    Ok(counter)
}


/// Concatenates FASTQ files record by record into one uncompressed FASTQ.
///
/// # Arguments
///
/// * `inputs` - FASTQ files, plain or gzipped.
/// * `out_path` - Destination.
///
/// # Returns
/// Number of records written.
pub fn concatenate_fastq(inputs: &[PathBuf], out_path: &Path) -> io::Result<u64> {
    let mut writer = BufWriter::new(File::create(out_path)?);
    let mut written = 0u64;
    for input in inputs {
        match sequence_reader(input)? {
            SequenceReader::Fastq(reader) => {
                for result in reader.into_records() {
                    let record = result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    let record: SequenceRecord = record.into();
                    record.write_to_file(&mut writer)?;
                    written += 1;
                }
            }
            SequenceReader::Fasta(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Expected FASTQ input, got FASTA: {}", input.display()),
                ));
            }
        }
    }
    writer.flush()?;
    Ok(written)
}


/// Synthetic FASTQ records with random bases and normally distributed qualities.
///
/// # Arguments
///
/// * `num_reads` - Records to generate.
/// * `read_size` - Bases per record; 0 yields no records.
/// * `mean`, `stdev` - Phred quality distribution.
pub fn fastq_generator(num_reads: usize, read_size: usize, mean: f32, stdev: f32) -> anyhow::Result<Vec<SequenceRecord>> {
    if read_size == 0 {
        return Ok(Vec::new());
    }
    (0..num_reads)
        .map(|i| {
            Ok(SequenceRecord::Fastq {
                id: format!("read{}", i),
                desc: None,
                seq: DNA::random_sequence(read_size).into_bytes(),
                qual: normal_phred_qual_string(read_size, mean, stdev)?.into_bytes(),
            })
        })
        .collect()
}
