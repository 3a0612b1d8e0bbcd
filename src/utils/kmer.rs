//! K-mer composition features for OTU exemplar sequences.
//!
//! A sequence is turned into a dense vector of 4^k k-mer frequencies. K-mers are
//! indexed by their 2-bit encoding with the first base most significant, so
//! `AAAA` is 0 and `TTTT` is 255 for k = 4. Windows that overlap an IUPAC
//! ambiguity code are skipped rather than counted.

use std::fmt;

use crate::config::defs::{PipelineError, MAX_KMER_SIZE};
use crate::utils::sequence::{classify_base, BaseClass, DNA};

/// Why a sequence was not turned into a feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    TooShort { len: usize, k: usize },
    NoInformativeKmers,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::TooShort { len, k } => write!(f, "sequence length {} is shorter than k={}", len, k),
            ExclusionReason::NoInformativeKmers => write!(f, "every k-mer window contains an ambiguous base"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOutcome {
    Vector(Vec<f64>),
    Excluded(ExclusionReason),
}

#[derive(Debug, Clone, Copy)]
pub struct KmerFeaturizer {
    k: usize,
    max_ambiguous_fraction: f64,
}

impl KmerFeaturizer {
    pub fn new(k: usize, max_ambiguous_fraction: f64) -> Result<Self, PipelineError> {
        if k == 0 || k > MAX_KMER_SIZE {
            return Err(PipelineError::InvalidConfig(format!(
                "k-mer size must be between 1 and {}, got {}", MAX_KMER_SIZE, k
            )));
        }
        if !(0.0..=1.0).contains(&max_ambiguous_fraction) {
            return Err(PipelineError::InvalidConfig(format!(
                "Ambiguous base tolerance must be within [0, 1], got {}", max_ambiguous_fraction
            )));
        }
        Ok(KmerFeaturizer { k, max_ambiguous_fraction })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn feature_len(&self) -> usize {
        feature_len(self.k)
    }

    /// Normalised k-mer frequencies of `seq`.
    ///
    /// # Arguments
    ///
    /// * `id` - Sequence identifier, used in error messages only.
    /// * `seq` - Bases, case-insensitive. IUPAC ambiguity codes are tolerated up to
    ///   the configured fraction; anything else is an error.
    ///
    /// # Returns
    /// A vector summing to 1, or the reason the sequence cannot be scored.
    pub fn extract(&self, id: &str, seq: &[u8]) -> Result<FeatureOutcome, PipelineError> {
        let mut ambiguous = 0usize;
        for (pos, &b) in seq.iter().enumerate() {
            match classify_base(b) {
                BaseClass::Unambiguous(_) => {}
                BaseClass::Ambiguous => ambiguous += 1,
                BaseClass::Invalid => {
                    return Err(PipelineError::InvalidSequence {
                        id: id.to_string(),
                        reason: format!("invalid character '{}' at position {}", b.escape_ascii(), pos + 1),
                    });
                }
            }
        }

        if seq.len() < self.k {
            return Ok(FeatureOutcome::Excluded(ExclusionReason::TooShort { len: seq.len(), k: self.k }));
        }

        let ambiguous_fraction = ambiguous as f64 / seq.len() as f64;
        if ambiguous_fraction > self.max_ambiguous_fraction {
            return Err(PipelineError::InvalidSequence {
                id: id.to_string(),
                reason: format!(
                    "{:.1}% ambiguous bases exceeds the {:.1}% tolerance",
                    ambiguous_fraction * 100.0,
                    self.max_ambiguous_fraction * 100.0
                ),
            });
        }

        let mask = self.feature_len() - 1;
        let mut counts = vec![0u32; self.feature_len()];
        let mut code = 0usize;
        let mut run = 0usize;
        let mut total = 0u64;
        for &b in seq {
            match DNA::from_byte(b) {
                Some(base) => {
                    code = ((code << 2) | base.code()) & mask;
                    run += 1;
                    if run >= self.k {
                        counts[code] += 1;
                        total += 1;
                    }
                }
                None => {
                    code = 0;
                    run = 0;
                }
            }
        }

        if total == 0 {
            return Ok(FeatureOutcome::Excluded(ExclusionReason::NoInformativeKmers));
        }
        let total = total as f64;
        Ok(FeatureOutcome::Vector(counts.into_iter().map(|c| c as f64 / total).collect()))
    }
}

/// Number of distinct k-mers over ACGT.
pub fn feature_len(k: usize) -> usize {
    1usize << (2 * k)
}

/// Feature index of an unambiguous k-mer.
pub fn kmer_index(kmer: &[u8]) -> Option<usize> {
    kmer.iter()
        .try_fold(0usize, |acc, &b| DNA::from_byte(b).map(|base| (acc << 2) | base.code()))
}
