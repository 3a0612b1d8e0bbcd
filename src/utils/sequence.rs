use anyhow::{anyhow, Result};
use rand::rngs::ThreadRng;
use rand::seq::IndexedRandom;
use rand::rng;
use rand_distr::{Normal, Distribution};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DNA {
    A,
    C,
    G,
    T,
}

/// How a single sequence byte is treated by the k-mer featurizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaseClass {
    Unambiguous(DNA),
    Ambiguous,
    Invalid,
}

impl DNA {
    /// Convert nucleotide to its character representation.
    pub fn to_char(&self) -> char {
        match self {
            DNA::A => 'A',
            DNA::C => 'C',
            DNA::G => 'G',
            DNA::T => 'T',
        }
    }

    /// Case-insensitive parse of a single base.
    pub fn from_byte(b: u8) -> Option<DNA> {
        match b.to_ascii_uppercase() {
            b'A' => Some(DNA::A),
            b'C' => Some(DNA::C),
            b'G' => Some(DNA::G),
            b'T' => Some(DNA::T),
            _ => None,
        }
    }

    /// 2-bit code, A=0 C=1 G=2 T=3.
    pub fn code(&self) -> usize {
        match self {
            DNA::A => 0,
            DNA::C => 1,
            DNA::G => 2,
            DNA::T => 3,
        }
    }

    /// Get all possible nucleotides as a static slice.
    pub fn all() -> &'static [DNA] {
        &[DNA::A, DNA::C, DNA::G, DNA::T]
    }

    /// Generate a random sequence of nucleotides of the given length.
    pub fn random_sequence(length: usize) -> String {
        let mut rng = rng();
        (0..length)
            .map(|_| DNA::random_with_rng(&mut rng).to_char())
            .collect()
    }

    /// Helper method to generate a random nucleotide with a provided RNG.
    fn random_with_rng(rng: &mut ThreadRng) -> DNA {
        *DNA::all()
            .choose(rng)
            .unwrap_or(&DNA::A)
    }
}

/// Classifies a byte as a definite base, an IUPAC ambiguity code, or garbage.
pub fn classify_base(b: u8) -> BaseClass {
    if let Some(dna) = DNA::from_byte(b) {
        return BaseClass::Unambiguous(dna);
    }
    match b.to_ascii_uppercase() {
        b'N' | b'R' | b'Y' | b'S' | b'W' | b'K' | b'M' | b'B' | b'D' | b'H' | b'V' => BaseClass::Ambiguous,
        _ => BaseClass::Invalid,
    }
}

fn phred33(score: u8) -> u8 {
    score + 33
}

fn normal_phred_qual(normal: &Normal<f32>) -> u8 {
    let mut raw_phred = -1.0;
    while !(0.0..=40.0).contains(&raw_phred) {
        raw_phred = normal.sample(&mut rand::rng());
    }
    phred33(raw_phred as u8)
}

/// Phred+33 quality string with scores drawn from N(mean, stdev), clamped to 0..=40.
pub fn normal_phred_qual_string(length: usize, mean: f32, stdev: f32) -> Result<String> {
    let normal = Normal::new(mean, stdev)
        .map_err(|e| anyhow!("Invalid quality distribution N({}, {}): {}", mean, stdev, e))?;
    Ok((0..length).map(|_| normal_phred_qual(&normal) as char).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sequence() {
        let seq = DNA::random_sequence(10);
        assert_eq!(seq.len(), 10);
        assert!(seq.chars().all(|c| "ACGT".contains(c)));
    }

    #[test]
    fn test_codes_round_trip() {
        for dna in DNA::all() {
            assert_eq!(DNA::all()[dna.code()], *dna);
            assert_eq!(DNA::from_byte(dna.to_char().to_ascii_lowercase() as u8), Some(*dna));
        }
    }

    #[test]
    fn test_classify_base() {
        assert_eq!(classify_base(b'g'), BaseClass::Unambiguous(DNA::G));
        assert_eq!(classify_base(b'N'), BaseClass::Ambiguous);
        assert_eq!(classify_base(b'y'), BaseClass::Ambiguous);
        assert_eq!(classify_base(b'U'), BaseClass::Invalid);
        assert_eq!(classify_base(b'-'), BaseClass::Invalid);
    }

    #[test]
    fn test_quality_string() -> Result<()> {
        let quals = normal_phred_qual_string(50, 35.0, 3.0)?;
        assert_eq!(quals.len(), 50);
        assert!(quals.bytes().all(|q| (33..=73).contains(&q)));
        assert!(normal_phred_qual_string(5, 35.0, -1.0).is_err());
        Ok(())
    }
}
