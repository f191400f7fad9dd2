use thiserror::Error;

/// Separates alleles whose chromosomal origin is known.
pub const PHASED_SEPARATOR: char = '|';
/// Separates alleles whose chromosomal origin is unknown.
pub const UNPHASED_SEPARATOR: char = '/';
/// Marks an allele that was not called.
pub const MISSING_ALLELE: &str = ".";
/// Separates the FORMAT subfields of one sample token; GT always comes first.
pub const FORMAT_SEPARATOR: char = ':';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenotypeError {
    #[error("genotype token is empty")]
    Empty,
    #[error("genotype '{token}' mixes missing and called alleles")]
    PartiallyMissing { token: String },
    #[error("genotype '{token}' has an invalid allele index '{allele}'")]
    InvalidAllele { token: String, allele: String },
}

/// A decoded genotype, before it is attached to a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedGenotype {
    pub phased: bool,
    pub alleles: Vec<u32>,
}

/// Decodes one sample token (`0|1`, `1/1`, `0|1|2`, `0/1:35:...`).
///
/// Returns `Ok(None)` when every allele is the missing marker (`./.`, `.|.`, `.`); such
/// tokens produce no call. A token mixing missing and called alleles is an error.
pub fn encode_genotype(token: &str) -> Result<Option<EncodedGenotype>, GenotypeError> {
    let gt = token.split(FORMAT_SEPARATOR).next().unwrap_or(token);
    if gt.is_empty() {
        return Err(GenotypeError::Empty);
    }

    let pieces: Vec<&str> = gt.split([PHASED_SEPARATOR, UNPHASED_SEPARATOR]).collect();
    let missing = pieces.iter().filter(|p| **p == MISSING_ALLELE).count();
    if missing == pieces.len() {
        return Ok(None);
    }
    if missing > 0 {
        return Err(GenotypeError::PartiallyMissing {
            token: token.to_string(),
        });
    }

    let alleles = pieces
        .iter()
        .map(|piece| {
            Some(*piece)
                .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|digits| digits.parse::<u32>().ok())
                .ok_or_else(|| GenotypeError::InvalidAllele {
                    token: token.to_string(),
                    allele: piece.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(EncodedGenotype {
        phased: gt.contains(PHASED_SEPARATOR),
        alleles,
    }))
}
