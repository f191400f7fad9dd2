// ========================================================================================
//
//                       One data row to one Variant plus its Calls
//
// ========================================================================================

use crate::columns::{ColumnIndex, FIELD_DELIMITER, FIRST_SAMPLE_COLUMN, MIN_ROW_FIELDS};
use crate::genotype::{GenotypeError, encode_genotype};
use crate::header::HeaderSchema;
use crate::identity::{IdentityFields, IdentityResolver};
use crate::info::{InfoError, coerce_info_column};
use crate::types::{Call, Variant};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const CHROM: usize = 0;
const POS: usize = 1;
const ID: usize = 2;
const REF: usize = 3;
const ALT: usize = 4;
const FILTER: usize = 6;
const INFO: usize = 7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("line {line}: expected at least {expected} tab-delimited fields, found {found}")]
    TooFewFields {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: row carries {found} sample columns but the header names {expected}")]
    SampleColumnMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: {message}")]
    Chromosome { line: usize, message: String },
    #[error("line {line}: {source}")]
    Info {
        line: usize,
        #[source]
        source: InfoError,
    },
    #[error("line {line}, sample '{sample}': {source}")]
    Genotype {
        line: usize,
        sample: String,
        #[source]
        source: GenotypeError,
    },
}

/// A fully parsed data row. `calls` pairs each call with the 0-based position of the
/// sample column it came from; missing genotypes are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub variant: Variant,
    pub calls: Vec<(usize, Call)>,
}

/// What an unplaced contig (a label with no integer form, such as `GL000207.1` or
/// `hs37d5`) does to a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContigPolicy {
    /// The row fails with `RowError::Chromosome`.
    #[default]
    Reject,
    /// The row is logged and dropped; the load continues.
    Skip,
}

/// Parses a chromosome label into its integer form: `chr` prefixes are ignored, `X`, `Y`
/// and `MT`/`M` map to 23, 24 and 25.
pub fn parse_chromosome_label(label: &str) -> Result<u8, String> {
    let trimmed = label.trim();
    let bare = match trimmed.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &trimmed[3..],
        _ => trimmed,
    };

    match bare.to_ascii_uppercase().as_str() {
        "X" => return Ok(23),
        "Y" => return Ok(24),
        "M" | "MT" => return Ok(25),
        _ => {}
    }

    Some(bare)
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u8>().ok())
        .filter(|number| *number > 0)
        .ok_or_else(|| {
            format!(
                "Invalid chromosome '{trimmed}'. Expected 1-255, 'X', 'Y', 'M' or 'MT', \
                 optionally prefixed by 'chr'."
            )
        })
}

fn split_alternates(alternates: &str) -> Vec<String> {
    alternates
        .split(',')
        .map(|allele| allele.trim_matches(['<', '>']).to_string())
        .collect()
}

/// Builds Variant and Call entities from data rows. Cheap to clone: each worker owns one
/// and shares the schema and column index read-only.
#[derive(Debug, Clone)]
pub struct RowParser {
    schema: Arc<HeaderSchema>,
    columns: Arc<ColumnIndex>,
    identity: IdentityResolver,
    contigs: ContigPolicy,
}

impl RowParser {
    pub fn new(
        schema: Arc<HeaderSchema>,
        columns: Arc<ColumnIndex>,
        identity: IdentityResolver,
    ) -> Self {
        Self {
            schema,
            columns,
            identity,
            contigs: ContigPolicy::default(),
        }
    }

    pub fn with_contig_policy(mut self, contigs: ContigPolicy) -> Self {
        self.contigs = contigs;
        self
    }

    pub fn contig_policy(&self) -> ContigPolicy {
        self.contigs
    }

    pub fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    /// Splits a row and checks its shape against the column header.
    fn split_row<'a>(&self, row: &'a str, line: usize) -> Result<Vec<&'a str>, RowError> {
        let fields: Vec<&str> = row.split(FIELD_DELIMITER).collect();
        if fields.len() < MIN_ROW_FIELDS {
            return Err(RowError::TooFewFields {
                line,
                expected: MIN_ROW_FIELDS,
                found: fields.len(),
            });
        }

        let expected = self.columns.samples().len();
        let found = fields.len().saturating_sub(FIRST_SAMPLE_COLUMN);
        if found != expected {
            return Err(RowError::SampleColumnMismatch {
                line,
                expected,
                found,
            });
        }
        Ok(fields)
    }

    fn variant_key(&self, fields: &[&str]) -> String {
        self.identity.variant_key(&IdentityFields {
            chromosome: fields[CHROM],
            position: fields[POS],
            identifier: fields[ID],
            reference: fields[REF],
            alternates: fields[ALT],
        })
    }

    fn encode_call(
        &self,
        token: &str,
        sample_position: usize,
        variant_key: &str,
        line: usize,
    ) -> Result<Option<Call>, RowError> {
        let encoded = encode_genotype(token).map_err(|source| RowError::Genotype {
            line,
            sample: self.columns.samples()[sample_position].clone(),
            source,
        })?;
        Ok(encoded.map(|gt| Call {
            variant: variant_key.to_string(),
            phased: gt.phased,
            genotype: gt.alleles,
        }))
    }

    /// Parses one data row. `line` is the 1-based source line, used in errors only.
    pub fn parse_row(&self, row: &str, line: usize) -> Result<ParsedRow, RowError> {
        let fields = self.split_row(row, line)?;

        let chromosome = parse_chromosome_label(fields[CHROM])
            .map_err(|message| RowError::Chromosome { line, message })?;
        let info = coerce_info_column(fields[INFO], &self.schema.info)
            .map_err(|source| RowError::Info { line, source })?;
        let key = self.variant_key(&fields);

        let mut calls = Vec::new();
        for (sample_position, token) in fields.iter().skip(FIRST_SAMPLE_COLUMN).enumerate() {
            if let Some(call) = self.encode_call(token, sample_position, &key, line)? {
                calls.push((sample_position, call));
            }
        }

        let variant = Variant {
            names: fields[ID].split(',').map(str::to_string).collect(),
            key,
            chromosome,
            position: fields[POS].to_string(),
            filter: fields[FILTER].to_string(),
            reference_base: fields[REF].to_string(),
            alternate_bases: split_alternates(fields[ALT]),
            alternate_structure: Arc::clone(&self.schema.alt),
            info,
        };

        Ok(ParsedRow { variant, calls })
    }

    /// Parses only what one sample needs from a row: the variant key and that sample's
    /// call. Annotations are not coerced.
    pub fn parse_sample_call(
        &self,
        row: &str,
        line: usize,
        sample_position: usize,
    ) -> Result<Option<Call>, RowError> {
        let fields = self.split_row(row, line)?;
        let key = self.variant_key(&fields);
        self.encode_call(
            fields[FIRST_SAMPLE_COLUMN + sample_position],
            sample_position,
            &key,
            line,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityStrategy;
    use crate::types::InfoValue;

    fn parser(strategy: IdentityStrategy) -> RowParser {
        let mut schema = HeaderSchema::new();
        schema.ingest_meta_line(
            r#"##INFO=<ID=DP,Number=1,Type=Integer,Description="Total Depth">"#,
        );
        schema.ingest_meta_line(
            r#"##INFO=<ID=AF,Number=A,Type=Float,Description="Allele Frequency">"#,
        );
        schema.ingest_meta_line(r#"##ALT=<ID=DEL,Description="Deletion">"#);
        let columns = ColumnIndex::parse(
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2",
        )
        .unwrap();
        RowParser::new(
            Arc::new(schema),
            Arc::new(columns),
            IdentityResolver::new(strategy),
        )
    }

    #[test]
    fn builds_variant_and_skips_missing_calls() {
        let row = "1\t100\trs1\tA\tG\t.\tPASS\tAF=0.5\tGT\t0|1\t./.";
        let parsed = parser(IdentityStrategy::Identifier)
            .parse_row(row, 4)
            .unwrap();

        let variant = &parsed.variant;
        assert_eq!(variant.key, "rs1");
        assert_eq!(variant.names, vec!["rs1"]);
        assert_eq!(variant.chromosome, 1);
        assert_eq!(variant.position, "100");
        assert_eq!(variant.filter, "PASS");
        assert_eq!(variant.reference_base, "A");
        assert_eq!(variant.alternate_bases, vec!["G"]);
        assert_eq!(variant.info["AF"].value, vec![InfoValue::Float(0.5)]);
        assert!(variant.alternate_structure.contains_key("DEL"));

        assert_eq!(parsed.calls.len(), 1);
        let (sample, call) = &parsed.calls[0];
        assert_eq!(*sample, 0);
        assert_eq!(call.variant, "rs1");
        assert!(call.phased);
        assert_eq!(call.genotype, vec![0, 1]);
    }

    #[test]
    fn integer_annotations_are_numbers_not_strings() {
        let row = "2\t5\trs2\tC\tT\t50\tPASS\tDP=10\tGT\t1/1\t0/1";
        let parsed = parser(IdentityStrategy::Identifier)
            .parse_row(row, 1)
            .unwrap();
        assert_eq!(parsed.variant.info["DP"].value, vec![InfoValue::Integer(10)]);
        assert_eq!(parsed.calls.len(), 2);
        assert!(parsed.calls.iter().all(|(_, call)| !call.phased));
    }

    #[test]
    fn structural_alternates_lose_their_brackets_and_names_split_on_commas() {
        let row = "X\t900\trs3,esv7\tN\t<DEL>,<INS>\t.\t.\t.\tGT\t0|1\t1|1";
        let variant = parser(IdentityStrategy::Identifier)
            .parse_row(row, 1)
            .unwrap()
            .variant;
        assert_eq!(variant.chromosome, 23);
        assert_eq!(variant.names, vec!["rs3", "esv7"]);
        assert_eq!(variant.alternate_bases, vec!["DEL", "INS"]);
        assert!(variant.info.is_empty());
    }

    #[test]
    fn variants_share_the_alt_snapshot_but_not_info() {
        let parser = parser(IdentityStrategy::Identifier);
        let first = parser
            .parse_row("1\t1\trsA\tA\tG\t.\tPASS\tDP=1\tGT\t0|0\t0|0", 1)
            .unwrap()
            .variant;
        let mut second = parser
            .parse_row("1\t2\trsB\tA\tG\t.\tPASS\tDP=2\tGT\t0|0\t0|0", 2)
            .unwrap()
            .variant;

        assert!(Arc::ptr_eq(
            &first.alternate_structure,
            &second.alternate_structure
        ));
        second
            .info
            .get_mut("DP")
            .unwrap()
            .value
            .push(InfoValue::Integer(42));
        assert_eq!(first.info["DP"].value, vec![InfoValue::Integer(1)]);
    }

    #[test]
    fn undeclared_annotation_fails_the_row() {
        let err = parser(IdentityStrategy::Identifier)
            .parse_row("1\t1\trs1\tA\tG\t.\tPASS\tZZ=1\tGT\t0|0\t0|0", 7)
            .unwrap_err();
        assert!(matches!(err, RowError::Info { line: 7, source: InfoError::Undeclared { .. } }));
    }

    #[test]
    fn sample_column_count_must_match_the_header() {
        let err = parser(IdentityStrategy::Identifier)
            .parse_row("1\t1\trs1\tA\tG\t.\tPASS\t.\tGT\t0|0", 3)
            .unwrap_err();
        assert_eq!(
            err,
            RowError::SampleColumnMismatch {
                line: 3,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn partially_missing_genotype_names_the_sample() {
        let err = parser(IdentityStrategy::Identifier)
            .parse_row("1\t1\trs1\tA\tG\t.\tPASS\t.\tGT\t0|0\t.|1", 9)
            .unwrap_err();
        match err {
            RowError::Genotype { line, sample, .. } => {
                assert_eq!(line, 9);
                assert_eq!(sample, "S2");
            }
            other => panic!("expected a genotype error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_chromosomes_are_rejected() {
        let err = parser(IdentityStrategy::Identifier)
            .parse_row("chrUn\t1\trs1\tA\tG\t.\tPASS\t.\tGT\t0|0\t0|0", 1)
            .unwrap_err();
        assert!(matches!(err, RowError::Chromosome { .. }));
        assert_eq!(parse_chromosome_label("chrMT").unwrap(), 25);
        assert_eq!(parse_chromosome_label("chr2").unwrap(), 2);
    }

    #[test]
    fn multibyte_labels_are_errors_not_panics() {
        for label in ["ché1", "é", "ch", "c\u{1F9EC}"] {
            assert!(parse_chromosome_label(label).is_err(), "{label} was accepted");
        }
        let err = parser(IdentityStrategy::Identifier)
            .parse_row("ché1\t1\trs1\tA\tG\t.\tPASS\t.\tGT\t0|0\t0|0", 4)
            .unwrap_err();
        assert!(matches!(err, RowError::Chromosome { line: 4, ref message } if message.contains("ché1")));
    }

    #[test]
    fn signed_and_out_of_range_labels_are_rejected() {
        for label in ["+5", "-1", "0", "256", "", "chr", "GL000207.1", "hs37d5"] {
            assert!(parse_chromosome_label(label).is_err(), "{label} was accepted");
        }
        assert_eq!(parse_chromosome_label(" chrx ").unwrap(), 23);
        assert_eq!(parse_chromosome_label("CHRm").unwrap(), 25);
        assert_eq!(parse_chromosome_label("255").unwrap(), 255);
    }

    #[test]
    fn calls_reference_content_keys_when_configured() {
        let parsed = parser(IdentityStrategy::Content)
            .parse_row("1\t100\trs1\tA\tG\t.\tPASS\t.\tGT\t0|1\t1|1", 1)
            .unwrap();
        assert_ne!(parsed.variant.key, "rs1");
        assert!(
            parsed
                .calls
                .iter()
                .all(|(_, call)| call.variant == parsed.variant.key)
        );
    }

    #[test]
    fn single_sample_parsing_matches_full_parsing() {
        let parser = parser(IdentityStrategy::Identifier);
        let row = "1\t100\trs1\tA\tG\t.\tPASS\tDP=3\tGT\t0|1\t1/0";
        let full = parser.parse_row(row, 1).unwrap();
        let single = parser.parse_sample_call(row, 1, 1).unwrap();
        assert_eq!(single.as_ref(), full.calls.get(1).map(|(_, call)| call));
    }
}
