use crate::header::COLUMN_HEADER_PREFIX;
use std::fmt;
use thiserror::Error;

/// The fixed structural columns that precede the sample columns.
pub const FIXED_COLUMNS: [&str; 9] = [
    "CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO", "FORMAT",
];
/// Index of the first sample column in a data row.
pub const FIRST_SAMPLE_COLUMN: usize = FIXED_COLUMNS.len();
/// Rows may omit FORMAT when a file carries no samples.
pub const MIN_ROW_FIELDS: usize = FIXED_COLUMNS.len() - 1;

pub const FIELD_DELIMITER: char = '\t';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ColumnError {
    #[error("the file has no column-header line (#CHROM ...); sample identities are undefined")]
    MissingColumnHeader,
    #[error("'{0}' is not a column-header line")]
    NotColumnHeader(String),
    #[error("column header names {found} fields, at least {min} are required", min = MIN_ROW_FIELDS)]
    TooFewColumns { found: usize },
    #[error("sample {0} was not found among the parsed columns")]
    SampleNotFound(SampleSelector),
}

/// Identifies one sample column, either by its name or by its 0-based position among
/// the sample columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSelector {
    Name(String),
    Position(usize),
}

impl fmt::Display for SampleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleSelector::Name(name) => write!(f, "'{name}'"),
            SampleSelector::Position(index) => write!(f, "at position {index}"),
        }
    }
}

/// The ordered field names of the column-header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndex {
    fields: Vec<String>,
}

impl ColumnIndex {
    /// Parses a line starting with exactly one `#`.
    pub fn parse(line: &str) -> Result<Self, ColumnError> {
        let body = match line.strip_prefix(COLUMN_HEADER_PREFIX) {
            Some(rest) if !rest.starts_with(COLUMN_HEADER_PREFIX) => rest,
            _ => return Err(ColumnError::NotColumnHeader(line.to_string())),
        };

        let fields: Vec<String> = body.split(FIELD_DELIMITER).map(str::to_string).collect();
        if fields.len() < MIN_ROW_FIELDS {
            return Err(ColumnError::TooFewColumns {
                found: fields.len(),
            });
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Sample identities in file order.
    pub fn samples(&self) -> &[String] {
        self.fields.get(FIRST_SAMPLE_COLUMN..).unwrap_or(&[])
    }

    /// Resolves a selector to `(sample position, sample name)`.
    pub fn resolve(&self, selector: &SampleSelector) -> Result<(usize, &str), ColumnError> {
        let samples = self.samples();
        let found = match selector {
            SampleSelector::Name(name) => samples.iter().position(|s| s == name),
            SampleSelector::Position(index) => (*index < samples.len()).then_some(*index),
        };
        found
            .map(|index| (index, samples[index].as_str()))
            .ok_or_else(|| ColumnError::SampleNotFound(selector.clone()))
    }
}
