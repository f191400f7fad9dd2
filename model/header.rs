// ========================================================================================
//
//                     Header declarations and the file preamble
//
// ========================================================================================
//
// The meaning of every annotation value in the data section depends on a `##INFO`
// declaration made earlier in the file. This module turns those declarations into
// lookup tables and reads the preamble (metadata lines plus the column-header line)
// exactly once, before any data row is interpreted.

use crate::columns::{ColumnError, ColumnIndex};
use crate::shared::files::{SourceError, TextSource};
use crate::types::{Attributes, HeaderMetadata};
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;

/// Prefix shared by every metadata line.
pub const META_PREFIX: &str = "##";
/// Prefix of the single column-header line.
pub const COLUMN_HEADER_PREFIX: char = '#';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("declaration has no fields")]
    Empty,
    #[error("declaration must start with an ID field, found '{0}'")]
    MissingId(String),
}

#[derive(Debug, Error)]
pub enum PreambleError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Columns(#[from] ColumnError),
    #[error(
        "line {line}: data row found before the column-header line; sample identities are undefined"
    )]
    RowBeforeColumnHeader { line: usize },
}

/// The kinds of metadata declaration that feed the entity model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Info,
    Alt,
}

impl DeclarationKind {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "INFO" => Some(Self::Info),
            "ALT" => Some(Self::Alt),
            _ => None,
        }
    }
}

/// How a single line of VCF text should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Meta,
    ColumnHeader,
    Data,
    Blank,
}

pub fn classify_line(line: &str) -> LineKind {
    if line.trim().is_empty() {
        LineKind::Blank
    } else if line.starts_with(META_PREFIX) {
        LineKind::Meta
    } else if line.starts_with(COLUMN_HEADER_PREFIX) {
        LineKind::ColumnHeader
    } else {
        LineKind::Data
    }
}

/// Splits on `delimiter` everywhere except inside double-quoted segments.
pub fn split_unquoted(text: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (index, ch) in text.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == delimiter && !in_quotes {
            parts.push(&text[start..index]);
            start = index + ch.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

fn strip_quotes(value: &str) -> &str {
    let value = value.strip_prefix('"').unwrap_or(value);
    value.strip_suffix('"').unwrap_or(value)
}

/// Parses the body of one declaration (`<ID=DP,Number=1,...>`) into `target`.
///
/// The first field must be `ID`; its value keys a fresh attribute map which replaces any
/// earlier declaration with the same ID. Remaining keys are lower-cased and their values
/// have surrounding quotes removed. Returns the declared ID.
pub fn parse_declaration(body: &str, target: &mut HeaderMetadata) -> Result<String, HeaderError> {
    let body = body.trim();
    let body = body.strip_prefix('<').unwrap_or(body);
    let body = body.strip_suffix('>').unwrap_or(body);
    if body.is_empty() {
        return Err(HeaderError::Empty);
    }

    let mut fields = split_unquoted(body, ',').into_iter();
    let id = match fields.next().and_then(|first| first.split_once('=')) {
        Some(("ID", id)) => id.to_string(),
        _ => return Err(HeaderError::MissingId(body.to_string())),
    };

    let mut attributes = Attributes::new();
    for field in fields {
        let (key, value) = field.split_once('=').unwrap_or((field, ""));
        attributes.insert(key.to_lowercase(), strip_quotes(value).to_string());
    }

    target.insert(id.clone(), attributes);
    Ok(id)
}

/// The annotation and alternate-allele declarations of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderSchema {
    pub info: HeaderMetadata,
    pub alt: Arc<HeaderMetadata>,
}

impl HeaderSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one `##` line into the schema. Unrecognized kinds and malformed
    /// declarations are skipped; returns whether the line contributed a declaration.
    pub fn ingest_meta_line(&mut self, line: &str) -> bool {
        let Some(content) = line.strip_prefix(META_PREFIX) else {
            return false;
        };
        let Some((label, body)) = content.split_once('=') else {
            return false;
        };
        let Some(kind) = DeclarationKind::from_label(label) else {
            return false;
        };

        let target = match kind {
            DeclarationKind::Info => &mut self.info,
            DeclarationKind::Alt => Arc::make_mut(&mut self.alt),
        };
        match parse_declaration(body, target) {
            Ok(id) => {
                debug!("Registered {kind:?} declaration '{id}'");
                true
            }
            Err(e) => {
                warn!("Ignoring malformed {label} declaration '{line}': {e}");
                false
            }
        }
    }
}

/// Everything known about a file before its first data row.
#[derive(Debug, Clone)]
pub struct Preamble {
    pub schema: HeaderSchema,
    columns: Option<ColumnIndex>,
}

impl Preamble {
    /// The column index, or an error if the file never declared one.
    pub fn columns(&self) -> Result<&ColumnIndex, ColumnError> {
        self.columns.as_ref().ok_or(ColumnError::MissingColumnHeader)
    }

    pub fn into_parts(self) -> Result<(HeaderSchema, ColumnIndex), ColumnError> {
        let columns = self.columns.ok_or(ColumnError::MissingColumnHeader)?;
        Ok((self.schema, columns))
    }
}

/// Consumes metadata lines and the column-header line from `source`.
///
/// Stops immediately after the column header, leaving the source positioned at the
/// first data row. A data row appearing earlier is fatal.
pub fn read_preamble(source: &mut dyn TextSource) -> Result<Preamble, PreambleError> {
    let mut schema = HeaderSchema::new();
    let mut declarations = 0usize;

    while let Some(line) = source.next_line()? {
        match classify_line(line) {
            LineKind::Blank => continue,
            LineKind::Meta => {
                if schema.ingest_meta_line(line) {
                    declarations += 1;
                }
            }
            LineKind::ColumnHeader => {
                let columns = ColumnIndex::parse(line)?;
                info!(
                    "Parsed header of {}: {} INFO and {} ALT declarations ({} accepted), {} samples",
                    source.display_name(),
                    schema.info.len(),
                    schema.alt.len(),
                    declarations,
                    columns.samples().len()
                );
                return Ok(Preamble {
                    schema,
                    columns: Some(columns),
                });
            }
            LineKind::Data => {
                return Err(PreambleError::RowBeforeColumnHeader {
                    line: source.line_number(),
                });
            }
        }
    }

    warn!(
        "{} ended without a column-header line",
        source.display_name()
    );
    Ok(Preamble {
        schema,
        columns: None,
    })
}
