// ========================================================================================
//
//                        Typed coercion of INFO annotations
//
// ========================================================================================

use crate::types::{Attributes, HeaderMetadata, InfoEntry, InfoValue};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Separates annotation tokens in the INFO column.
pub const ANNOTATION_SEPARATOR: char = ';';
/// Separates the values of one annotation.
pub const VALUE_SEPARATOR: char = ',';
/// The INFO column value for a row with no annotations.
pub const EMPTY_ANNOTATIONS: &str = ".";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InfoError {
    #[error("annotation '{key}' is used in a row but never declared in the header")]
    Undeclared { key: String },
    #[error("annotation '{key}' value '{raw}' is not a valid {expected}")]
    Coercion {
        key: String,
        raw: String,
        expected: DeclaredType,
    },
}

/// The closed set of value kinds an annotation can be coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredType {
    Integer,
    Float,
    Text,
}

impl DeclaredType {
    /// Maps a declared `Type` attribute to a value kind, ignoring case. Undeclared and
    /// unrecognized types (`String`, `Flag`, `Character`, ...) stay text.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::to_ascii_lowercase).as_deref() {
            Some("integer") => Self::Integer,
            Some("double") | Some("float") => Self::Float,
            _ => Self::Text,
        }
    }

    pub fn from_attributes(attributes: &Attributes) -> Self {
        Self::from_label(attributes.get("type").map(String::as_str))
    }

    /// Coerces one raw value. Numeric kinds never fall back to zero. Integers take an
    /// optional sign (`+5`, `-5`), as VCF numeric values do.
    pub fn coerce(self, raw: &str) -> Option<InfoValue> {
        match self {
            Self::Integer => raw.parse::<i64>().ok().map(InfoValue::Integer),
            Self::Float => raw.parse::<f64>().ok().map(InfoValue::Float),
            Self::Text => Some(InfoValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Integer => "integer",
            Self::Float => "floating-point number",
            Self::Text => "string",
        };
        f.write_str(label)
    }
}

/// Coerces one `KEY=v1,v2,...` token against the INFO declarations.
///
/// The declaration is cloned for every call, so entries handed to different variants never
/// alias each other or the schema. A flag token (`KEY` with no `=`) or an empty value
/// yields an empty value list.
pub fn coerce_info_token(
    token: &str,
    schema: &HeaderMetadata,
) -> Result<(String, InfoEntry), InfoError> {
    let (key, raw_values) = match token.split_once('=') {
        Some((key, values)) => (key, values),
        None => (token, ""),
    };

    let declaration = schema.get(key).ok_or_else(|| InfoError::Undeclared {
        key: key.to_string(),
    })?;
    let declared_type = DeclaredType::from_attributes(declaration);

    let mut value = Vec::new();
    if !raw_values.is_empty() {
        for raw in raw_values.split(VALUE_SEPARATOR) {
            let coerced = declared_type
                .coerce(raw)
                .ok_or_else(|| InfoError::Coercion {
                    key: key.to_string(),
                    raw: raw.to_string(),
                    expected: declared_type,
                })?;
            value.push(coerced);
        }
    }

    let mut attributes = declaration.clone();
    attributes.remove("value");

    Ok((key.to_string(), InfoEntry { attributes, value }))
}

/// Coerces a whole INFO column. Later tokens with a repeated key replace earlier ones.
pub fn coerce_info_column(
    column: &str,
    schema: &HeaderMetadata,
) -> Result<BTreeMap<String, InfoEntry>, InfoError> {
    let mut info = BTreeMap::new();
    if column.is_empty() || column == EMPTY_ANNOTATIONS {
        return Ok(info);
    }

    for token in column.split(ANNOTATION_SEPARATOR) {
        if token.is_empty() {
            continue;
        }
        let (key, entry) = coerce_info_token(token, schema)?;
        info.insert(key, entry);
    }
    Ok(info)
}
