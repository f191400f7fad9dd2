// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Entities shared across modules live here. Module-local types stay in their module.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The attributes of a single header declaration, keyed by lower-cased attribute name
/// (`number`, `type`, `description`, ...). Values are stored with surrounding quotes removed.
pub type Attributes = BTreeMap<String, String>;

/// Declaration ID to attribute dictionary. One instance holds the `##INFO` declarations,
/// another the `##ALT` declarations.
pub type HeaderMetadata = BTreeMap<String, Attributes>;

/// A single coerced annotation value. The variant is chosen by the declared `Type`
/// attribute of the annotation, never by inspecting the raw text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// A per-variant copy of an annotation declaration with its coerced values attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoEntry {
    #[serde(flatten)]
    pub attributes: Attributes,
    pub value: Vec<InfoValue>,
}

/// One data row of the VCF, typed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    #[serde(rename = "_key")]
    pub key: String,
    pub names: Vec<String>,
    pub chromosome: u8,
    /// Kept verbatim; positions are not required to be numeric.
    pub position: String,
    pub filter: String,
    pub reference_base: String,
    pub alternate_bases: Vec<String>,
    /// Shared, read-only snapshot of the `##ALT` declarations.
    pub alternate_structure: Arc<HeaderMetadata>,
    pub info: BTreeMap<String, InfoEntry>,
}

/// One sample's observed genotype at one variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Call {
    /// Key of the variant this call was observed at.
    pub variant: String,
    pub phased: bool,
    /// Allele indices, one per called allele (length equals ploidy).
    pub genotype: Vec<u32>,
}

/// A genotyped individual and every call recorded for it, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    #[serde(rename = "_key")]
    pub key: String,
    pub calls: Vec<Call>,
}

impl Sample {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            calls: Vec::new(),
        }
    }
}

/// The streaming form of a call: the call plus the key of the sample it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SampleCall {
    pub sample: String,
    #[serde(flatten)]
    pub call: Call,
}
