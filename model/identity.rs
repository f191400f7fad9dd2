// ========================================================================================
//
//                     Client-side identity for variants and calls
//
// ========================================================================================
//
// Every variant key is decided inside the worker that parses the row, before anything is
// written. Calls reference the variant by that same key, so no worker ever needs to read
// back a record written by another worker to learn its identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identifier column value that means "no identifier".
pub const MISSING_IDENTIFIER: &str = ".";

/// How variant keys are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityStrategy {
    /// The identifier column (`rs123`), falling back to `Content` when it is `.`.
    #[default]
    Identifier,
    /// A UUIDv5 derived from chromosome, position, reference and alternate bases.
    Content,
    /// A random UUIDv4.
    Random,
}

impl IdentityStrategy {
    /// Whether two runs over the same input produce the same keys.
    pub fn is_deterministic(self) -> bool {
        !matches!(self, Self::Random)
    }
}

/// The raw fields that determine a variant's identity.
#[derive(Debug, Clone, Copy)]
pub struct IdentityFields<'a> {
    pub chromosome: &'a str,
    pub position: &'a str,
    pub identifier: &'a str,
    pub reference: &'a str,
    pub alternates: &'a str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver {
    strategy: IdentityStrategy,
}

impl IdentityResolver {
    pub fn new(strategy: IdentityStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> IdentityStrategy {
        self.strategy
    }

    pub fn variant_key(&self, fields: &IdentityFields<'_>) -> String {
        match self.strategy {
            IdentityStrategy::Identifier if fields.identifier != MISSING_IDENTIFIER => {
                fields.identifier.to_string()
            }
            IdentityStrategy::Identifier | IdentityStrategy::Content => content_key(fields),
            IdentityStrategy::Random => Uuid::new_v4().to_string(),
        }
    }
}

fn content_key(fields: &IdentityFields<'_>) -> String {
    let content = format!(
        "{}:{}:{}:{}",
        fields.chromosome, fields.position, fields.reference, fields.alternates
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(identifier: &str) -> IdentityFields<'_> {
        IdentityFields {
            chromosome: "1",
            position: "100",
            identifier,
            reference: "A",
            alternates: "G",
        }
    }

    #[test]
    fn identifier_strategy_uses_the_id_column() {
        let resolver = IdentityResolver::new(IdentityStrategy::Identifier);
        assert_eq!(resolver.variant_key(&fields("rs1")), "rs1");
    }

    #[test]
    fn missing_identifier_falls_back_to_content_key() {
        let identifier = IdentityResolver::new(IdentityStrategy::Identifier);
        let content = IdentityResolver::new(IdentityStrategy::Content);
        let key = identifier.variant_key(&fields("."));

        assert_eq!(key, content.variant_key(&fields("rs999")));
        assert!(Uuid::parse_str(&key).is_ok());
    }

    #[test]
    fn content_keys_depend_on_alleles() {
        let resolver = IdentityResolver::new(IdentityStrategy::Content);
        let mut other = fields("rs1");
        other.alternates = "T";
        assert_ne!(
            resolver.variant_key(&fields("rs1")),
            resolver.variant_key(&other)
        );
    }

    #[test]
    fn random_keys_are_unique_per_call() {
        let resolver = IdentityResolver::new(IdentityStrategy::Random);
        assert_ne!(
            resolver.variant_key(&fields("rs1")),
            resolver.variant_key(&fields("rs1"))
        );
        assert!(!IdentityStrategy::Random.is_deterministic());
    }

    #[test]
    fn strategies_deserialize_from_kebab_case() {
        let parsed: IdentityStrategy = serde_json::from_str("\"content\"").unwrap();
        assert_eq!(parsed, IdentityStrategy::Content);
    }
}
