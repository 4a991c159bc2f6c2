//! Boundary to the chemical object model
//!
//! Parsing, canonicalization, fingerprint-bit construction and graph
//! matching belong to a chemistry toolkit. The index only needs the handful
//! of operations in [`Chemistry`]; everything it stores is bytes and bits.

pub mod fragment;

use crate::core::error::{ChemdexError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Molecule or reaction index variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Molecule,
    Reaction,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Molecule => "molecule",
            ObjectKind::Reaction => "reaction",
        }
    }

    /// Short code embedded in the arena type tag
    pub fn tag_code(&self) -> &'static str {
        match self {
            ObjectKind::Molecule => "MOL",
            ObjectKind::Reaction => "RXN",
        }
    }

    pub fn from_tag_code(code: &str) -> Option<Self> {
        match code {
            "MOL" => Some(ObjectKind::Molecule),
            "RXN" => Some(ObjectKind::Reaction),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fingerprint sizes, fixed per index at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintParams {
    /// Substructure screening fingerprint length in 64-bit words
    pub sub_qwords: u32,
    /// Similarity fingerprint length in 64-bit words
    pub sim_qwords: u32,
}

impl FingerprintParams {
    pub fn new(sub_qwords: u32, sim_qwords: u32) -> Result<Self> {
        if sub_qwords == 0 || sim_qwords == 0 {
            return Err(ChemdexError::InvalidOption(
                "fingerprint sizes must be positive".to_string(),
            ));
        }
        // Bit positions are persisted as u16
        if sub_qwords > 1024 || sim_qwords > 1024 {
            return Err(ChemdexError::InvalidOption(
                "fingerprints are limited to 1024 qwords".to_string(),
            ));
        }
        Ok(FingerprintParams {
            sub_qwords,
            sim_qwords,
        })
    }

    pub fn sub_bytes(&self) -> usize {
        self.sub_qwords as usize * 8
    }

    pub fn sim_bytes(&self) -> usize {
        self.sim_qwords as usize * 8
    }
}

impl Default for FingerprintParams {
    fn default() -> Self {
        FingerprintParams {
            sub_qwords: 32,
            sim_qwords: 8,
        }
    }
}

/// The two per-record fingerprints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    pub sub: Vec<u8>,
    pub sim: Vec<u8>,
}

/// Which structural features must agree for an exact match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactConditions {
    pub electrons: bool,
    pub isotopes: bool,
    pub stereo: bool,
    pub mapping: bool,
    pub reacting_centers: bool,
}

impl ExactConditions {
    pub const ALL: ExactConditions = ExactConditions {
        electrons: true,
        isotopes: true,
        stereo: true,
        mapping: true,
        reacting_centers: true,
    };

    pub const NONE: ExactConditions = ExactConditions {
        electrons: false,
        isotopes: false,
        stereo: false,
        mapping: false,
        reacting_centers: false,
    };

    /// Parse whitespace-separated flags: `ALL`, `NONE`, `ELE`, `MAS`, `STE`, `AAM`, `RCT`
    ///
    /// Listing individual flags enables only those flags.
    pub fn parse(text: &str) -> Result<Self> {
        let mut conditions = ExactConditions::NONE;
        let mut any = false;
        for token in text.split_whitespace() {
            any = true;
            match token.to_ascii_uppercase().as_str() {
                "ALL" => conditions = ExactConditions::ALL,
                "NONE" => conditions = ExactConditions::NONE,
                "ELE" => conditions.electrons = true,
                "MAS" => conditions.isotopes = true,
                "STE" => conditions.stereo = true,
                "AAM" => conditions.mapping = true,
                "RCT" => conditions.reacting_centers = true,
                other => {
                    return Err(ChemdexError::InvalidOption(format!(
                        "unknown exact-match flag '{}'",
                        other
                    )))
                }
            }
        }
        Ok(if any { conditions } else { ExactConditions::ALL })
    }
}

impl Default for ExactConditions {
    fn default() -> Self {
        ExactConditions::ALL
    }
}

/// Operations the index needs from a chemistry toolkit
///
/// Implementations must be deterministic: the same object always yields the
/// same serialized bytes, fingerprints, hash and formula.
pub trait Chemistry: Send + Sync {
    /// A molecule or reaction
    type Object: Send;
    /// A substructure query
    type Query: Send + Sync;

    fn serialize(&self, kind: ObjectKind, object: &Self::Object) -> Result<Vec<u8>>;

    fn deserialize(&self, kind: ObjectKind, bytes: &[u8]) -> Result<Self::Object>;

    fn fingerprints(
        &self,
        kind: ObjectKind,
        object: &Self::Object,
        params: &FingerprintParams,
    ) -> Result<Fingerprints>;

    /// Substructure screening bits of a query (`params.sub_bytes()` long)
    fn query_fingerprint(
        &self,
        kind: ObjectKind,
        query: &Self::Query,
        params: &FingerprintParams,
    ) -> Result<Vec<u8>>;

    fn structural_hash(&self, kind: ObjectKind, object: &Self::Object) -> Result<u32>;

    fn gross_formula(&self, kind: ObjectKind, object: &Self::Object) -> Result<String>;

    fn substructure_match(
        &self,
        kind: ObjectKind,
        query: &Self::Query,
        target: &Self::Object,
    ) -> Result<bool>;

    fn exact_match(
        &self,
        kind: ObjectKind,
        query: &Self::Object,
        target: &Self::Object,
        conditions: ExactConditions,
    ) -> Result<bool>;

    /// Value of a named record property, used for the `key` id option
    fn property(&self, _kind: ObjectKind, _object: &Self::Object, _name: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_conditions_parse() {
        assert_eq!(ExactConditions::parse("").unwrap(), ExactConditions::ALL);
        assert_eq!(ExactConditions::parse("NONE").unwrap(), ExactConditions::NONE);

        let partial = ExactConditions::parse("ele ste").unwrap();
        assert!(partial.electrons && partial.stereo);
        assert!(!partial.isotopes && !partial.mapping);

        assert!(ExactConditions::parse("FOO").is_err());
    }

    #[test]
    fn test_fingerprint_params() {
        let params = FingerprintParams::new(4, 1).unwrap();
        assert_eq!(params.sub_bytes(), 32);
        assert_eq!(params.sim_bytes(), 8);
        assert!(FingerprintParams::new(0, 1).is_err());
    }

    #[test]
    fn test_kind_tag_codes() {
        for kind in [ObjectKind::Molecule, ObjectKind::Reaction] {
            assert_eq!(ObjectKind::from_tag_code(kind.tag_code()), Some(kind));
        }
        assert_eq!(ObjectKind::from_tag_code("XYZ"), None);
    }
}
