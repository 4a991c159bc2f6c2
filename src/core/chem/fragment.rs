//! A minimal chemistry model built on fragment codes
//!
//! A structure is a set of integer fragment codes (think of them as hashed
//! atom environments) plus a gross formula and a few annotation sets. It is
//! small enough to reason about in tests yet exercises every operation the
//! index needs: substructure is fragment-set containment, exact match is
//! equality of the fragment set plus whichever annotations the conditions
//! enable.

use crate::core::chem::{
    Chemistry, ExactConditions, FingerprintParams, Fingerprints, ObjectKind,
};
use crate::core::error::{ChemdexError, Result};
use crate::core::formula::GrossFormula;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use xxhash_rust::xxh3::xxh3_64;

/// Structure described by fragment codes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentStructure {
    pub fragments: BTreeSet<u32>,
    pub formula: String,
    #[serde(default)]
    pub charges: BTreeSet<u32>,
    #[serde(default)]
    pub isotopes: BTreeSet<u32>,
    #[serde(default)]
    pub stereo: BTreeSet<u32>,
    #[serde(default)]
    pub mapping: BTreeSet<u32>,
    #[serde(default)]
    pub reacting_centers: BTreeSet<u32>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl FragmentStructure {
    pub fn new<I: IntoIterator<Item = u32>>(formula: &str, fragments: I) -> Self {
        FragmentStructure {
            fragments: fragments.into_iter().collect(),
            formula: formula.to_string(),
            ..Default::default()
        }
    }

    pub fn with_stereo<I: IntoIterator<Item = u32>>(mut self, codes: I) -> Self {
        self.stereo.extend(codes);
        self
    }

    pub fn with_isotopes<I: IntoIterator<Item = u32>>(mut self, codes: I) -> Self {
        self.isotopes.extend(codes);
        self
    }

    pub fn with_charges<I: IntoIterator<Item = u32>>(mut self, codes: I) -> Self {
        self.charges.extend(codes);
        self
    }

    pub fn with_mapping<I: IntoIterator<Item = u32>>(mut self, codes: I) -> Self {
        self.mapping.extend(codes);
        self
    }

    pub fn with_reacting_centers<I: IntoIterator<Item = u32>>(mut self, codes: I) -> Self {
        self.reacting_centers.extend(codes);
        self
    }

    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }
}

/// Substructure query: every listed fragment must be present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentQuery {
    pub fragments: BTreeSet<u32>,
}

impl FragmentQuery {
    pub fn new<I: IntoIterator<Item = u32>>(fragments: I) -> Self {
        FragmentQuery {
            fragments: fragments.into_iter().collect(),
        }
    }
}

/// Reference [`Chemistry`] over [`FragmentStructure`]
///
/// Similarity bits map fragment `f` to bit `f mod sim_bits`, so callers can
/// control the similarity fingerprint exactly. Substructure bits are hashed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentChemistry;

fn set_bit(bits: &mut [u8], bit: usize) {
    bits[bit / 8] |= 1 << (bit % 8);
}

fn screening_bits(fragments: &BTreeSet<u32>, bytes: usize) -> Vec<u8> {
    let mut bits = vec![0u8; bytes];
    let total = bytes * 8;
    for &fragment in fragments {
        let hash = xxh3_64(&fragment.to_le_bytes());
        set_bit(&mut bits, (hash % total as u64) as usize);
        set_bit(&mut bits, ((hash >> 32) % total as u64) as usize);
    }
    bits
}

impl Chemistry for FragmentChemistry {
    type Object = FragmentStructure;
    type Query = FragmentQuery;

    fn serialize(&self, _kind: ObjectKind, object: &FragmentStructure) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(object)?)
    }

    fn deserialize(&self, _kind: ObjectKind, bytes: &[u8]) -> Result<FragmentStructure> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn fingerprints(
        &self,
        _kind: ObjectKind,
        object: &FragmentStructure,
        params: &FingerprintParams,
    ) -> Result<Fingerprints> {
        let mut sim = vec![0u8; params.sim_bytes()];
        let sim_bits = sim.len() * 8;
        for &fragment in &object.fragments {
            set_bit(&mut sim, fragment as usize % sim_bits);
        }
        Ok(Fingerprints {
            sub: screening_bits(&object.fragments, params.sub_bytes()),
            sim,
        })
    }

    fn query_fingerprint(
        &self,
        _kind: ObjectKind,
        query: &FragmentQuery,
        params: &FingerprintParams,
    ) -> Result<Vec<u8>> {
        Ok(screening_bits(&query.fragments, params.sub_bytes()))
    }

    fn structural_hash(&self, _kind: ObjectKind, object: &FragmentStructure) -> Result<u32> {
        let mut hasher = crc32fast::Hasher::new();
        for fragment in &object.fragments {
            hasher.update(&fragment.to_le_bytes());
        }
        hasher.update(object.formula.as_bytes());
        Ok(hasher.finalize())
    }

    fn gross_formula(&self, _kind: ObjectKind, object: &FragmentStructure) -> Result<String> {
        let formula = GrossFormula::parse(&object.formula)
            .map_err(|e| ChemdexError::Chemistry(format!("bad formula: {}", e)))?;
        Ok(formula.to_string())
    }

    fn substructure_match(
        &self,
        _kind: ObjectKind,
        query: &FragmentQuery,
        target: &FragmentStructure,
    ) -> Result<bool> {
        Ok(query.fragments.is_subset(&target.fragments))
    }

    fn exact_match(
        &self,
        _kind: ObjectKind,
        query: &FragmentStructure,
        target: &FragmentStructure,
        conditions: ExactConditions,
    ) -> Result<bool> {
        if query.fragments != target.fragments {
            return Ok(false);
        }
        let checks = [
            (conditions.electrons, &query.charges, &target.charges),
            (conditions.isotopes, &query.isotopes, &target.isotopes),
            (conditions.stereo, &query.stereo, &target.stereo),
            (conditions.mapping, &query.mapping, &target.mapping),
            (
                conditions.reacting_centers,
                &query.reacting_centers,
                &target.reacting_centers,
            ),
        ];
        Ok(checks.iter().all(|(enabled, q, t)| !enabled || q == t))
    }

    fn property(&self, _kind: ObjectKind, object: &FragmentStructure, name: &str) -> Option<String> {
        object.properties.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIND: ObjectKind = ObjectKind::Molecule;

    #[test]
    fn test_serialize_roundtrip() {
        let chem = FragmentChemistry;
        let benzene = FragmentStructure::new("C6H6", [1, 2, 3]).with_stereo([9]);

        let bytes = chem.serialize(KIND, &benzene).unwrap();
        assert_eq!(chem.deserialize(KIND, &bytes).unwrap(), benzene);
    }

    #[test]
    fn test_similarity_bits_follow_fragments() {
        let chem = FragmentChemistry;
        let params = FingerprintParams::new(1, 1).unwrap();
        let fp = chem
            .fingerprints(KIND, &FragmentStructure::new("C", [0, 9, 64]), &params)
            .unwrap();

        assert_eq!(fp.sim.len(), 8);
        assert_eq!(fp.sim[0], 0b0000_0001);
        assert_eq!(fp.sim[1], 0b0000_0010);
        assert_eq!(fp.sub.len(), 8);
    }

    #[test]
    fn test_query_bits_are_subset_of_target_bits() {
        let chem = FragmentChemistry;
        let params = FingerprintParams::default();
        let target = FragmentStructure::new("C8H10", [4, 8, 15, 16, 23, 42]);
        let query = FragmentQuery::new([8, 23]);

        let t = chem.fingerprints(KIND, &target, &params).unwrap().sub;
        let q = chem.query_fingerprint(KIND, &query, &params).unwrap();
        assert!(q.iter().zip(&t).all(|(q, t)| q & t == *q));
        assert!(chem.substructure_match(KIND, &query, &target).unwrap());
    }

    #[test]
    fn test_exact_conditions_control_annotations() {
        let chem = FragmentChemistry;
        let plain = FragmentStructure::new("C2H6O", [1, 2]);
        let labelled = plain.clone().with_isotopes([13]);

        assert!(!chem
            .exact_match(KIND, &plain, &labelled, ExactConditions::ALL)
            .unwrap());
        assert!(chem
            .exact_match(KIND, &plain, &labelled, ExactConditions::parse("ELE STE").unwrap())
            .unwrap());
        assert_eq!(
            chem.structural_hash(KIND, &plain).unwrap(),
            chem.structural_hash(KIND, &labelled).unwrap()
        );
    }

    #[test]
    fn test_gross_formula_is_canonical() {
        let chem = FragmentChemistry;
        let object = FragmentStructure::new("OH2C", []);
        assert_eq!(chem.gross_formula(KIND, &object).unwrap(), "C H2 O");
    }
}
