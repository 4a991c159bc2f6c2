//! Properties fixed at index creation and persisted as JSON in the arena

use crate::core::arena::Arena;
use crate::core::chem::{FingerprintParams, ObjectKind};
use crate::core::error::{ChemdexError, Result};
use crate::core::index::header::{IndexHeader, FORMAT_VERSION};
use crate::core::options::IndexOptions;
use crate::core::store::similarity::{SimilarityConfig, SimilarityMetric};
use serde::{Deserialize, Serialize};
use zerocopy::little_endian::U64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub version: String,
    pub kind: ObjectKind,
    pub fingerprint: FingerprintParams,
    pub metric: SimilarityMetric,
    pub id_key: Option<String>,
    pub similarity: SimilarityConfig,
    pub sub_pack_size: u32,
    pub hash_buckets: u64,
    pub byte_block_size: u64,
}

impl Properties {
    pub fn new(kind: ObjectKind, fingerprint: FingerprintParams, options: &IndexOptions) -> Self {
        Properties {
            version: FORMAT_VERSION.to_string(),
            kind,
            fingerprint,
            metric: options.sim_metric,
            id_key: options.id_key.clone(),
            similarity: options.similarity,
            sub_pack_size: options.sub_pack_size,
            hash_buckets: options.hash_buckets,
            byte_block_size: options.byte_block_size,
        }
    }

    /// Serialize into the arena and record the location in `header`
    pub fn store(&self, arena: &mut Arena, header: &mut IndexHeader) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        header.properties = arena.store_bytes(&json)?;
        header.properties_len = U64::new(json.len() as u64);
        Ok(())
    }

    pub fn load(arena: &Arena, header: &IndexHeader) -> Result<Self> {
        let len = header.properties_len.get() as usize;
        let bytes = arena.bytes(header.properties, len)?;
        let properties: Properties = serde_json::from_slice(bytes)?;
        if properties.version != FORMAT_VERSION {
            return Err(ChemdexError::VersionMismatch {
                found: properties.version,
                expected: FORMAT_VERSION.to_string(),
            });
        }
        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let props = Properties::new(
            ObjectKind::Reaction,
            FingerprintParams::new(4, 2).unwrap(),
            &IndexOptions::default(),
        );
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["kind"], "Reaction");
        assert_eq!(json["fingerprint"]["sim_qwords"], 2);
        assert_eq!(json["metric"]["type"], "tanimoto");

        let back: Properties = serde_json::from_value(json).unwrap();
        assert_eq!(back, props);
    }
}
