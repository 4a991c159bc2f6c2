//! Option strings
//!
//! Options arrive as `;`-separated `key:value` pairs, for example
//! `read_only:true;max_mmf_size:512`. Keys are case-insensitive. Search
//! options also accept bare tokens: a similarity metric (`tanimoto`,
//! `tversky 0.3 0.7`) or exact-match flags (`ELE STE`).

use crate::core::chem::ExactConditions;
use crate::core::error::{ChemdexError, Result};
use crate::core::store::similarity::{SimilarityConfig, SimilarityMetric};
use crate::core::store::substructure::DEFAULT_PACK_SIZE;
use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;

/// One parsed `key:value` pair; bare tokens have no key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionPair {
    pub key: Option<String>,
    pub value: String,
}

/// Split an option string into pairs
pub fn parse_pairs(text: &str) -> Vec<OptionPair> {
    text.split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(':') {
            Some((key, value)) => OptionPair {
                key: Some(key.trim().to_ascii_lowercase()),
                value: value.trim().to_string(),
            },
            None => OptionPair {
                key: None,
                value: item.to_string(),
            },
        })
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ChemdexError::InvalidOption(format!(
            "{} expects true or false, got '{}'",
            key, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        ChemdexError::InvalidOption(format!("{} expects a number, got '{}'", key, value))
    })
}

fn parse_megabytes(key: &str, value: &str) -> Result<u64> {
    parse_number::<u64>(key, value)?
        .checked_mul(MB)
        .ok_or_else(|| ChemdexError::InvalidOption(format!("{} of {} MB is too large", key, value)))
}

/// Options given when creating or loading an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub read_only: bool,
    /// Size of the first arena file in bytes
    pub min_mmf_size: u64,
    /// Cap on arena file size in bytes
    pub max_mmf_size: u64,
    /// Record property that carries the external id
    pub id_key: Option<String>,
    pub sim_metric: SimilarityMetric,
    pub similarity: SimilarityConfig,
    pub sub_pack_size: u32,
    pub hash_buckets: u64,
    pub byte_block_size: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            read_only: false,
            min_mmf_size: 32 * MB,
            max_mmf_size: 1024 * MB,
            id_key: None,
            sim_metric: SimilarityMetric::Tanimoto,
            similarity: SimilarityConfig::default(),
            sub_pack_size: DEFAULT_PACK_SIZE,
            hash_buckets: 100_003,
            byte_block_size: MB,
        }
    }
}

impl IndexOptions {
    pub fn parse(text: &str) -> Result<Self> {
        let mut options = IndexOptions::default();
        options.apply(text)?;
        Ok(options)
    }

    /// Apply an option string on top of the current values
    pub fn apply(&mut self, text: &str) -> Result<()> {
        for pair in parse_pairs(text) {
            let Some(key) = pair.key.as_deref() else {
                return Err(ChemdexError::InvalidOption(format!(
                    "expected key:value, got '{}'",
                    pair.value
                )));
            };
            let value = pair.value.as_str();
            match key {
                "read_only" => self.read_only = parse_bool(key, value)?,
                "min_mmf_size" => self.min_mmf_size = parse_megabytes(key, value)?,
                "max_mmf_size" => self.max_mmf_size = parse_megabytes(key, value)?,
                "key" | "id_key" => {
                    self.id_key = (!value.is_empty()).then(|| value.to_string());
                }
                "sim_type" | "metric" => self.sim_metric = SimilarityMetric::parse(value)?,
                "small_base_limit" => {
                    self.similarity.small_base_limit = parse_number(key, value)?
                }
                "cell_build_size" => self.similarity.cell_build_size = parse_number(key, value)?,
                "max_cells" => self.similarity.max_cells = parse_number(key, value)?,
                "sub_pack_size" => self.sub_pack_size = parse_number(key, value)?,
                "hash_buckets" => self.hash_buckets = parse_number(key, value)?,
                other => {
                    return Err(ChemdexError::InvalidOption(format!(
                        "unknown index option '{}'",
                        other
                    )))
                }
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_mmf_size == 0 || self.min_mmf_size > self.max_mmf_size {
            return Err(ChemdexError::InvalidOption(format!(
                "min_mmf_size ({} bytes) must be positive and not exceed max_mmf_size ({} bytes)",
                self.min_mmf_size, self.max_mmf_size
            )));
        }
        if self.sub_pack_size == 0 || self.sub_pack_size % 8 != 0 {
            return Err(ChemdexError::InvalidOption(format!(
                "sub_pack_size {} must be a positive multiple of 8",
                self.sub_pack_size
            )));
        }
        if self.hash_buckets == 0 {
            return Err(ChemdexError::InvalidOption(
                "hash_buckets must be positive".to_string(),
            ));
        }
        self.similarity.validate()
    }
}

/// Shard selector `p/n`: containers with `index % n == p - 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub part: u64,
    pub count: u64,
}

impl Partition {
    pub const WHOLE: Partition = Partition { part: 1, count: 1 };

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || {
            ChemdexError::InvalidOption(format!("partition must look like p/n, got '{}'", text))
        };
        let (p, n) = text.split_once('/').ok_or_else(invalid)?;
        let part: u64 = p.trim().parse().map_err(|_| invalid())?;
        let count: u64 = n.trim().parse().map_err(|_| invalid())?;
        if count == 0 || part == 0 || part > count {
            return Err(ChemdexError::InvalidOption(format!(
                "partition {}/{} needs 1 <= p <= n",
                part, count
            )));
        }
        Ok(Partition { part, count })
    }

    pub fn is_whole(&self) -> bool {
        self.count == 1
    }

    pub fn includes(&self, container: u64) -> bool {
        container % self.count == self.part - 1
    }
}

impl Default for Partition {
    fn default() -> Self {
        Partition::WHOLE
    }
}

/// Options given when starting a search
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchOptions {
    /// Overrides the index's similarity metric
    pub metric: Option<SimilarityMetric>,
    pub partition: Option<Partition>,
    pub exact: ExactConditions,
}

impl SearchOptions {
    pub fn parse(text: &str) -> Result<Self> {
        let mut options = SearchOptions::default();
        for pair in parse_pairs(text) {
            let value = pair.value.as_str();
            match pair.key.as_deref() {
                Some("part") => options.partition = Some(Partition::parse(value)?),
                Some("sim_type") | Some("metric") => {
                    options.metric = Some(SimilarityMetric::parse(value)?)
                }
                Some("exact") => options.exact = ExactConditions::parse(value)?,
                Some(other) => {
                    return Err(ChemdexError::InvalidOption(format!(
                        "unknown search option '{}'",
                        other
                    )))
                }
                None => {
                    if let Ok(metric) = SimilarityMetric::parse(value) {
                        options.metric = Some(metric);
                    } else {
                        options.exact = ExactConditions::parse(value)?;
                    }
                }
            }
        }
        Ok(options)
    }

    pub fn partition(&self) -> Partition {
        self.partition.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(" read_only:true ; ;MAX_MMF_SIZE: 64;tanimoto");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].key.as_deref(), Some("read_only"));
        assert_eq!(pairs[1].key.as_deref(), Some("max_mmf_size"));
        assert_eq!(pairs[1].value, "64");
        assert_eq!(pairs[2].key, None);
    }

    #[test]
    fn test_index_options() {
        let options =
            IndexOptions::parse("read_only:false;min_mmf_size:2;max_mmf_size:16;key:ID;sim_type:tversky 0.2 0.8")
                .unwrap();
        assert!(!options.read_only);
        assert_eq!(options.min_mmf_size, 2 * MB);
        assert_eq!(options.max_mmf_size, 16 * MB);
        assert_eq!(options.id_key.as_deref(), Some("ID"));
        assert_eq!(
            options.sim_metric,
            SimilarityMetric::Tversky {
                alpha: 0.2,
                beta: 0.8
            }
        );
    }

    #[test]
    fn test_index_options_errors() {
        assert!(IndexOptions::parse("colour:blue").is_err());
        assert!(IndexOptions::parse("read_only:maybe").is_err());
        assert!(IndexOptions::parse("min_mmf_size:big").is_err());
        assert!(IndexOptions::parse("min_mmf_size:64;max_mmf_size:8").is_err());
        assert!(IndexOptions::parse("tanimoto").is_err());
    }

    #[test]
    fn test_partition() {
        let p = Partition::parse("2/3").unwrap();
        assert!(p.includes(1) && p.includes(4));
        assert!(!p.includes(0) && !p.includes(2));

        assert!(Partition::parse("0/3").is_err());
        assert!(Partition::parse("4/3").is_err());
        assert!(Partition::parse("1/0").is_err());
        assert!(Partition::parse("1-3").is_err());
    }

    #[test]
    fn test_search_options() {
        let options = SearchOptions::parse("part:1/4;euclid-sub").unwrap();
        assert_eq!(options.partition, Some(Partition { part: 1, count: 4 }));
        assert_eq!(options.metric, Some(SimilarityMetric::EuclidSub));

        let exact = SearchOptions::parse("ELE MAS").unwrap();
        assert!(exact.exact.electrons && exact.exact.isotopes && !exact.exact.stereo);

        assert!(SearchOptions::parse("part:9").is_err());
        assert!(SearchOptions::parse("frobnicate").is_err());
        assert!(SearchOptions::parse("speed:fast").is_err());
    }
}
