//! # Chemdex - Disk-Backed Chemical Structure Index
//!
//! `chemdex` stores molecules or reactions in a directory of memory-mapped
//! files and answers structure searches over them:
//!
//! - **Substructure** search over bit-transposed fingerprint packs
//! - **Similarity** search (threshold and Top-N) over a bit-count histogram
//!   of cells with multibit trees, for Tanimoto, Tversky and Euclid-sub
//! - **Exact** search by structural hash
//! - **Formula** search by gross formula, with `=`, `>=` and `<=`
//! - **Partitioned scans** (`part:p/n`) for external parallelism
//!
//! Parsing, fingerprinting and graph matching are supplied through the
//! [`Chemistry`] trait. [`FragmentChemistry`] is a small reference model used
//! in the examples below.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chemdex::{FragmentChemistry, FragmentQuery, FragmentStructure, IndexBuilder, Matcher, Result, SearchOptions};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let index = Arc::new(IndexBuilder::new(FragmentChemistry).path("molecules").create()?);
//!
//! let ethanol = FragmentStructure::new("C2H6O", [12, 40, 77]);
//! let id = index.insert(&ethanol, None)?;
//!
//! let mut search = Matcher::substructure(
//!     Arc::clone(&index),
//!     FragmentQuery::new([40]),
//!     &SearchOptions::default(),
//! )?;
//! while search.next()? {
//!     assert_eq!(search.current_id()?, id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Session Usage
//!
//! ```rust,no_run
//! use chemdex::{FragmentChemistry, FragmentStructure, ObjectKind, Result, Session};
//!
//! # fn main() -> Result<()> {
//! let mut session = Session::new(FragmentChemistry);
//! let db = session.create_database("molecules", ObjectKind::Molecule, "max_mmf_size:256")?;
//!
//! let benzene = FragmentStructure::new("C6H6", [1, 2, 3]);
//! session.insert_record(db, &benzene, Some(1), None)?;
//!
//! let search = session.search_top_n(db, &benzene, 10, 0.5, "tanimoto")?;
//! while session.next(search)? {
//!     println!("{} {:.3}", session.current_id(search)?, session.current_similarity(search)?);
//! }
//! session.end_search(search)?;
//! session.close_database(db)?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod session;

pub use crate::core::{
    chem::{
        fragment::{FragmentChemistry, FragmentQuery, FragmentStructure},
        Chemistry, ExactConditions, FingerprintParams, Fingerprints, ObjectKind,
    },
    error::{ChemdexError, Result},
    formula::{FormulaQuery, FormulaRelation, GrossFormula},
    index::{Index, IndexState, IndexStats, PreparedRecord},
    matcher::{Estimate, Matcher, Probe, ProbeAction, SearchType, TimeEstimate},
    options::{IndexOptions, Partition, SearchOptions},
    store::{SimilarityConfig, SimilarityMetric},
};
pub use session::{DatabaseId, SearchId, Session};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Builder for creating or opening an [`Index`]
///
/// # Examples
///
/// ```rust,no_run
/// use chemdex::{FingerprintParams, FragmentChemistry, IndexBuilder, SimilarityMetric};
///
/// # fn main() -> chemdex::Result<()> {
/// let index = IndexBuilder::new(FragmentChemistry)
///     .path("/data/reactions")
///     .reactions()
///     .fingerprint(FingerprintParams::new(64, 16)?)
///     .metric(SimilarityMetric::Tversky { alpha: 0.9, beta: 0.1 })
///     .id_key("registry_id")
///     .create()?;
/// # Ok(())
/// # }
/// ```
pub struct IndexBuilder<C: Chemistry> {
    chemistry: Arc<C>,
    path: Option<PathBuf>,
    kind: Option<ObjectKind>,
    fingerprint: FingerprintParams,
    options: IndexOptions,
}

impl<C: Chemistry> IndexBuilder<C> {
    /// Create a builder with default settings
    pub fn new(chemistry: C) -> Self {
        Self::with_chemistry(Arc::new(chemistry))
    }

    /// Create a builder sharing an existing chemistry instance
    pub fn with_chemistry(chemistry: Arc<C>) -> Self {
        IndexBuilder {
            chemistry,
            path: None,
            kind: None,
            fingerprint: FingerprintParams::default(),
            options: IndexOptions::default(),
        }
    }

    /// Directory holding the index files
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn kind(mut self, kind: ObjectKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn molecules(self) -> Self {
        self.kind(ObjectKind::Molecule)
    }

    pub fn reactions(self) -> Self {
        self.kind(ObjectKind::Reaction)
    }

    /// Fingerprint sizes; fixed once the index is created
    pub fn fingerprint(mut self, params: FingerprintParams) -> Self {
        self.fingerprint = params;
        self
    }

    /// Default similarity metric for searches
    pub fn metric(mut self, metric: SimilarityMetric) -> Self {
        self.options.sim_metric = metric;
        self
    }

    /// Take record ids from this property when none is given on insert
    pub fn id_key<S: Into<String>>(mut self, key: S) -> Self {
        self.options.id_key = Some(key.into());
        self
    }

    pub fn similarity_config(mut self, config: SimilarityConfig) -> Self {
        self.options.similarity = config;
        self
    }

    /// Arena file size bounds in bytes
    pub fn file_sizes(mut self, min: u64, max: u64) -> Self {
        self.options.min_mmf_size = min;
        self.options.max_mmf_size = max;
        self
    }

    /// Open without write access (only meaningful for [`IndexBuilder::load`])
    pub fn read_only(mut self) -> Self {
        self.options.read_only = true;
        self
    }

    pub fn options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply an option string such as `max_mmf_size:512;sim_type:tanimoto`
    pub fn option_string(mut self, text: &str) -> Result<Self> {
        self.options.apply(text)?;
        Ok(self)
    }

    fn take_path(&mut self) -> Result<PathBuf> {
        self.path
            .take()
            .ok_or_else(|| ChemdexError::InvalidOption("path must be set".to_string()))
    }

    /// Create a new index (molecules unless set otherwise)
    pub fn create(mut self) -> Result<Index<C>> {
        let path = self.take_path()?;
        let kind = self.kind.unwrap_or(ObjectKind::Molecule);
        info!("Building {} index at {:?}", kind, path);
        Index::create(self.chemistry, path, kind, self.fingerprint, &self.options)
    }

    /// Open an existing index; the kind is read from disk when not set
    pub fn load(mut self) -> Result<Index<C>> {
        let path = self.take_path()?;
        let kind = match self.kind {
            Some(kind) => kind,
            None => {
                let kind = Index::<C>::determine_type(&path)?;
                debug!("Detected {} index at {:?}", kind, path);
                kind
            }
        };
        Index::load(self.chemistry, path, kind, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small(builder: IndexBuilder<FragmentChemistry>) -> IndexBuilder<FragmentChemistry> {
        builder
            .file_sizes(1 << 20, 8 << 20)
            .option_string("hash_buckets:101")
            .unwrap()
    }

    #[test]
    fn test_builder_create_and_load() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reactions");

        let index = small(IndexBuilder::new(FragmentChemistry))
            .path(&path)
            .reactions()
            .fingerprint(FingerprintParams::new(4, 2)?)
            .metric(SimilarityMetric::EuclidSub)
            .create()?;
        let id = index.insert(&FragmentStructure::new("C2H4O2", [5, 6]), None)?;
        index.close()?;

        let loaded = IndexBuilder::new(FragmentChemistry).path(&path).load()?;
        assert_eq!(loaded.kind(), ObjectKind::Reaction);
        assert_eq!(loaded.properties().metric, SimilarityMetric::EuclidSub);
        assert_eq!(loaded.fingerprint_params(), FingerprintParams::new(4, 2)?);
        assert!(loaded.contains(id)?);

        Ok(())
    }

    #[test]
    fn test_builder_read_only() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mols");

        small(IndexBuilder::new(FragmentChemistry)).path(&path).create()?.close()?;

        let index = IndexBuilder::new(FragmentChemistry)
            .path(&path)
            .read_only()
            .load()?;
        assert_eq!(index.state(), IndexState::ReadOnly);
        assert!(matches!(
            index.insert(&FragmentStructure::new("C", [1]), None),
            Err(ChemdexError::ReadOnly)
        ));

        Ok(())
    }

    #[test]
    fn test_builder_requires_path() {
        assert!(matches!(
            IndexBuilder::new(FragmentChemistry).create(),
            Err(ChemdexError::InvalidOption(_))
        ));
        assert!(IndexBuilder::new(FragmentChemistry)
            .option_string("no_such_option:1")
            .is_err());
    }
}
