//! Search cursors
//!
//! A [`Matcher`] is a forward-only cursor over the results of one query.
//! Every variant shares a [`MatcherBase`] holding the index handle, the
//! generation it was created under and the current record. Calling
//! [`Matcher::next`] after the index was closed fails with
//! [`ChemdexError::StaleHandle`].
//!
//! Matchers take the index read lock once per step and never hold it while
//! verifying a candidate. They are not meant to be shared across threads;
//! parallel scans use one matcher per `part:p/n` partition.

pub mod enumerate;
pub mod estimator;
pub mod exact;
pub mod formula;
pub mod similarity;
pub mod substructure;
pub mod top_n;

pub use enumerate::EnumerateMatcher;
pub use estimator::{Estimate, TimeEstimate};
pub use exact::ExactMatcher;
pub use formula::FormulaMatcher;
pub use similarity::SimilarityMatcher;
pub use substructure::SubstructureMatcher;
pub use top_n::{Probe, ProbeAction, TopNMatcher};

use crate::core::chem::{Chemistry, ObjectKind};
use crate::core::error::{ChemdexError, Result};
use crate::core::index::{Index, IndexState};
use crate::core::options::SearchOptions;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SearchType {
    Substructure,
    Similarity,
    TopN,
    Exact,
    Formula,
    Enumerate,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Substructure => "substructure",
            SearchType::Similarity => "similarity",
            SearchType::TopN => "top-n",
            SearchType::Exact => "exact",
            SearchType::Formula => "formula",
            SearchType::Enumerate => "enumerate",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct CurrentRecord {
    id: u64,
    serialized: Option<Vec<u8>>,
    similarity: Option<f64>,
}

/// State shared by every matcher variant
pub struct MatcherBase<C: Chemistry> {
    index: Arc<Index<C>>,
    generation: u64,
    current: Option<CurrentRecord>,
    finished: bool,
}

impl<C: Chemistry> MatcherBase<C> {
    pub(crate) fn new(index: Arc<Index<C>>) -> Result<Self> {
        if index.state() == IndexState::Closed {
            return Err(ChemdexError::Closed);
        }
        let generation = index.generation();
        Ok(MatcherBase {
            index,
            generation,
            current: None,
            finished: false,
        })
    }

    pub(crate) fn index(&self) -> &Arc<Index<C>> {
        &self.index
    }

    pub fn kind(&self) -> ObjectKind {
        self.index.kind()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn begin_step(&mut self) -> Result<()> {
        self.index.check_generation(self.generation)?;
        self.current = None;
        Ok(())
    }

    pub(crate) fn set_current(&mut self, id: u64, serialized: Vec<u8>, similarity: Option<f64>) {
        self.current = Some(CurrentRecord {
            id,
            serialized: Some(serialized),
            similarity,
        });
    }

    fn current_id(&self) -> Result<u64> {
        self.current
            .as_ref()
            .map(|c| c.id)
            .ok_or(ChemdexError::NoCurrentObject)
    }

    fn take_object(&mut self) -> Result<C::Object> {
        self.index.check_generation(self.generation)?;
        let bytes = self
            .current
            .as_mut()
            .and_then(|c| c.serialized.take())
            .ok_or(ChemdexError::NoCurrentObject)?;
        self.index.chemistry().deserialize(self.index.kind(), &bytes)
    }

    fn similarity(&self) -> Result<f64> {
        self.current
            .as_ref()
            .and_then(|c| c.similarity)
            .ok_or(ChemdexError::NoCurrentObject)
    }
}

/// One step of a concrete matcher
pub(crate) trait Cursor<C: Chemistry> {
    fn base(&self) -> &MatcherBase<C>;

    fn base_mut(&mut self) -> &mut MatcherBase<C>;

    /// Move to the next hit and record it in the base; false when exhausted
    fn advance(&mut self) -> Result<bool>;

    fn remaining_results(&self) -> Estimate;

    fn remaining_time(&self) -> TimeEstimate;
}

/// Forward-only search cursor
pub enum Matcher<C: Chemistry> {
    Substructure(SubstructureMatcher<C>),
    Similarity(SimilarityMatcher<C>),
    TopN(TopNMatcher<C>),
    Exact(ExactMatcher<C>),
    Formula(FormulaMatcher<C>),
    Enumerate(EnumerateMatcher<C>),
}

impl<C: Chemistry> Matcher<C> {
    pub fn substructure(
        index: Arc<Index<C>>,
        query: C::Query,
        options: &SearchOptions,
    ) -> Result<Self> {
        Ok(Matcher::Substructure(SubstructureMatcher::new(
            index, query, options,
        )?))
    }

    /// Records whose similarity to `query` lies in `[min, max]`
    pub fn similarity(
        index: Arc<Index<C>>,
        query: &C::Object,
        min: f64,
        max: f64,
        options: &SearchOptions,
    ) -> Result<Self> {
        let fp = similarity_fingerprint(&index, query)?;
        Self::similarity_with_fingerprint(index, fp, min, max, options)
    }

    pub fn similarity_with_fingerprint(
        index: Arc<Index<C>>,
        fingerprint: Vec<u8>,
        min: f64,
        max: f64,
        options: &SearchOptions,
    ) -> Result<Self> {
        Ok(Matcher::Similarity(SimilarityMatcher::new(
            index,
            fingerprint,
            min,
            max,
            options,
        )?))
    }

    /// The `limit` records most similar to `query` with similarity at least `min`
    pub fn top_n(
        index: Arc<Index<C>>,
        query: &C::Object,
        limit: usize,
        min: f64,
        options: &SearchOptions,
    ) -> Result<Self> {
        let fp = similarity_fingerprint(&index, query)?;
        Self::top_n_with_fingerprint(index, fp, limit, min, options)
    }

    pub fn top_n_with_fingerprint(
        index: Arc<Index<C>>,
        fingerprint: Vec<u8>,
        limit: usize,
        min: f64,
        options: &SearchOptions,
    ) -> Result<Self> {
        Ok(Matcher::TopN(TopNMatcher::new(
            index,
            fingerprint,
            limit,
            min,
            options,
        )?))
    }

    pub fn exact(index: Arc<Index<C>>, query: C::Object, options: &SearchOptions) -> Result<Self> {
        Ok(Matcher::Exact(ExactMatcher::new(index, query, options)?))
    }

    /// Records whose gross formula satisfies `query` (`C6 H6`, `>= C6`, ...)
    pub fn formula(index: Arc<Index<C>>, query: &str, options: &SearchOptions) -> Result<Self> {
        Ok(Matcher::Formula(FormulaMatcher::new(index, query, options)?))
    }

    /// Every live record in insertion order
    pub fn enumerate(index: Arc<Index<C>>, options: &SearchOptions) -> Result<Self> {
        Ok(Matcher::Enumerate(EnumerateMatcher::new(index, options)?))
    }

    fn cursor(&self) -> &dyn Cursor<C> {
        match self {
            Matcher::Substructure(m) => m,
            Matcher::Similarity(m) => m,
            Matcher::TopN(m) => m,
            Matcher::Exact(m) => m,
            Matcher::Formula(m) => m,
            Matcher::Enumerate(m) => m,
        }
    }

    fn cursor_mut(&mut self) -> &mut dyn Cursor<C> {
        match self {
            Matcher::Substructure(m) => m,
            Matcher::Similarity(m) => m,
            Matcher::TopN(m) => m,
            Matcher::Exact(m) => m,
            Matcher::Formula(m) => m,
            Matcher::Enumerate(m) => m,
        }
    }

    pub fn search_type(&self) -> SearchType {
        match self {
            Matcher::Substructure(_) => SearchType::Substructure,
            Matcher::Similarity(_) => SearchType::Similarity,
            Matcher::TopN(_) => SearchType::TopN,
            Matcher::Exact(_) => SearchType::Exact,
            Matcher::Formula(_) => SearchType::Formula,
            Matcher::Enumerate(_) => SearchType::Enumerate,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.cursor().base().kind()
    }

    /// Advance to the next hit; false once the search is exhausted
    pub fn next(&mut self) -> Result<bool> {
        let cursor = self.cursor_mut();
        cursor.base_mut().begin_step()?;
        if cursor.base().finished {
            return Ok(false);
        }
        let found = cursor.advance()?;
        if !found {
            cursor.base_mut().finished = true;
        }
        Ok(found)
    }

    pub fn current_id(&self) -> Result<u64> {
        self.cursor().base().current_id()
    }

    /// The current record; a second call for the same hit fails
    pub fn current_object(&mut self) -> Result<C::Object> {
        self.cursor_mut().base_mut().take_object()
    }

    pub fn current_similarity(&self) -> Result<f64> {
        match self {
            Matcher::Similarity(m) => m.base().similarity(),
            Matcher::TopN(m) => m.base().similarity(),
            other => Err(ChemdexError::Unsupported(format!(
                "{} search has no similarity",
                other.search_type()
            ))),
        }
    }

    pub fn estimate_remaining_results(&self) -> Estimate {
        if self.cursor().base().finished {
            return Estimate::ZERO;
        }
        self.cursor().remaining_results()
    }

    pub fn estimate_remaining_time(&self) -> TimeEstimate {
        if self.cursor().base().finished {
            return TimeEstimate::ZERO;
        }
        self.cursor().remaining_time()
    }

    /// Probes taken by a Top-N search so far
    pub fn probes(&self) -> Option<&[Probe]> {
        match self {
            Matcher::TopN(m) => Some(m.probes()),
            _ => None,
        }
    }
}

impl<C: Chemistry> fmt::Debug for Matcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.cursor().base();
        f.debug_struct("Matcher")
            .field("type", &self.search_type())
            .field("kind", &base.kind())
            .field("generation", &base.generation)
            .field("finished", &base.finished)
            .finish()
    }
}

fn similarity_fingerprint<C: Chemistry>(index: &Index<C>, query: &C::Object) -> Result<Vec<u8>> {
    let params = index.fingerprint_params();
    Ok(index
        .chemistry()
        .fingerprints(index.kind(), query, &params)?
        .sim)
}

/// Reject a partition option on searches that have no containers to split
pub(crate) fn reject_partition(options: &SearchOptions, search: SearchType) -> Result<()> {
    match options.partition {
        Some(p) if !p.is_whole() => Err(ChemdexError::InvalidOption(format!(
            "part option is not supported for {} search",
            search
        ))),
        _ => Ok(()),
    }
}
