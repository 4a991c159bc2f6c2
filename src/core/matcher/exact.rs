//! Exact search: structural-hash bucket lookup, then full comparison

use crate::core::chem::{Chemistry, ExactConditions};
use crate::core::error::Result;
use crate::core::index::Index;
use crate::core::matcher::estimator::{Estimate, SearchProgress, TimeEstimate};
use crate::core::matcher::{reject_partition, Cursor, MatcherBase, SearchType};
use crate::core::options::SearchOptions;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

pub struct ExactMatcher<C: Chemistry> {
    base: MatcherBase<C>,
    query: C::Object,
    hash: u32,
    conditions: ExactConditions,
    candidates: Option<VecDeque<u64>>,
    progress: SearchProgress,
}

impl<C: Chemistry> ExactMatcher<C> {
    pub fn new(index: Arc<Index<C>>, query: C::Object, options: &SearchOptions) -> Result<Self> {
        reject_partition(options, SearchType::Exact)?;
        let hash = index.chemistry().structural_hash(index.kind(), &query)?;
        Ok(ExactMatcher {
            base: MatcherBase::new(index)?,
            query,
            hash,
            conditions: options.exact,
            candidates: None,
            progress: SearchProgress::new(1),
        })
    }

    pub fn conditions(&self) -> ExactConditions {
        self.conditions
    }
}

impl<C: Chemistry> Cursor<C> for ExactMatcher<C> {
    fn base(&self) -> &MatcherBase<C> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MatcherBase<C> {
        &mut self.base
    }

    fn advance(&mut self) -> Result<bool> {
        let index = Arc::clone(self.base.index());
        if self.candidates.is_none() {
            let hash = self.hash;
            let found = index.view(|view| view.stores.exact.candidates(view.arena, hash))?;
            self.progress.record_container(found.len() as u64);
            self.candidates = Some(found.into());
        }

        let kind = index.kind();
        while let Some(number) = self.candidates.as_mut().and_then(|c| c.pop_front()) {
            let Some((id, serialized)) = index.view(|view| view.live_record(number))? else {
                continue;
            };
            let started = Instant::now();
            let target = index.chemistry().deserialize(kind, &serialized)?;
            let matched = index
                .chemistry()
                .exact_match(kind, &self.query, &target, self.conditions)?;
            self.progress.record_candidate(matched, started.elapsed());
            if matched {
                self.base.set_current(id, serialized, None);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn remaining_results(&self) -> Estimate {
        self.progress.remaining_results()
    }

    fn remaining_time(&self) -> TimeEstimate {
        self.progress.remaining_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chem::fragment::{FragmentChemistry, FragmentStructure};
    use crate::core::chem::{FingerprintParams, ObjectKind};
    use crate::core::error::ChemdexError;
    use crate::core::matcher::Matcher;
    use crate::core::test_support::small_options;
    use tempfile::TempDir;

    fn ids(matcher: &mut Matcher<FragmentChemistry>) -> Vec<u64> {
        let mut ids = Vec::new();
        while matcher.next().unwrap() {
            ids.push(matcher.current_id().unwrap());
        }
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_exact_with_conditions() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(
            Index::create(
                Arc::new(FragmentChemistry),
                dir.path().join("db"),
                ObjectKind::Molecule,
                FingerprintParams::new(1, 1).unwrap(),
                &small_options(),
            )
            .unwrap(),
        );

        let plain = FragmentStructure::new("C4H10O", [1, 2, 3]);
        let chiral = plain.clone().with_stereo([7]);
        let other = FragmentStructure::new("C4H10O", [1, 2, 4]);
        index.insert(&plain, Some(10)).unwrap();
        index.insert(&chiral, Some(11)).unwrap();
        index.insert(&other, Some(12)).unwrap();
        for i in 0..30 {
            index
                .insert(&FragmentStructure::new("CH4", [100 + i]), None)
                .unwrap();
        }

        let strict = SearchOptions::default();
        assert_eq!(
            ids(&mut Matcher::exact(Arc::clone(&index), plain.clone(), &strict).unwrap()),
            vec![10]
        );

        let loose = SearchOptions::parse("exact:NONE").unwrap();
        assert_eq!(
            ids(&mut Matcher::exact(Arc::clone(&index), plain.clone(), &loose).unwrap()),
            vec![10, 11]
        );

        index.remove(10).unwrap();
        assert_eq!(
            ids(&mut Matcher::exact(Arc::clone(&index), plain.clone(), &loose).unwrap()),
            vec![11]
        );

        let parted = SearchOptions::parse("part:2/2").unwrap();
        assert!(matches!(
            Matcher::exact(Arc::clone(&index), plain, &parted),
            Err(ChemdexError::InvalidOption(_))
        ));
    }
}
