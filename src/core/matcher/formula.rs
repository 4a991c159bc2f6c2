//! Gross formula search

use crate::core::chem::Chemistry;
use crate::core::error::Result;
use crate::core::formula::{FormulaQuery, GrossFormula};
use crate::core::index::Index;
use crate::core::matcher::estimator::{Estimate, SearchProgress, TimeEstimate};
use crate::core::matcher::{reject_partition, Cursor, MatcherBase, SearchType};
use crate::core::options::SearchOptions;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

pub struct FormulaMatcher<C: Chemistry> {
    base: MatcherBase<C>,
    query: FormulaQuery,
    candidates: Option<VecDeque<u64>>,
    progress: SearchProgress,
}

impl<C: Chemistry> FormulaMatcher<C> {
    pub fn new(index: Arc<Index<C>>, query: &str, options: &SearchOptions) -> Result<Self> {
        reject_partition(options, SearchType::Formula)?;
        Ok(FormulaMatcher {
            base: MatcherBase::new(index)?,
            query: FormulaQuery::parse(query)?,
            candidates: None,
            progress: SearchProgress::new(1),
        })
    }

    pub fn query(&self) -> &FormulaQuery {
        &self.query
    }
}

impl<C: Chemistry> Cursor<C> for FormulaMatcher<C> {
    fn base(&self) -> &MatcherBase<C> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MatcherBase<C> {
        &mut self.base
    }

    fn advance(&mut self) -> Result<bool> {
        let index = Arc::clone(self.base.index());
        if self.candidates.is_none() {
            let query = &self.query;
            let found = index.view(|view| view.stores.formula.candidates(view.arena, query))?;
            self.progress.record_container(found.len() as u64);
            self.candidates = Some(found.into());
        }

        while let Some(number) = self.candidates.as_mut().and_then(|c| c.pop_front()) {
            let started = Instant::now();
            let record = index.view(|view| {
                if !view.is_live(number)? {
                    return Ok(None);
                }
                let Some(text) = view.stores.formula.get(view.arena, number)? else {
                    return Ok(None);
                };
                Ok(Some((text, view.live_record(number)?)))
            })?;
            let Some((text, Some((id, serialized)))) = record else {
                continue;
            };

            let matched = self.query.matches(&GrossFormula::parse(&text)?);
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
    fn test_formula_relations() {
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
        for (id, formula) in [(1, "CH4"), (2, "C2H6"), (3, "C6H6"), (4, "H6C6"), (5, "C6H5Cl")] {
            index
                .insert(&FragmentStructure::new(formula, [id as u32]), Some(id))
                .unwrap();
        }
        let none = SearchOptions::default();
        let search = |q: &str| ids(&mut Matcher::formula(Arc::clone(&index), q, &none).unwrap());

        assert_eq!(search("C6H6"), vec![3, 4]);
        assert_eq!(search("= C6 H6"), vec![3, 4]);
        assert_eq!(search(">= C6 H5"), vec![3, 4, 5]);
        assert_eq!(search("<= C2 H6"), vec![1, 2]);

        index.remove(4).unwrap();
        assert_eq!(search("C6H6"), vec![3]);

        assert!(Matcher::formula(Arc::clone(&index), "C6H6 ???", &none).is_err());
        assert!(matches!(
            Matcher::formula(
                Arc::clone(&index),
                "C6H6",
                &SearchOptions::parse("part:1/3").unwrap()
            ),
            Err(ChemdexError::InvalidOption(_))
        ));
    }
}
