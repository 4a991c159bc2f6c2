//! Walk over every live record

use crate::core::chem::Chemistry;
use crate::core::error::Result;
use crate::core::index::Index;
use crate::core::matcher::estimator::{Estimate, TimeEstimate};
use crate::core::matcher::{Cursor, MatcherBase};
use crate::core::options::{Partition, SearchOptions};
use std::sync::Arc;

/// Yields live records in record-number order
///
/// A `part:p/n` option splits by record number modulo `n`.
pub struct EnumerateMatcher<C: Chemistry> {
    base: MatcherBase<C>,
    partition: Partition,
    next_number: u64,
    /// Record slots when the walk started; later inserts are not visited
    end: Option<u64>,
}

impl<C: Chemistry> EnumerateMatcher<C> {
    pub fn new(index: Arc<Index<C>>, options: &SearchOptions) -> Result<Self> {
        Ok(EnumerateMatcher {
            base: MatcherBase::new(index)?,
            partition: options.partition(),
            next_number: 0,
            end: None,
        })
    }
}

impl<C: Chemistry> Cursor<C> for EnumerateMatcher<C> {
    fn base(&self) -> &MatcherBase<C> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MatcherBase<C> {
        &mut self.base
    }

    fn advance(&mut self) -> Result<bool> {
        let index = Arc::clone(self.base.index());
        let end = match self.end {
            Some(end) => end,
            None => {
                let end = index.view(|view| view.record_count())?;
                self.end = Some(end);
                end
            }
        };

        while self.next_number < end {
            let number = self.next_number;
            self.next_number += 1;
            if !self.partition.includes(number) {
                continue;
            }
            if let Some((id, serialized)) = index.view(|view| view.live_record(number))? {
                self.base.set_current(id, serialized, None);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn remaining_results(&self) -> Estimate {
        let remaining = match self.end {
            Some(end) => end.saturating_sub(self.next_number),
            None => return Estimate::ZERO,
        };
        Estimate {
            value: remaining as f64 / self.partition.count as f64,
            error: 0.0,
        }
    }

    fn remaining_time(&self) -> TimeEstimate {
        TimeEstimate::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chem::fragment::{FragmentChemistry, FragmentStructure};
    use crate::core::chem::{FingerprintParams, ObjectKind};
    use crate::core::matcher::Matcher;
    use crate::core::test_support::small_options;
    use tempfile::TempDir;

    #[test]
    fn test_enumerate_skips_removed() {
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
        for i in 0..10u64 {
            index
                .insert(&FragmentStructure::new("C", [i as u32]), Some(100 + i))
                .unwrap();
        }
        index.remove(103).unwrap();

        let walk = |options: &SearchOptions| {
            let mut matcher = Matcher::enumerate(Arc::clone(&index), options).unwrap();
            let mut ids = Vec::new();
            while matcher.next().unwrap() {
                ids.push(matcher.current_id().unwrap());
            }
            ids
        };

        let all = walk(&SearchOptions::default());
        assert_eq!(all, vec![100, 101, 102, 104, 105, 106, 107, 108, 109]);

        let mut parts = walk(&SearchOptions::parse("part:1/2").unwrap());
        parts.extend(walk(&SearchOptions::parse("part:2/2").unwrap()));
        parts.sort_unstable();
        assert_eq!(parts, all);
    }
}
