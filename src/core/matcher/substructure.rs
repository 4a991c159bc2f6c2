//! Substructure search: transposed-pack screening, then full verification

use crate::core::chem::Chemistry;
use crate::core::error::Result;
use crate::core::index::Index;
use crate::core::matcher::estimator::{Estimate, SearchProgress, TimeEstimate};
use crate::core::matcher::{Cursor, MatcherBase};
use crate::core::options::{Partition, SearchOptions};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

struct Plan {
    bit_order: Vec<usize>,
    /// Packs that existed when the search started; container `packs` is the increment
    packs: u64,
    containers: VecDeque<u64>,
}

pub struct SubstructureMatcher<C: Chemistry> {
    base: MatcherBase<C>,
    query: C::Query,
    fingerprint: Vec<u8>,
    partition: Partition,
    plan: Option<Plan>,
    candidates: VecDeque<u64>,
    progress: SearchProgress,
    hits: u64,
}

impl<C: Chemistry> SubstructureMatcher<C> {
    pub fn new(index: Arc<Index<C>>, query: C::Query, options: &SearchOptions) -> Result<Self> {
        let params = index.fingerprint_params();
        let fingerprint = index
            .chemistry()
            .query_fingerprint(index.kind(), &query, &params)?;
        Ok(SubstructureMatcher {
            base: MatcherBase::new(index)?,
            query,
            fingerprint,
            partition: options.partition(),
            plan: None,
            candidates: VecDeque::new(),
            progress: SearchProgress::default(),
            hits: 0,
        })
    }

    fn plan(&mut self) -> Result<()> {
        let index = Arc::clone(self.base.index());
        let fingerprint = &self.fingerprint;
        let (bit_order, packs) = index.view(|view| {
            let store = &view.stores.substructure;
            Ok((
                store.query_bit_order(view.arena, fingerprint)?,
                store.pack_count(view.arena)?,
            ))
        })?;
        let containers: VecDeque<u64> = (0..=packs)
            .filter(|&c| self.partition.includes(c))
            .collect();
        debug!(
            "Substructure search over {} of {} containers ({} query bits)",
            containers.len(),
            packs + 1,
            bit_order.len()
        );
        self.progress.set_containers(containers.len() as u64);
        self.plan = Some(Plan {
            bit_order,
            packs,
            containers,
        });
        Ok(())
    }

    /// Screen the next container into `candidates`; false when none are left
    fn screen_next(&mut self) -> Result<bool> {
        let Some(plan) = self.plan.as_mut() else {
            return Ok(false);
        };
        let Some(container) = plan.containers.pop_front() else {
            return Ok(false);
        };
        let index = Arc::clone(self.base.index());
        let fingerprint = &self.fingerprint;
        let (bit_order, packs) = (&plan.bit_order, plan.packs);

        let found = index.view(|view| {
            let store = &view.stores.substructure;
            if container < packs {
                return store.screen_pack(view.arena, container, bit_order);
            }
            // Packs transposed since the search started hold records that
            // were in the increment then
            let mut found = Vec::new();
            for pack in packs..store.pack_count(view.arena)? {
                found.extend(store.screen_pack(view.arena, pack, bit_order)?);
            }
            found.extend(store.screen_increment(view.arena, fingerprint)?);
            Ok(found)
        })?;

        self.progress.record_container(found.len() as u64);
        self.candidates.extend(found);
        Ok(true)
    }
}

impl<C: Chemistry> Cursor<C> for SubstructureMatcher<C> {
    fn base(&self) -> &MatcherBase<C> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MatcherBase<C> {
        &mut self.base
    }

    fn advance(&mut self) -> Result<bool> {
        if self.plan.is_none() {
            self.plan()?;
        }
        let index = Arc::clone(self.base.index());
        let kind = index.kind();
        loop {
            let Some(number) = self.candidates.pop_front() else {
                if self.screen_next()? {
                    continue;
                }
                debug!("Substructure search finished with {} hits", self.hits);
                return Ok(false);
            };

            let Some((id, serialized)) = index.view(|view| view.live_record(number))? else {
                continue;
            };

            let started = Instant::now();
            let target = index.chemistry().deserialize(kind, &serialized)?;
            let matched = index
                .chemistry()
                .substructure_match(kind, &self.query, &target)?;
            self.progress.record_candidate(matched, started.elapsed());

            if matched {
                self.hits += 1;
                self.base.set_current(id, serialized, None);
                return Ok(true);
            }
        }
    }

    fn remaining_results(&self) -> Estimate {
        self.progress.remaining_results()
    }

    fn remaining_time(&self) -> TimeEstimate {
        self.progress.remaining_time()
    }
}
