//! Threshold similarity search over cells in best-first order

use crate::core::chem::Chemistry;
use crate::core::error::{ChemdexError, Result};
use crate::core::index::Index;
use crate::core::matcher::estimator::{Estimate, SearchProgress, TimeEstimate};
use crate::core::matcher::{Cursor, MatcherBase};
use crate::core::options::{Partition, SearchOptions};
use crate::core::store::similarity::{SimContainer, SimQuery, SimWindow, SimilarityMetric};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub(crate) fn check_window(min: f64, max: f64) -> Result<()> {
    if !(min.is_finite() && max.is_finite()) || min > max {
        return Err(ChemdexError::InvalidOption(format!(
            "similarity window [{}, {}] is empty",
            min, max
        )));
    }
    Ok(())
}

pub struct SimilarityMatcher<C: Chemistry> {
    base: MatcherBase<C>,
    fingerprint: Vec<u8>,
    metric: SimilarityMetric,
    window: SimWindow,
    partition: Partition,
    containers: Option<VecDeque<SimContainer>>,
    hits: VecDeque<(u64, f64)>,
    progress: SearchProgress,
    returned: u64,
}

impl<C: Chemistry> SimilarityMatcher<C> {
    pub fn new(
        index: Arc<Index<C>>,
        fingerprint: Vec<u8>,
        min: f64,
        max: f64,
        options: &SearchOptions,
    ) -> Result<Self> {
        check_window(min, max)?;
        let metric = options.metric.unwrap_or(index.properties().metric);
        Ok(SimilarityMatcher {
            base: MatcherBase::new(index)?,
            fingerprint,
            metric,
            window: SimWindow::inclusive(min, max),
            partition: options.partition(),
            containers: None,
            hits: VecDeque::new(),
            progress: SearchProgress::default(),
            returned: 0,
        })
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    fn plan(&mut self) -> Result<()> {
        let index = Arc::clone(self.base.index());
        let query = SimQuery::new(&self.fingerprint, self.metric);
        let window = self.window;
        let ranked = index.view(|view| {
            view.stores
                .similarity
                .ranked_containers(view.arena, &query, &window)
        })?;
        let containers: VecDeque<SimContainer> = ranked
            .iter()
            .map(|r| r.container)
            .filter(|c| self.partition.includes(c.partition_index()))
            .collect();
        debug!(
            "Similarity search ({}) over {} of {} reachable containers",
            self.metric,
            containers.len(),
            ranked.len()
        );
        self.progress.set_containers(containers.len() as u64);
        self.containers = Some(containers);
        Ok(())
    }

    fn search_next(&mut self) -> Result<bool> {
        let Some(container) = self.containers.as_mut().and_then(|c| c.pop_front()) else {
            return Ok(false);
        };
        let index = Arc::clone(self.base.index());
        let query = SimQuery::new(&self.fingerprint, self.metric);
        let window = self.window;
        let mut found = Vec::new();
        index.view(|view| {
            view.stores
                .similarity
                .search_container(view.arena, container, &query, &window, &mut found)
        })?;
        found.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        self.progress.record_container(found.len() as u64);
        self.hits.extend(found);
        Ok(true)
    }
}

impl<C: Chemistry> Cursor<C> for SimilarityMatcher<C> {
    fn base(&self) -> &MatcherBase<C> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MatcherBase<C> {
        &mut self.base
    }

    fn advance(&mut self) -> Result<bool> {
        if self.containers.is_none() {
            self.plan()?;
        }
        let index = Arc::clone(self.base.index());
        loop {
            let Some((number, similarity)) = self.hits.pop_front() else {
                if self.search_next()? {
                    continue;
                }
                debug!("Similarity search finished with {} hits", self.returned);
                return Ok(false);
            };

            let started = Instant::now();
            let record = index.view(|view| view.live_record(number))?;
            self.progress.record_candidate(record.is_some(), started.elapsed());
            if let Some((id, serialized)) = record {
                self.returned += 1;
                self.base.set_current(id, serialized, Some(similarity));
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
