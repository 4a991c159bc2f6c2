//! Top-N similarity search by adaptive thresholding
//!
//! The search guesses a starting threshold from the ranked containers, scans
//! everything at or above it, then adjusts:
//!
//! - too many hits (more than twice the limit): raise the threshold to the
//!   `limit`-th best similarity and drop the rest in memory, no rescan
//! - too few hits: back off, doubling the step each time, and scan only the
//!   newly admitted band `[new, old)` so no record is read twice
//!
//! It stops once it holds at least `limit` hits or the threshold reaches the
//! caller's minimum. Every record with similarity at or above the final
//! threshold has been seen, so the best `limit` of the gathered hits are the
//! best `limit` overall. Each step is kept in [`TopNMatcher::probes`].

use crate::core::chem::Chemistry;
use crate::core::error::Result;
use crate::core::index::Index;
use crate::core::matcher::estimator::{Estimate, TimeEstimate};
use crate::core::matcher::similarity::check_window;
use crate::core::matcher::{reject_partition, Cursor, MatcherBase, SearchType};
use crate::core::options::SearchOptions;
use crate::core::store::similarity::{RankedContainer, SimQuery, SimWindow, SimilarityMetric};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Expected hits in the first container of the starting model
const HITS_PER_CONTAINER: usize = 5;

/// First back-off step; doubled after each back-off
const INITIAL_STEP: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeAction {
    Initial,
    BackOff,
    Tighten,
    Accept,
}

/// One step of the threshold search
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Probe {
    pub threshold: f64,
    /// Hits held after the step
    pub hits: usize,
    pub action: ProbeAction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Hit {
    pub id: u64,
    pub number: u64,
    pub similarity: f64,
}

fn best_first(a: &Hit, b: &Hit) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then(a.id.cmp(&b.id))
}

/// Starting threshold from the ranked containers
///
/// Container `i` in fit order is expected to contribute `5 * 2 ^ i` hits.
/// `*` binds tighter than the bitwise XOR `^`, so the model is `10 ^ i`:
/// 10, 11, 8, 9, 14, ... Once the running total reaches `limit`, the search
/// starts at the bound of the following container.
pub(crate) fn initial_threshold(ranked: &[RankedContainer], limit: usize, min: f64) -> f64 {
    let mut expected = 0usize;
    for (i, container) in ranked.iter().enumerate() {
        expected += ((HITS_PER_CONTAINER * 2) ^ i).min(container.count as usize);
        if expected >= limit {
            let bound = ranked.get(i + 1).map_or(min, |next| next.bound);
            return bound.clamp(min, 1.0_f64.max(min));
        }
    }
    min
}

/// Adaptive threshold search; `scan` returns the live hits inside a window
pub(crate) fn search_adaptive<F>(
    limit: usize,
    min: f64,
    initial: f64,
    mut scan: F,
) -> Result<(Vec<Hit>, Vec<Probe>)>
where
    F: FnMut(SimWindow) -> Result<Vec<Hit>>,
{
    let mut probes = Vec::new();
    if limit == 0 {
        return Ok((Vec::new(), probes));
    }

    let probe = |probes: &mut Vec<Probe>, threshold: f64, hits: usize, action| {
        debug!("Top-N probe {:?} at {:.4}: {} hits", action, threshold, hits);
        probes.push(Probe {
            threshold,
            hits,
            action,
        });
    };

    let mut threshold = initial.max(min);
    let mut hits = scan(SimWindow::inclusive(threshold, f64::INFINITY))?;
    probe(&mut probes, threshold, hits.len(), ProbeAction::Initial);

    let mut step = INITIAL_STEP;
    loop {
        if hits.len() > 2 * limit {
            hits.sort_by(best_first);
            threshold = hits[limit - 1].similarity;
            hits.retain(|h| h.similarity >= threshold);
            probe(&mut probes, threshold, hits.len(), ProbeAction::Tighten);
        }
        if hits.len() >= limit || threshold <= min {
            break;
        }
        let lower = (threshold - step).max(min);
        hits.extend(scan(SimWindow::half_open(lower, threshold))?);
        threshold = lower;
        step *= 2.0;
        probe(&mut probes, threshold, hits.len(), ProbeAction::BackOff);
    }

    hits.sort_by(best_first);
    hits.truncate(limit);
    probe(&mut probes, threshold, hits.len(), ProbeAction::Accept);
    Ok((hits, probes))
}

pub struct TopNMatcher<C: Chemistry> {
    base: MatcherBase<C>,
    fingerprint: Vec<u8>,
    metric: SimilarityMetric,
    limit: usize,
    min: f64,
    results: Option<VecDeque<Hit>>,
    probes: Vec<Probe>,
}

impl<C: Chemistry> TopNMatcher<C> {
    pub fn new(
        index: Arc<Index<C>>,
        fingerprint: Vec<u8>,
        limit: usize,
        min: f64,
        options: &SearchOptions,
    ) -> Result<Self> {
        reject_partition(options, SearchType::TopN)?;
        check_window(min, 1.0_f64.max(min))?;
        let metric = options.metric.unwrap_or(index.properties().metric);
        Ok(TopNMatcher {
            base: MatcherBase::new(index)?,
            fingerprint,
            metric,
            limit,
            min,
            results: None,
            probes: Vec::new(),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    fn collect(&mut self) -> Result<()> {
        let index = Arc::clone(self.base.index());
        let query = SimQuery::new(&self.fingerprint, self.metric);
        let store_window = SimWindow::inclusive(self.min, f64::INFINITY);

        let ranked = index.view(|view| {
            view.stores
                .similarity
                .ranked_containers(view.arena, &query, &store_window)
        })?;
        let initial = initial_threshold(&ranked, self.limit, self.min);

        let scan = |window: SimWindow| {
            index.view(|view| {
                let store = &view.stores.similarity;
                let mut found = Vec::new();
                for ranked in store.ranked_containers(view.arena, &query, &window)? {
                    store.search_container(view.arena, ranked.container, &query, &window, &mut found)?;
                }
                let mut hits = Vec::with_capacity(found.len());
                for (number, similarity) in found {
                    if let Some(id) = view.external_id(number)? {
                        hits.push(Hit {
                            id,
                            number,
                            similarity,
                        });
                    }
                }
                Ok(hits)
            })
        };

        let (hits, probes) = search_adaptive(self.limit, self.min, initial, scan)?;
        debug!(
            "Top-N search ({}) settled after {} probes with {} of {} hits",
            self.metric,
            probes.len(),
            hits.len(),
            self.limit
        );
        self.probes = probes;
        self.results = Some(hits.into());
        Ok(())
    }
}

impl<C: Chemistry> Cursor<C> for TopNMatcher<C> {
    fn base(&self) -> &MatcherBase<C> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MatcherBase<C> {
        &mut self.base
    }

    fn advance(&mut self) -> Result<bool> {
        if self.results.is_none() {
            self.collect()?;
        }
        let index = Arc::clone(self.base.index());
        while let Some(hit) = self.results.as_mut().and_then(|r| r.pop_front()) {
            // Removed after collection: skip
            if let Some((id, serialized)) = index.view(|view| view.live_record(hit.number))? {
                self.base.set_current(id, serialized, Some(hit.similarity));
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn remaining_results(&self) -> Estimate {
        match &self.results {
            Some(results) => Estimate {
                value: results.len() as f64,
                error: 0.0,
            },
            None => Estimate {
                value: self.limit as f64,
                error: self.limit as f64,
            },
        }
    }

    fn remaining_time(&self) -> TimeEstimate {
        TimeEstimate::ZERO
    }
}
