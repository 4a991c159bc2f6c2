//! Running estimates of search progress
//!
//! Matchers record how many candidates each container yields, how often a
//! candidate verifies and how long verification takes. From these running
//! means and variances (Welford's method) they project remaining results and
//! remaining time, so a caller can apply its own timeout policy.

use serde::Serialize;
use std::time::Duration;

/// Streaming mean and variance
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStat {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; 0 with fewer than two samples
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// A projected value and its uncertainty (one standard deviation)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub value: f64,
    pub error: f64,
}

impl Estimate {
    pub const ZERO: Estimate = Estimate {
        value: 0.0,
        error: 0.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeEstimate {
    pub remaining: Duration,
    pub error: Duration,
}

impl TimeEstimate {
    pub const ZERO: TimeEstimate = TimeEstimate {
        remaining: Duration::ZERO,
        error: Duration::ZERO,
    };
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

#[derive(Debug, Clone, Default)]
pub struct SearchProgress {
    containers_total: u64,
    containers_done: u64,
    pending: u64,
    candidates: RunningStat,
    match_rate: RunningStat,
    latency: RunningStat,
}

impl SearchProgress {
    pub fn new(containers_total: u64) -> Self {
        SearchProgress {
            containers_total,
            ..Default::default()
        }
    }

    pub fn set_containers(&mut self, total: u64) {
        self.containers_total = total;
    }

    /// A container was screened and produced `candidates`
    pub fn record_container(&mut self, candidates: u64) {
        self.containers_done += 1;
        self.candidates.push(candidates as f64);
        self.pending = candidates;
    }

    /// One candidate was verified
    pub fn record_candidate(&mut self, matched: bool, elapsed: Duration) {
        self.pending = self.pending.saturating_sub(1);
        self.match_rate.push(if matched { 1.0 } else { 0.0 });
        self.latency.push(elapsed.as_secs_f64());
    }

    pub fn verified(&self) -> u64 {
        self.match_rate.count()
    }

    pub fn remaining_candidates(&self) -> Estimate {
        let containers_left = self.containers_total.saturating_sub(self.containers_done) as f64;
        Estimate {
            value: self.pending as f64 + containers_left * self.candidates.mean(),
            error: containers_left.sqrt() * self.candidates.std_dev(),
        }
    }

    pub fn remaining_results(&self) -> Estimate {
        let candidates = self.remaining_candidates();
        if self.match_rate.count() == 0 {
            // Nothing verified yet: any rate is as likely as another
            return Estimate {
                value: candidates.value * 0.5,
                error: candidates.value * 0.5 + candidates.error,
            };
        }
        let p = self.match_rate.mean();
        let p_error = (self.match_rate.variance() / self.match_rate.count() as f64).sqrt();
        Estimate {
            value: candidates.value * p,
            error: candidates.value * p_error
                + candidates.error * p
                + (candidates.value * p * (1.0 - p)).sqrt(),
        }
    }

    pub fn remaining_time(&self) -> TimeEstimate {
        let candidates = self.remaining_candidates();
        let mean = self.latency.mean();
        let mean_error = if self.latency.count() > 0 {
            (self.latency.variance() / self.latency.count() as f64).sqrt()
        } else {
            0.0
        };
        TimeEstimate {
            remaining: seconds(candidates.value * mean),
            error: seconds(candidates.value * mean_error + candidates.error * mean),
        }
    }
}
