//! Similarity coefficients and their upper bounds
//!
//! All metrics are computed from three bit counts: `c` bits common to query
//! and target, `q` bits in the query and `b` bits in the target. A zero
//! denominator yields 0.

use crate::core::error::{ChemdexError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SimilarityMetric {
    /// `c / (q + b - c)`
    Tanimoto,
    /// `c / (alpha * (q - c) + beta * (b - c) + c)`
    Tversky { alpha: f64, beta: f64 },
    /// `c / q`: the fraction of query bits present in the target
    EuclidSub,
}

impl Default for SimilarityMetric {
    fn default() -> Self {
        SimilarityMetric::Tanimoto
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

impl SimilarityMetric {
    /// Parse `tanimoto`, `euclid-sub`, `tversky` or `tversky <alpha> <beta>`
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let name = tokens.next().unwrap_or("").to_ascii_lowercase();
        let metric = match name.as_str() {
            "tanimoto" => SimilarityMetric::Tanimoto,
            "euclid-sub" | "euclid_sub" => SimilarityMetric::EuclidSub,
            "tversky" => {
                let weights: Vec<f64> = tokens
                    .by_ref()
                    .map(|t| {
                        t.parse::<f64>().map_err(|_| {
                            ChemdexError::InvalidOption(format!("bad tversky weight '{}'", t))
                        })
                    })
                    .collect::<Result<_>>()?;
                match weights.as_slice() {
                    [] => SimilarityMetric::Tversky {
                        alpha: 0.5,
                        beta: 0.5,
                    },
                    [alpha, beta] if *alpha >= 0.0 && *beta >= 0.0 => SimilarityMetric::Tversky {
                        alpha: *alpha,
                        beta: *beta,
                    },
                    _ => {
                        return Err(ChemdexError::InvalidOption(format!(
                            "tversky takes two non-negative weights, got '{}'",
                            text
                        )))
                    }
                }
            }
            _ => {
                return Err(ChemdexError::InvalidOption(format!(
                    "unknown similarity metric '{}'",
                    text
                )))
            }
        };
        if tokens.next().is_some() {
            return Err(ChemdexError::InvalidOption(format!(
                "trailing tokens in metric '{}'",
                text
            )));
        }
        Ok(metric)
    }

    pub fn coefficient(&self, common: u32, query_bits: u32, target_bits: u32) -> f64 {
        let (c, q, b) = (common as f64, query_bits as f64, target_bits as f64);
        match *self {
            SimilarityMetric::Tanimoto => ratio(c, q + b - c),
            SimilarityMetric::Tversky { alpha, beta } => {
                ratio(c, alpha * (q - c) + beta * (b - c) + c)
            }
            SimilarityMetric::EuclidSub => ratio(c, q),
        }
    }

    /// Best coefficient any target could reach given what is already known
    ///
    /// Targets have between `min_bits` and `max_bits` bits; at least
    /// `missing_query` query bits are known absent from them and at least
    /// `extra_target` of their bits are known absent from the query. For
    /// target size `b` the common count is at most
    /// `min(q - missing_query, b - extra_target)`. Every metric here is a
    /// ratio of linear functions of `b` on either side of the point where
    /// those two terms cross, so the maximum sits at `min_bits`, `max_bits`
    /// or that crossing point.
    pub fn upper_bound(
        &self,
        query_bits: u32,
        min_bits: u32,
        max_bits: u32,
        missing_query: u32,
        extra_target: u32,
    ) -> f64 {
        if min_bits > max_bits {
            return 0.0;
        }
        let reachable = query_bits.saturating_sub(missing_query);
        let crossing = (reachable + extra_target).clamp(min_bits, max_bits);
        [min_bits, max_bits, crossing]
            .into_iter()
            .map(|b| {
                let common = reachable.min(b.saturating_sub(extra_target));
                self.coefficient(common, query_bits, b)
            })
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMetric::Tanimoto => f.write_str("tanimoto"),
            SimilarityMetric::Tversky { alpha, beta } => write!(f, "tversky {} {}", alpha, beta),
            SimilarityMetric::EuclidSub => f.write_str("euclid-sub"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse() {
        assert_eq!(SimilarityMetric::parse("Tanimoto").unwrap(), SimilarityMetric::Tanimoto);
        assert_eq!(SimilarityMetric::parse("euclid-sub").unwrap(), SimilarityMetric::EuclidSub);
        assert_eq!(
            SimilarityMetric::parse("tversky 0.3 0.7").unwrap(),
            SimilarityMetric::Tversky {
                alpha: 0.3,
                beta: 0.7
            }
        );
        assert!(SimilarityMetric::parse("tversky 0.3").is_err());
        assert!(SimilarityMetric::parse("cosine").is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for metric in [
            SimilarityMetric::Tanimoto,
            SimilarityMetric::EuclidSub,
            SimilarityMetric::Tversky {
                alpha: 0.25,
                beta: 1.0,
            },
        ] {
            assert_eq!(SimilarityMetric::parse(&metric.to_string()).unwrap(), metric);
        }
    }

    #[test]
    fn test_coefficients() {
        let t = SimilarityMetric::Tanimoto;
        assert_eq!(t.coefficient(10, 10, 10), 1.0);
        assert_eq!(t.coefficient(6, 10, 6), 0.6);
        assert_eq!(t.coefficient(0, 0, 0), 0.0);

        assert_eq!(SimilarityMetric::EuclidSub.coefficient(3, 10, 3), 0.3);

        let tv = SimilarityMetric::Tversky {
            alpha: 1.0,
            beta: 0.0,
        };
        assert_eq!(tv.coefficient(4, 8, 20), 0.5);
    }

    proptest! {
        #[test]
        fn prop_bound_dominates(
            q in 0u32..64,
            b in 0u32..64,
            c_seed in 0u32..64,
            m10_seed in 0u32..64,
            m01_seed in 0u32..64,
            lo_seed in 0u32..64,
            hi_seed in 0u32..64,
            metric_idx in 0usize..3,
        ) {
            let c = c_seed % (q.min(b) + 1);
            // Known-absent counts consistent with the actual overlap
            let missing = m10_seed % (q - c + 1);
            let extra = m01_seed % (b - c + 1);
            let lo = lo_seed % (b + 1);
            let hi = b + hi_seed % 8;
            let metric = [
                SimilarityMetric::Tanimoto,
                SimilarityMetric::EuclidSub,
                SimilarityMetric::Tversky { alpha: 0.3, beta: 0.9 },
            ][metric_idx];

            let actual = metric.coefficient(c, q, b);
            let bound = metric.upper_bound(q, lo, hi, missing, extra);
            prop_assert!(bound + 1e-12 >= actual, "bound {} < actual {}", bound, actual);
        }
    }
}
