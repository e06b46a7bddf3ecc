use facegate_config::Strategy;
use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::faces::extractor::{COLOR_FEATURES, HEURISTIC_DIMENSION, HISTOGRAM_BINS, STRUCTURAL_FEATURES};
use crate::faces::store::EnrolledTemplate;
use crate::identity::IdentityId;

const COLOR_WEIGHT: f64 = 0.1;
const STRUCTURAL_WEIGHT: f64 = 0.15;
const HISTOGRAM_WEIGHT: f64 = 0.1;

/// Dissimilarity between two signatures of equal length.
///
/// Implementations must be symmetric and return zero for identical inputs.
pub trait Metric {
    fn name(&self) -> &'static str;

    fn distance(&self, lhs: &[f64], rhs: &[f64]) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl Metric for EuclideanDistance {
    fn name(&self) -> &'static str {
        "euclidean"
    }

    fn distance(&self, lhs: &[f64], rhs: &[f64]) -> f64 {
        euclidean_distance(lhs, rhs)
    }
}

pub fn euclidean_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter()
        .zip(rhs.iter())
        .map(|(l, r)| (l - r) * (l - r))
        .sum::<f64>()
        .sqrt()
}

/// Weighted score over heuristic feature-bag vectors, exposed as
/// `1 - similarity`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedHeuristicSimilarity;

impl WeightedHeuristicSimilarity {
    /// Similarity in `[0, 1]`; 1 means indistinguishable feature bags.
    pub fn similarity(&self, lhs: &[f64], rhs: &[f64]) -> f64 {
        if lhs.len() != HEURISTIC_DIMENSION || rhs.len() != HEURISTIC_DIMENSION {
            return 0.0;
        }

        let mut score = 0.0;
        let mut weights = 0.0;

        for idx in 0..COLOR_FEATURES {
            let diff = (lhs[idx] - rhs[idx]).abs();
            score += (1.0 - diff / 255.0).max(0.0) * COLOR_WEIGHT;
            weights += COLOR_WEIGHT;
        }

        for idx in COLOR_FEATURES..COLOR_FEATURES + STRUCTURAL_FEATURES {
            let diff = (lhs[idx] - rhs[idx]).abs();
            let scale = lhs[idx].max(rhs[idx]).max(1.0);
            score += (1.0 - diff / scale).max(0.0) * STRUCTURAL_WEIGHT;
            weights += STRUCTURAL_WEIGHT;
        }

        let base = COLOR_FEATURES + STRUCTURAL_FEATURES;
        for channel in 0..3 {
            let start = base + channel * HISTOGRAM_BINS;
            let range = start..start + HISTOGRAM_BINS;
            if let Some(correlation) = pearson(&lhs[range.clone()], &rhs[range]) {
                score += correlation.max(0.0) * HISTOGRAM_WEIGHT;
                weights += HISTOGRAM_WEIGHT;
            }
        }

        if weights > 0.0 {
            (score / weights).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Metric for WeightedHeuristicSimilarity {
    fn name(&self) -> &'static str {
        "weighted-heuristic"
    }

    fn distance(&self, lhs: &[f64], rhs: &[f64]) -> f64 {
        1.0 - self.similarity(lhs, rhs)
    }
}

/// Pearson correlation; `None` when either side has no variance.
fn pearson(lhs: &[f64], rhs: &[f64]) -> Option<f64> {
    let n = lhs.len() as f64;
    let mean_l = lhs.iter().sum::<f64>() / n;
    let mean_r = rhs.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_l = 0.0;
    let mut var_r = 0.0;
    for (l, r) in lhs.iter().zip(rhs.iter()) {
        cov += (l - mean_l) * (r - mean_r);
        var_l += (l - mean_l) * (l - mean_l);
        var_r += (r - mean_r) * (r - mean_r);
    }
    let denom = (var_l * var_r).sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(cov / denom)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub identity: IdentityId,
    pub distance: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched(MatchResult),
    NoMatch {
        /// Smallest distance seen, even when it missed the tolerance.
        closest_distance: Option<f64>,
        compared: usize,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }
}

/// Finds the enrolled identity closest to a probe signature.
///
/// Callers hand over a snapshot of the template set, so implementations
/// backed by an index may ignore the slice ordering entirely.
pub trait Matcher {
    fn tolerance(&self) -> f64;

    fn best_match(&self, probe: &[f64], templates: &[EnrolledTemplate]) -> AppResult<MatchOutcome>;
}

/// Compares the probe against every template in order.
///
/// A candidate replaces the current best only when strictly closer, so on
/// an exact tie the template scanned first wins.
#[derive(Debug, Clone)]
pub struct LinearScanMatcher<M> {
    metric: M,
    tolerance: f64,
}

impl<M: Metric> LinearScanMatcher<M> {
    pub fn new(metric: M, tolerance: f64) -> Self {
        Self { metric, tolerance }
    }
}

impl<M: Metric> Matcher for LinearScanMatcher<M> {
    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn best_match(&self, probe: &[f64], templates: &[EnrolledTemplate]) -> AppResult<MatchOutcome> {
        if templates.is_empty() {
            return Ok(MatchOutcome::NoMatch {
                closest_distance: None,
                compared: 0,
            });
        }

        let mut best: Option<(&EnrolledTemplate, f64)> = None;
        let mut closest = f64::INFINITY;
        for template in templates {
            if template.template.len() != probe.len() {
                return Err(AppError::DimensionMismatch {
                    expected: template.template.len(),
                    found: probe.len(),
                });
            }
            let distance = self.metric.distance(probe, &template.template);
            if distance < closest {
                closest = distance;
            }
            let improves = best.map_or(true, |(_, best_distance)| distance < best_distance);
            if distance < self.tolerance && improves {
                best = Some((template, distance));
            }
        }

        debug!(
            metric = self.metric.name(),
            compared = templates.len(),
            closest,
            tolerance = self.tolerance,
            "linear scan finished"
        );

        Ok(match best {
            Some((template, distance)) => MatchOutcome::Matched(MatchResult {
                identity: template.identity.clone(),
                distance,
                confidence: confidence_from_distance(distance),
            }),
            None => MatchOutcome::NoMatch {
                closest_distance: closest.is_finite().then_some(closest),
                compared: templates.len(),
            },
        })
    }
}

/// `1 - distance`, clamped to `[0, 1]`.
pub fn confidence_from_distance(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Matcher paired with the metric of a deployment strategy.
pub fn matcher_for(strategy: Strategy, tolerance: f64) -> Box<dyn Matcher> {
    match strategy {
        Strategy::Embedding => Box::new(LinearScanMatcher::new(EuclideanDistance, tolerance)),
        Strategy::Heuristic => Box::new(LinearScanMatcher::new(
            WeightedHeuristicSimilarity,
            tolerance,
        )),
    }
}
