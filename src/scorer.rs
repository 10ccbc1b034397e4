//! # Discriminant Scorer
//! Pure mapping `FeatureVector → (scores, probabilities, label)`.
//!
//! - Three affine scores from the calibration tables.
//! - Max-subtracted softmax into a probability simplex.
//! - Label = argmax, first maximum wins (lowest segment index on ties).
//!
//! No I/O and no shared mutable state; batches are an order-preserving map
//! and may fan out across threads.

use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;

use crate::features::{BranchRecord, FeatureVector};
use crate::model::ClusterModel;
use crate::segment::{ClusterLabel, SEGMENT_COUNT};

/// Below this many rows a batch is scored on the calling thread.
pub const DEFAULT_PARALLEL_MIN_ROWS: usize = 2048;

/// Raw discriminant outputs `(z0, z1, z2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreTriple(pub [f64; SEGMENT_COUNT]);

/// Segment probabilities `(p0, p1, p2)`; non-negative, summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbabilityTriple(pub [f64; SEGMENT_COUNT]);

impl ProbabilityTriple {
    pub fn get(&self, label: ClusterLabel) -> f64 {
        self.0[label.index()]
    }

    /// Probability as a percentage rounded to one decimal, for reporting.
    pub fn percent(&self, label: ClusterLabel) -> f64 {
        (self.get(label) * 1000.0).round() / 10.0
    }

    pub fn argmax(&self) -> usize {
        argmax(&self.0)
    }

    pub fn label(&self) -> ClusterLabel {
        ClusterLabel::ALL[self.argmax()]
    }
}

/// Evaluate the three discriminants.
pub fn scores(model: &ClusterModel, x: &FeatureVector) -> ScoreTriple {
    ScoreTriple(ClusterLabel::ALL.map(|l| model.segment(l).score(x)))
}

/// Numerically stable softmax: the maximum is subtracted before
/// exponentiating, so the largest term is always `exp(0) = 1` and the
/// normaliser is at least 1.
///
/// Non-finite scores (overflowed dot products) still yield a simplex: NaN
/// carries no mass, `+inf` components split the mass evenly.
pub fn softmax(z: ScoreTriple) -> ProbabilityTriple {
    let z = z.0.map(|v| if v.is_nan() { f64::NEG_INFINITY } else { v });
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if !max.is_finite() {
        let hits = z.map(|v| if v == max { 1.0 } else { 0.0 });
        let n: f64 = hits.iter().sum();
        return ProbabilityTriple(hits.map(|h| h / n));
    }

    let exps = z.map(|v| (v - max).exp());
    let total: f64 = exps.iter().sum();
    ProbabilityTriple(exps.map(|e| e / total))
}

/// Index of the first maximal component.
pub fn argmax(p: &[f64; SEGMENT_COUNT]) -> usize {
    let mut best = 0;
    for i in 1..SEGMENT_COUNT {
        if p[i] > p[best] {
            best = i;
        }
    }
    best
}

/// Everything the scorer derives from one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assessment {
    pub scores: ScoreTriple,
    pub probabilities: ProbabilityTriple,
    pub label: ClusterLabel,
}

/// A branch record with its segment assignment. Fields are read-only;
/// re-scoring builds a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredBranch {
    record: BranchRecord,
    assessment: Assessment,
}

impl ScoredBranch {
    pub fn record(&self) -> &BranchRecord {
        &self.record
    }
    pub fn branch(&self) -> &str {
        &self.record.branch
    }
    pub fn region(&self) -> &str {
        &self.record.region
    }
    pub fn zone(&self) -> &str {
        &self.record.zone
    }
    pub fn features(&self) -> &FeatureVector {
        &self.record.features
    }
    pub fn scores(&self) -> ScoreTriple {
        self.assessment.scores
    }
    pub fn probabilities(&self) -> ProbabilityTriple {
        self.assessment.probabilities
    }
    pub fn label(&self) -> ClusterLabel {
        self.assessment.label
    }
    pub fn assessment(&self) -> &Assessment {
        &self.assessment
    }
}

/// Scorer bound to one immutable calibration.
#[derive(Debug, Clone)]
pub struct Scorer {
    model: Arc<ClusterModel>,
    parallel_min_rows: usize,
}

impl Scorer {
    pub fn new(model: ClusterModel) -> Self {
        Self {
            model: Arc::new(model),
            parallel_min_rows: DEFAULT_PARALLEL_MIN_ROWS,
        }
    }

    /// Batch size from which rows are scored on the rayon pool.
    pub fn with_parallel_min_rows(mut self, rows: usize) -> Self {
        self.parallel_min_rows = rows.max(1);
        self
    }

    pub fn model(&self) -> &ClusterModel {
        &self.model
    }

    pub fn evaluate(&self, x: &FeatureVector) -> Assessment {
        let scores = scores(&self.model, x);
        let probabilities = softmax(scores);
        Assessment {
            scores,
            probabilities,
            label: probabilities.label(),
        }
    }

    pub fn score(&self, record: BranchRecord) -> ScoredBranch {
        let assessment = self.evaluate(&record.features);
        ScoredBranch { record, assessment }
    }

    /// Score every record; output order equals input order.
    pub fn score_batch(&self, records: Vec<BranchRecord>) -> Vec<ScoredBranch> {
        if records.len() >= self.parallel_min_rows {
            records.into_par_iter().map(|r| self.score(r)).collect()
        } else {
            records.into_iter().map(|r| self.score(r)).collect()
        }
    }
}
