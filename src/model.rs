//! Calibration tables for the three segment discriminants.
//!
//! Each segment is an affine function of the feature vector:
//! `z_k = intercept_k + Σ_i weight_k_i * feature_i`.
//!
//! A `ClusterModel` is immutable once built. A recalibrated model replaces the
//! whole table (new file, new fingerprint); nothing mutates coefficients in
//! place.
//!
//! TOML shape:
//! ```toml
//! [[segments]]
//! label = "0_0"
//! intercept = -0.049651
//! [segments.weights]
//! capital = 0.0
//! past_due_ratio = 0.0
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::features::{FeatureVector, FEATURE_COUNT, REQUIRED_COLUMNS};
use crate::segment::{ClusterLabel, SEGMENT_COUNT};

/// Deployment intercepts, in segment order.
pub const DEFAULT_INTERCEPTS: [f64; SEGMENT_COUNT] = [-0.049651, -0.497694, 0.547347];

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("reading model file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing model TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("expected 3 segments, found {0}")]
    SegmentCount(usize),
    #[error("segment {index} must be labelled `{expected}`, found `{found}`")]
    LabelOrder {
        index: usize,
        expected: ClusterLabel,
        found: String,
    },
    #[error("segment `{label}` weights unknown feature `{feature}`")]
    UnknownFeature { label: ClusterLabel, feature: String },
    #[error("segment `{label}` has a non-finite {term}")]
    NonFinite { label: ClusterLabel, term: String },
}

/// One affine discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearModel {
    pub intercept: f64,
    /// Per-feature weights in `REQUIRED_COLUMNS` order.
    pub weights: [f64; FEATURE_COUNT],
}

impl LinearModel {
    pub fn intercept_only(intercept: f64) -> Self {
        Self {
            intercept,
            weights: [0.0; FEATURE_COUNT],
        }
    }

    #[inline]
    pub fn score(&self, x: &FeatureVector) -> f64 {
        self.weights
            .iter()
            .zip(x.values())
            .fold(self.intercept, |z, (w, v)| z + w * v)
    }
}

/// The three segment discriminants, indexed like `ClusterLabel::ALL`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterModel {
    segments: [LinearModel; SEGMENT_COUNT],
}

impl Default for ClusterModel {
    /// Built-in deployment calibration. Only the intercepts ship with the
    /// engine; per-feature weights come from the calibration file.
    fn default() -> Self {
        Self {
            segments: DEFAULT_INTERCEPTS.map(LinearModel::intercept_only),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    segments: Vec<SegmentFile>,
}

#[derive(Debug, Deserialize)]
struct SegmentFile {
    label: String,
    intercept: f64,
    #[serde(default)]
    weights: BTreeMap<String, f64>,
}

impl ClusterModel {
    /// Build from explicit tables; rejects non-finite coefficients.
    pub fn new(segments: [LinearModel; SEGMENT_COUNT]) -> Result<Self, ModelError> {
        for (label, m) in ClusterLabel::ALL.into_iter().zip(segments.iter()) {
            if !m.intercept.is_finite() {
                return Err(ModelError::NonFinite {
                    label,
                    term: "intercept".into(),
                });
            }
            if let Some(i) = m.weights.iter().position(|w| !w.is_finite()) {
                return Err(ModelError::NonFinite {
                    label,
                    term: format!("weight for `{}`", REQUIRED_COLUMNS[i]),
                });
            }
        }
        Ok(Self { segments })
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ModelError> {
        let file: ModelFile = toml::from_str(s)?;
        if file.segments.len() != SEGMENT_COUNT {
            return Err(ModelError::SegmentCount(file.segments.len()));
        }

        let mut segments = [LinearModel::intercept_only(0.0); SEGMENT_COUNT];
        for (index, (seg, expected)) in file
            .segments
            .into_iter()
            .zip(ClusterLabel::ALL)
            .enumerate()
        {
            if seg.label.trim() != expected.as_str() {
                return Err(ModelError::LabelOrder {
                    index,
                    expected,
                    found: seg.label,
                });
            }
            let mut model = LinearModel::intercept_only(seg.intercept);
            for (feature, w) in seg.weights {
                let slot = REQUIRED_COLUMNS
                    .iter()
                    .position(|c| *c == feature)
                    .ok_or(ModelError::UnknownFeature {
                        label: expected,
                        feature,
                    })?;
                model.weights[slot] = w;
            }
            segments[index] = model;
        }

        Self::new(segments)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn segment(&self, label: ClusterLabel) -> &LinearModel {
        &self.segments[label.index()]
    }

    pub fn segments(&self) -> &[LinearModel; SEGMENT_COUNT] {
        &self.segments
    }

    /// Short, stable identifier of the coefficient table: first 12 hex chars
    /// of SHA-256 over the little-endian coefficient bytes.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for m in &self.segments {
            hasher.update(m.intercept.to_le_bytes());
            for w in &m.weights {
                hasher.update(w.to_le_bytes());
            }
        }
        short_hex(&hasher.finalize())
    }
}

/// First six digest bytes as lowercase hex.
pub(crate) fn short_hex(digest: &[u8]) -> String {
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[segments]]
        label = "0_0"
        intercept = -0.049651
        [segments.weights]
        capital = 0.5
        past_due_ratio = -2.0

        [[segments]]
        label = "0_1"
        intercept = -0.497694

        [[segments]]
        label = "Main_1"
        intercept = 0.547347
        [segments.weights]
        balance_growth_rate = 1.25
    "#;

    #[test]
    fn default_has_deployment_intercepts() {
        let m = ClusterModel::default();
        let got = ClusterLabel::ALL.map(|l| m.segment(l).intercept);
        assert_eq!(got, DEFAULT_INTERCEPTS);
        assert!(m.segments().iter().all(|s| s.weights == [0.0; FEATURE_COUNT]));
    }

    #[test]
    fn parses_weights_into_feature_slots() {
        let m = ClusterModel::from_toml_str(SAMPLE).unwrap();
        let low = m.segment(ClusterLabel::Consolidated);
        assert_eq!(low.weights[0], 0.5);
        assert_eq!(low.weights[5], -2.0);
        assert_eq!(m.segment(ClusterLabel::Growth).weights[6], 1.25);
        assert_eq!(m.segment(ClusterLabel::Alert).weights, [0.0; FEATURE_COUNT]);
    }

    #[test]
    fn linear_score_is_intercept_plus_dot() {
        let m = ClusterModel::from_toml_str(SAMPLE).unwrap();
        let mut x = FeatureVector::zeros();
        x.0[0] = 2.0;
        x.0[5] = 0.25;
        let z = m.segment(ClusterLabel::Consolidated).score(&x);
        assert!((z - (-0.049651 + 1.0 - 0.5)).abs() < 1e-12);
    }

    #[test]
    fn rejects_wrong_label_order() {
        let bad = SAMPLE.replacen("\"0_1\"", "\"Main_1\"", 1);
        assert!(matches!(
            ClusterModel::from_toml_str(&bad),
            Err(ModelError::LabelOrder { index: 1, .. })
        ));
    }

    #[test]
    fn rejects_unknown_feature_and_segment_count() {
        let bad = SAMPLE.replace("capital = 0.5", "capitol = 0.5");
        assert!(matches!(
            ClusterModel::from_toml_str(&bad),
            Err(ModelError::UnknownFeature { .. })
        ));

        let two = "[[segments]]\nlabel=\"0_0\"\nintercept=0.0\n\
                   [[segments]]\nlabel=\"0_1\"\nintercept=0.0\n";
        assert!(matches!(
            ClusterModel::from_toml_str(two),
            Err(ModelError::SegmentCount(2))
        ));
    }

    #[test]
    fn rejects_non_finite_coefficients() {
        let mut segs = *ClusterModel::default().segments();
        segs[2].weights[3] = f64::NAN;
        let err = ClusterModel::new(segs).unwrap_err();
        assert!(err.to_string().contains("credit_risk_index"));
    }

    #[test]
    fn fingerprint_tracks_coefficients() {
        let a = ClusterModel::default();
        let b = ClusterModel::from_toml_str(SAMPLE).unwrap();
        assert_eq!(a.fingerprint(), ClusterModel::default().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
    }
}
