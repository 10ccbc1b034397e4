//! The three risk segments and what each one means for a branch.
//!
//! Segment order is fixed and shared with score/probability triples:
//! index 0 → `0_0`, index 1 → `0_1`, index 2 → `Main_1`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SEGMENT_COUNT: usize = 3;

/// Risk segment assigned to a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClusterLabel {
    /// Consolidated branch, lowest relative risk.
    #[serde(rename = "0_0")]
    Consolidated,
    /// Portfolio under stress; delinquency and FPD above average.
    #[serde(rename = "0_1")]
    Alert,
    /// Controlled risk with room to grow.
    #[serde(rename = "Main_1")]
    Growth,
}

impl ClusterLabel {
    /// All labels in triple order.
    pub const ALL: [ClusterLabel; SEGMENT_COUNT] = [Self::Consolidated, Self::Alert, Self::Growth];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consolidated => "0_0",
            Self::Alert => "0_1",
            Self::Growth => "Main_1",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown cluster label `{s}`"))
    }
}

/// Operational reading of a segment for branch staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guidance {
    pub label: ClusterLabel,
    pub title: &'static str,
    pub summary: &'static str,
    pub actions: [&'static str; 3],
}

/// Guidance for one segment.
pub fn guidance(label: ClusterLabel) -> Guidance {
    match label {
        ClusterLabel::Consolidated => Guidance {
            label,
            title: "Consolidated branch (lowest relative risk)",
            summary: "Risk is well controlled and the portfolio is healthy. \
                      A reference point for sharing good practice.",
            actions: [
                "Document successful collection and origination practices so other branches can replicate them.",
                "Keep preventive follow-up on accounts in their first days past due.",
                "Explore growth among customers similar to the current good-portfolio profile.",
            ],
        },
        ClusterLabel::Alert => Guidance {
            label,
            title: "Branch on alert (portfolio at risk)",
            summary: "Delinquency and FPD indicators sit above average. \
                      Priority is containing risk and reinforcing collections.",
            actions: [
                "Review the past-due list daily and prioritise the largest balances.",
                "Contact customers with a recent first-payment default (0-30 days) before they roll into hard delinquency.",
                "Tighten origination: reduce amounts and terms for new high-risk loans.",
            ],
        },
        ClusterLabel::Growth => Guidance {
            label,
            title: "Growth potential (medium risk)",
            summary: "Risk is controlled and there is room to grow. \
                      Placements can be pushed while watching quality.",
            actions: [
                "Identify well-behaved customers for credit-line increases or new products.",
                "Monitor delinquency and FPD weekly to stay inside the target range.",
                "Coordinate with origination on campaigns aimed at lower-risk segments.",
            ],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_matches_triple_indices() {
        assert_eq!(ClusterLabel::ALL.map(ClusterLabel::as_str), ["0_0", "0_1", "Main_1"]);
        for (i, l) in ClusterLabel::ALL.into_iter().enumerate() {
            assert_eq!(l.index(), i);
            assert_eq!(ClusterLabel::from_index(i), Some(l));
        }
        assert_eq!(ClusterLabel::from_index(3), None);
    }

    #[test]
    fn serializes_as_tag_text() {
        let v = serde_json::to_value(ClusterLabel::Growth).unwrap();
        assert_eq!(v, serde_json::json!("Main_1"));
        let back: ClusterLabel = serde_json::from_str("\"0_1\"").unwrap();
        assert_eq!(back, ClusterLabel::Alert);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("main_1".parse::<ClusterLabel>().unwrap(), ClusterLabel::Growth);
        assert!("1_1".parse::<ClusterLabel>().is_err());
    }

    #[test]
    fn every_segment_has_guidance() {
        for l in ClusterLabel::ALL {
            let g = guidance(l);
            assert_eq!(g.label, l);
            assert!(!g.title.is_empty());
        }
    }
}
