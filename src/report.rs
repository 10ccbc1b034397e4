//! # Portfolio Report
//! Read-only views over scored branches for the dashboard: cascading
//! region → zone → branch filters, portfolio KPIs with alert flags, the
//! grouped metrics table, the past-due ranking and the segment mix.
//!
//! Nothing here formats currency or percent strings; that stays with the
//! presentation layer. Scores are never modified.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::scorer::ScoredBranch;
use crate::segment::{guidance, ClusterLabel, Guidance};

/// Early-delinquency mean above which the KPI is flagged.
pub const EARLY_DELINQUENCY_ALERT: f64 = 0.06;
/// FPD mean above which the KPI is flagged.
pub const FPD_ALERT: f64 = 0.08;
/// Past-due ratio mean above which the KPI is flagged.
pub const PAST_DUE_RATIO_ALERT: f64 = 0.12;
/// Default length of the past-due ranking.
pub const DEFAULT_TOP_N: usize = 8;

/// Region / zone / branch selection; `None` means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFilter {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl BranchFilter {
    pub fn matches(&self, r: &ScoredBranch) -> bool {
        fn ok(sel: &Option<String>, v: &str) -> bool {
            sel.as_deref().map_or(true, |s| s == v)
        }
        ok(&self.region, r.region()) && ok(&self.zone, r.zone()) && ok(&self.branch, r.branch())
    }

    pub fn apply<'a>(&self, rows: &'a [ScoredBranch]) -> Vec<&'a ScoredBranch> {
        rows.iter().filter(|r| self.matches(r)).collect()
    }
}

/// Choices offered at each filter level, narrowed by the levels above.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub regions: Vec<String>,
    pub zones: Vec<String>,
    pub branches: Vec<String>,
}

/// Sorted distinct regions; zones within the selected region; branches
/// within the selected region and zone. Blank names are skipped.
pub fn filter_options(rows: &[ScoredBranch], filter: &BranchFilter) -> FilterOptions {
    fn distinct<'s>(it: impl Iterator<Item = &'s str>) -> Vec<String> {
        it.filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    let by_region = BranchFilter {
        region: filter.region.clone(),
        ..Default::default()
    };
    let by_zone = BranchFilter {
        region: filter.region.clone(),
        zone: filter.zone.clone(),
        branch: None,
    };

    FilterOptions {
        regions: distinct(rows.iter().map(|r| r.region())),
        zones: distinct(rows.iter().filter(|r| by_region.matches(r)).map(|r| r.zone())),
        branches: distinct(rows.iter().filter(|r| by_zone.matches(r)).map(|r| r.branch())),
    }
}

/// Headline numbers for a set of branches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioKpis {
    pub capital_total: f64,
    pub past_due_balance_total: f64,
    pub balance_growth_mean: f64,
    pub early_delinquency_mean: f64,
    pub first_payment_default_mean: f64,
    pub past_due_ratio_mean: f64,
    pub branch_count: usize,
    pub alerts: KpiAlerts,
}

/// Which KPIs sit on the wrong side of their threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KpiAlerts {
    pub shrinking_balance: bool,
    pub early_delinquency: bool,
    pub first_payment_default: bool,
    pub past_due_ratio: bool,
}

/// `None` for an empty selection.
pub fn compute_kpis<'a, I>(rows: I) -> Option<PortfolioKpis>
where
    I: IntoIterator<Item = &'a ScoredBranch>,
{
    let mut n = 0usize;
    let mut sums = [0.0f64; 6];
    let mut branches = BTreeSet::new();
    for r in rows {
        let f = r.features();
        sums[0] += f.capital();
        sums[1] += f.past_due_balance();
        sums[2] += f.balance_growth_rate();
        sums[3] += f.early_delinquency_rate();
        sums[4] += f.first_payment_default_rate();
        sums[5] += f.past_due_ratio();
        if !r.branch().is_empty() {
            branches.insert(r.branch());
        }
        n += 1;
    }
    if n == 0 {
        return None;
    }

    let mean = |s: f64| s / n as f64;
    let (growth, early, fpd, ratio) = (mean(sums[2]), mean(sums[3]), mean(sums[4]), mean(sums[5]));
    Some(PortfolioKpis {
        capital_total: sums[0],
        past_due_balance_total: sums[1],
        balance_growth_mean: growth,
        early_delinquency_mean: early,
        first_payment_default_mean: fpd,
        past_due_ratio_mean: ratio,
        branch_count: branches.len(),
        alerts: KpiAlerts {
            shrinking_balance: growth < 0.0,
            early_delinquency: early > EARLY_DELINQUENCY_ALERT,
            first_payment_default: fpd > FPD_ALERT,
            past_due_ratio: ratio > PAST_DUE_RATIO_ALERT,
        },
    })
}

/// Grouping level of the metrics table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Region,
    Zone,
    Branch,
}

/// One row of the grouped metrics table. Rate columns are percentages
/// rounded to one decimal; money columns are plain sums.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentRow {
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub capital: f64,
    pub past_due_balance: f64,
    pub early_delinquency_pct: f64,
    pub first_payment_default_pct: f64,
    pub credit_risk_index_pct: f64,
    pub past_due_ratio_pct: f64,
    pub balance_growth_pct: f64,
    pub branch_count: usize,
}

/// Group by the level's key path (region; region+zone; region+zone+branch),
/// sorted by key.
pub fn aggregate<'a, I>(rows: I, level: Level) -> Vec<SegmentRow>
where
    I: IntoIterator<Item = &'a ScoredBranch>,
{
    #[derive(Default)]
    struct Acc<'b> {
        n: usize,
        sums: [f64; 7],
        branches: BTreeSet<&'b str>,
    }

    let mut groups: BTreeMap<(String, Option<String>, Option<String>), Acc<'a>> = BTreeMap::new();
    for r in rows {
        let key = match level {
            Level::Region => (r.region().to_string(), None, None),
            Level::Zone => (r.region().to_string(), Some(r.zone().to_string()), None),
            Level::Branch => (
                r.region().to_string(),
                Some(r.zone().to_string()),
                Some(r.branch().to_string()),
            ),
        };
        let acc = groups.entry(key).or_default();
        let f = r.features();
        acc.sums[0] += f.capital();
        acc.sums[1] += f.past_due_balance();
        acc.sums[2] += f.early_delinquency_rate();
        acc.sums[3] += f.first_payment_default_rate();
        acc.sums[4] += f.credit_risk_index();
        acc.sums[5] += f.past_due_ratio();
        acc.sums[6] += f.balance_growth_rate();
        if !r.branch().is_empty() {
            acc.branches.insert(r.branch());
        }
        acc.n += 1;
    }

    groups
        .into_iter()
        .map(|((region, zone, branch), acc)| {
            let pct = |s: f64| round1(s / acc.n as f64 * 100.0);
            SegmentRow {
                region,
                zone,
                branch,
                capital: acc.sums[0],
                past_due_balance: acc.sums[1],
                early_delinquency_pct: pct(acc.sums[2]),
                first_payment_default_pct: pct(acc.sums[3]),
                credit_risk_index_pct: pct(acc.sums[4]),
                past_due_ratio_pct: pct(acc.sums[5]),
                balance_growth_pct: pct(acc.sums[6]),
                branch_count: acc.branches.len(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PastDueEntry {
    pub branch: String,
    pub past_due_balance: f64,
}

/// Branches ranked by summed past-due balance, largest first; ties keep
/// alphabetical order.
pub fn top_past_due<'a, I>(rows: I, n: usize) -> Vec<PastDueEntry>
where
    I: IntoIterator<Item = &'a ScoredBranch>,
{
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for r in rows.into_iter().filter(|r| !r.branch().is_empty()) {
        *totals.entry(r.branch()).or_default() += r.features().past_due_balance();
    }
    let mut ranked: Vec<PastDueEntry> = totals
        .into_iter()
        .map(|(branch, past_due_balance)| PastDueEntry {
            branch: branch.to_string(),
            past_due_balance,
        })
        .collect();
    ranked.sort_by(|a, b| b.past_due_balance.total_cmp(&a.past_due_balance));
    ranked.truncate(n);
    ranked
}

/// Rows per segment; every segment is present, possibly with zero.
pub fn cluster_distribution<'a, I>(rows: I) -> BTreeMap<ClusterLabel, usize>
where
    I: IntoIterator<Item = &'a ScoredBranch>,
{
    let mut out: BTreeMap<ClusterLabel, usize> =
        ClusterLabel::ALL.into_iter().map(|l| (l, 0)).collect();
    for r in rows {
        *out.entry(r.label()).or_default() += 1;
    }
    out
}

/// Detail view for one branch: its first scored row and segment guidance.
#[derive(Debug, Clone, Serialize)]
pub struct BranchDetail {
    pub branch: String,
    pub region: String,
    pub zone: String,
    pub label: ClusterLabel,
    /// Percent per segment label.
    pub probabilities: HashMap<ClusterLabel, f64>,
    pub kpis: PortfolioKpis,
    pub guidance: Guidance,
}

pub fn branch_detail(rows: &[ScoredBranch], branch: &str) -> Option<BranchDetail> {
    let first = rows.iter().find(|r| r.branch() == branch)?;
    let kpis = compute_kpis(rows.iter().filter(|r| r.branch() == branch))?;
    let p = first.probabilities();
    Some(BranchDetail {
        branch: first.branch().to_string(),
        region: first.region().to_string(),
        zone: first.zone().to_string(),
        label: first.label(),
        probabilities: ClusterLabel::ALL
            .into_iter()
            .map(|l| (l, p.percent(l)))
            .collect(),
        kpis,
        guidance: guidance(first.label()),
    })
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
