//! # Feature Extractor
//! Validates that a dataset carries every required metric column and turns
//! each row into a [`BranchRecord`] with a fixed-order [`FeatureVector`].
//!
//! Policy: column presence is checked for the whole batch up front and every
//! missing column is reported at once. Individual cells never fail under the
//! default [`CoercionPolicy::Lenient`]: absent, empty, non-numeric and
//! non-finite values become `0.0`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

use crate::dataset::{Cell, Dataset};

pub const FEATURE_COUNT: usize = 7;

pub const CAPITAL: &str = "capital";
pub const EARLY_DELINQUENCY_RATE: &str = "early_delinquency_rate";
pub const FIRST_PAYMENT_DEFAULT_RATE: &str = "first_payment_default_rate";
pub const CREDIT_RISK_INDEX: &str = "credit_risk_index";
pub const PAST_DUE_BALANCE: &str = "past_due_balance";
pub const PAST_DUE_RATIO: &str = "past_due_ratio";
pub const BALANCE_GROWTH_RATE: &str = "balance_growth_rate";

/// Required metric columns, in feature-vector order.
pub const REQUIRED_COLUMNS: [&str; FEATURE_COUNT] = [
    CAPITAL,
    EARLY_DELINQUENCY_RATE,
    FIRST_PAYMENT_DEFAULT_RATE,
    CREDIT_RISK_INDEX,
    PAST_DUE_BALANCE,
    PAST_DUE_RATIO,
    BALANCE_GROWTH_RATE,
];

pub const BRANCH: &str = "branch";
pub const REGION: &str = "region";
pub const ZONE: &str = "zone";

/// Optional identity columns carried alongside the features.
pub const IDENTITY_COLUMNS: [&str; 3] = [BRANCH, REGION, ZONE];

/// The seven coerced metrics of one branch, in `REQUIRED_COLUMNS` order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn zeros() -> Self {
        Self([0.0; FEATURE_COUNT])
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn capital(&self) -> f64 {
        self.0[0]
    }
    pub fn early_delinquency_rate(&self) -> f64 {
        self.0[1]
    }
    pub fn first_payment_default_rate(&self) -> f64 {
        self.0[2]
    }
    pub fn credit_risk_index(&self) -> f64 {
        self.0[3]
    }
    pub fn past_due_balance(&self) -> f64 {
        self.0[4]
    }
    pub fn past_due_ratio(&self) -> f64 {
        self.0[5]
    }
    pub fn balance_growth_rate(&self) -> f64 {
        self.0[6]
    }
}

/// One input row: identity, coerced features, and the untouched source cells
/// for reattachment on output.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchRecord {
    pub branch: String,
    pub region: String,
    pub zone: String,
    pub features: FeatureVector,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required columns: {}", missing.join(", "))]
pub struct MissingColumnsError {
    /// Every absent required column, in `REQUIRED_COLUMNS` order.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error(transparent)]
    MissingColumns(#[from] MissingColumnsError),
    #[error("row {row}: column `{column}` holds non-numeric value {value:?}")]
    NonNumericCell {
        row: usize,
        column: String,
        value: String,
    },
}

/// What to do with a cell that is present but not a usable number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoercionPolicy {
    /// Substitute `0.0`.
    #[default]
    Lenient,
    /// Fail the batch. Blank cells still read as `0.0`.
    Strict,
}

impl FromStr for CoercionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" | "" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => anyhow::bail!("unknown coercion policy `{other}` (expected lenient|strict)"),
        }
    }
}

static NULL_CELL: Cell = Value::Null;

/// Column positions resolved once per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLayout {
    features: [usize; FEATURE_COUNT],
    branch: Option<usize>,
    region: Option<usize>,
    zone: Option<usize>,
}

impl FeatureLayout {
    /// Resolve required and identity columns against a header row.
    pub fn resolve<S: AsRef<str>>(columns: &[S]) -> Result<Self, MissingColumnsError> {
        let find = |name: &str| columns.iter().position(|c| c.as_ref() == name);

        let mut features = [0usize; FEATURE_COUNT];
        let mut missing = Vec::new();
        for (slot, name) in features.iter_mut().zip(REQUIRED_COLUMNS) {
            match find(name) {
                Some(i) => *slot = i,
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(MissingColumnsError { missing });
        }

        Ok(Self {
            features,
            branch: find(BRANCH),
            region: find(REGION),
            zone: find(ZONE),
        })
    }

    /// Turn one row into a record. `row` is the 0-based data row index used in
    /// strict-mode errors.
    pub fn record(
        &self,
        row: usize,
        cells: Vec<Cell>,
        policy: CoercionPolicy,
    ) -> Result<BranchRecord, ExtractError> {
        let mut values = [0.0; FEATURE_COUNT];
        for (k, (&idx, name)) in self.features.iter().zip(REQUIRED_COLUMNS).enumerate() {
            let cell = cells.get(idx).unwrap_or(&NULL_CELL);
            values[k] = match (parse_cell(cell), policy) {
                (Parsed::Number(x), _) => x,
                (Parsed::Blank, _) => 0.0,
                (Parsed::Invalid, CoercionPolicy::Lenient) => 0.0,
                (Parsed::Invalid, CoercionPolicy::Strict) => {
                    return Err(ExtractError::NonNumericCell {
                        row,
                        column: name.to_string(),
                        value: cell_text(cell),
                    })
                }
            };
        }

        let text_at = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .map(cell_text)
                .unwrap_or_default()
        };

        Ok(BranchRecord {
            branch: text_at(self.branch),
            region: text_at(self.region),
            zone: text_at(self.zone),
            features: FeatureVector(values),
            cells,
        })
    }
}

/// Check that every required column is present; lists all that are not.
pub fn validate_columns<S: AsRef<str>>(columns: &[S]) -> Result<(), MissingColumnsError> {
    FeatureLayout::resolve(columns).map(|_| ())
}

/// Extract one record per row, preserving row order. Expects canonical
/// column names (see [`Dataset::canonicalize`]).
pub fn extract(
    dataset: Dataset,
    policy: CoercionPolicy,
) -> Result<Vec<BranchRecord>, ExtractError> {
    let layout = FeatureLayout::resolve(&dataset.columns)?;
    dataset
        .rows
        .into_iter()
        .enumerate()
        .map(|(i, cells)| layout.record(i, cells, policy))
        .collect()
}

/// Lenient numeric reading of a single cell.
pub fn coerce_cell(cell: &Cell) -> f64 {
    match parse_cell(cell) {
        Parsed::Number(x) => x,
        Parsed::Blank | Parsed::Invalid => 0.0,
    }
}

enum Parsed {
    Number(f64),
    Blank,
    Invalid,
}

fn parse_cell(cell: &Cell) -> Parsed {
    let x = match cell {
        Value::Null => return Parsed::Blank,
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return Parsed::Blank;
            }
            t.parse::<f64>().ok()
        }
        Value::Array(_) | Value::Object(_) => None,
    };
    match x {
        Some(v) if v.is_finite() => Parsed::Number(v),
        _ => Parsed::Invalid,
    }
}

/// Display text of a cell (identity columns, error messages).
pub(crate) fn cell_text(cell: &Cell) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_columns() -> Vec<String> {
        let mut cols: Vec<String> = vec!["branch".into(), "region".into(), "zone".into()];
        cols.extend(REQUIRED_COLUMNS.iter().map(|c| c.to_string()));
        cols
    }

    fn row(cells: Value) -> Vec<Value> {
        cells.as_array().cloned().unwrap()
    }

    fn dataset(rows: Vec<Vec<Value>>) -> Dataset {
        let mut ds = Dataset::new(full_columns());
        for r in rows {
            ds.push_row(r);
        }
        ds
    }

    #[test]
    fn lists_every_missing_column() {
        let cols = vec!["branch", "capital", "credit_risk_index", "past_due_ratio"];
        let err = validate_columns(&cols).unwrap_err();
        assert_eq!(
            err.missing,
            vec![
                "early_delinquency_rate",
                "first_payment_default_rate",
                "past_due_balance",
                "balance_growth_rate",
            ]
        );
        assert!(err.to_string().contains("past_due_balance"));
    }

    #[test]
    fn extract_preserves_order_and_identity() {
        let ds = dataset(vec![
            row(json!(["B1", "Norte", "Z1", 100.0, 0.05, 0.02, 0.4, 7.0, 0.1, 0.03])),
            row(json!(["B2", "Sur", "Z2", "250", "0.01", 0, 0.2, 1, 0.02, -0.1])),
        ]);
        let recs = extract(ds, CoercionPolicy::Lenient).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].branch, "B1");
        assert_eq!(recs[1].region, "Sur");
        assert_eq!(recs[1].features.capital(), 250.0);
        assert_eq!(recs[1].features.balance_growth_rate(), -0.1);
        assert_eq!(recs[0].cells.len(), 10);
    }

    #[test]
    fn lenient_coerces_bad_cells_to_zero() {
        let ds = dataset(vec![row(json!([
            "B", "R", "Z", "", "n/a", null, "NaN", "inf", [1], " 0.5 "
        ]))]);
        let recs = extract(ds, CoercionPolicy::Lenient).unwrap();
        assert_eq!(recs[0].features.0, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn strict_rejects_non_numeric_but_accepts_blank() {
        let ds = dataset(vec![
            row(json!(["B", "R", "Z", "", 0.1, 0.1, 0.1, 1, 0.1, 0.1])),
            row(json!(["C", "R", "Z", 5, "abc", 0.1, 0.1, 1, 0.1, 0.1])),
        ]);
        let err = extract(ds, CoercionPolicy::Strict).unwrap_err();
        assert_eq!(
            err,
            ExtractError::NonNumericCell {
                row: 1,
                column: "early_delinquency_rate".into(),
                value: "abc".into(),
            }
        );
    }

    #[test]
    fn identity_columns_are_optional() {
        let cols: Vec<String> = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut ds = Dataset::new(cols);
        ds.push_row(vec![json!(1); FEATURE_COUNT]);
        let recs = extract(ds, CoercionPolicy::Lenient).unwrap();
        assert_eq!(recs[0].branch, "");
        assert_eq!(recs[0].features.0, [1.0; FEATURE_COUNT]);
    }

    #[test]
    fn bools_and_numbers_coerce() {
        assert_eq!(coerce_cell(&json!(true)), 1.0);
        assert_eq!(coerce_cell(&json!(false)), 0.0);
        assert_eq!(coerce_cell(&json!(2.5)), 2.5);
        assert_eq!(coerce_cell(&json!("1e3")), 1000.0);
        assert_eq!(coerce_cell(&json!("1,234")), 0.0);
    }

    #[test]
    fn policy_parses_from_env_text() {
        assert_eq!("STRICT".parse::<CoercionPolicy>().unwrap(), CoercionPolicy::Strict);
        assert_eq!("".parse::<CoercionPolicy>().unwrap(), CoercionPolicy::Lenient);
        assert!("loose".parse::<CoercionPolicy>().is_err());
    }
}
