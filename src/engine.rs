//! # Cluster Engine
//! End-to-end path from a loaded dataset to scored rows:
//! canonical headers → column validation → feature extraction → scoring.
//!
//! Validation failures abort the whole batch before anything is scored.
//! Output rows are the input rows, in input order, with three probability
//! columns (percent, one decimal) and the segment label appended.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::columns::ColumnAliases;
use crate::config::{dev_logging_enabled, EngineConfig};
use crate::dataset::{canonical_headers, Dataset};
use crate::features::{extract, CoercionPolicy, ExtractError, FeatureLayout};
use crate::metrics::{record_rejected, record_scored};
use crate::model::{short_hex, ClusterModel};
use crate::scorer::{ScoredBranch, Scorer};
use crate::segment::ClusterLabel;

/// Name of the appended label column.
pub const LABEL_COLUMN: &str = "Cluster_ML";

/// Name of the appended probability column for a segment.
pub fn probability_column(label: ClusterLabel) -> String {
    format!("prob_{}", label.as_str())
}

/// Extra columns appended to every output row, in order.
pub fn appended_columns() -> Vec<String> {
    let mut cols: Vec<String> = ClusterLabel::ALL.map(probability_column).to_vec();
    cols.push(LABEL_COLUMN.to_string());
    cols
}

#[derive(Debug, Clone)]
pub struct ClusterEngine {
    scorer: Scorer,
    aliases: ColumnAliases,
    policy: CoercionPolicy,
}

/// Scored rows plus the header they were read with.
#[derive(Debug, Clone)]
pub struct ScoredBatch {
    pub columns: Vec<String>,
    pub rows: Vec<ScoredBranch>,
    /// Fingerprint of the calibration that produced these rows.
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct ScoredRecords {
    pub model: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl ClusterEngine {
    pub fn new(model: ClusterModel, aliases: ColumnAliases, policy: CoercionPolicy) -> Self {
        Self {
            scorer: Scorer::new(model),
            aliases,
            policy,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let model = cfg.load_model()?;
        let mut engine = Self::new(model, cfg.load_aliases(), cfg.coercion);
        engine.scorer = engine.scorer.with_parallel_min_rows(cfg.parallel_min_rows);
        Ok(engine)
    }

    pub fn model(&self) -> &ClusterModel {
        self.scorer.model()
    }

    pub fn policy(&self) -> CoercionPolicy {
        self.policy
    }

    /// Score a whole in-memory dataset. Output columns left over from an
    /// earlier run are dropped and recomputed.
    pub fn score_dataset(&self, dataset: Dataset) -> Result<ScoredBatch, ExtractError> {
        let dataset = dataset
            .drop_columns(&appended_columns())
            .canonicalize(&self.aliases);
        let columns = dataset.columns.clone();
        let n = dataset.len();

        let records = extract(dataset, self.policy).inspect_err(|e| {
            warn!(error = %e, rows = n, "batch rejected");
            record_rejected(reject_reason(e));
        })?;

        let rows = self.scorer.score_batch(records);
        record_scored(rows.len());

        let model = self.model().fingerprint();
        info!(rows = rows.len(), model = %model, "batch scored");
        if dev_logging_enabled() {
            for r in &rows {
                debug!(
                    branch = %anon_hash(r.branch()),
                    label = %r.label(),
                    p = ?r.probabilities().0,
                    "row scored"
                );
            }
        }

        Ok(ScoredBatch {
            columns,
            rows,
            model,
        })
    }

    /// Stream a CSV through the scorer one row at a time, writing the
    /// augmented CSV. Headers are validated before any row is read.
    /// Returns the number of rows written.
    ///
    /// Not atomic: a strict-policy failure at row N leaves rows before N in
    /// `writer`. Use [`ClusterEngine::score_csv_file`] for file output.
    pub fn score_csv_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<usize> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut csv_writer = csv::Writer::from_writer(writer);

        let raw_headers: Vec<String> = csv_reader
            .headers()
            .context("reading CSV header")?
            .iter()
            .map(str::to_string)
            .collect();
        // earlier output columns are recomputed, not duplicated
        let appended = appended_columns();
        let keep: Vec<usize> = (0..raw_headers.len())
            .filter(|&i| !appended.contains(&raw_headers[i]))
            .collect();
        let kept_headers: Vec<String> = keep.iter().map(|&i| raw_headers[i].clone()).collect();

        let headers = canonical_headers(&kept_headers, &self.aliases);
        let layout = FeatureLayout::resolve(&headers).map_err(|e| {
            record_rejected("missing_columns");
            anyhow::Error::new(ExtractError::from(e))
        })?;

        let mut out_header = kept_headers;
        out_header.extend(appended);
        csv_writer.write_record(&out_header)?;

        let mut written = 0usize;
        for (i, result) in csv_reader.records().enumerate() {
            let record = result.with_context(|| format!("CSV parse error at line {}", i + 2))?;
            let cells: Vec<Value> = keep
                .iter()
                .map(|&c| {
                    record
                        .get(c)
                        .map_or(Value::Null, |s| Value::String(s.to_string()))
                })
                .collect();

            let branch = layout.record(i, cells, self.policy).map_err(|e| {
                record_rejected(reject_reason(&e));
                anyhow::Error::new(e)
            })?;
            let scored = self.scorer.score(branch);
            csv_writer.write_record(output_fields(&scored))?;
            written += 1;
        }
        csv_writer.flush()?;
        record_scored(written);
        info!(rows = written, model = %self.model().fingerprint(), "csv stream scored");
        Ok(written)
    }

    /// Score a CSV file into `output`. Rows go to a temp file beside
    /// `output` that replaces it only once every row has been scored; on
    /// failure `output` is left as it was.
    pub fn score_csv_file(&self, input: &Path, output: &Path) -> Result<usize> {
        let reader = BufReader::new(
            File::open(input).with_context(|| format!("opening {}", input.display()))?,
        );
        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;

        let rows = self.score_csv_stream(reader, BufWriter::new(tmp.as_file_mut()))?;
        tmp.persist(output)
            .with_context(|| format!("writing {}", output.display()))?;
        Ok(rows)
    }
}

impl ScoredBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Input header followed by the appended columns.
    pub fn output_columns(&self) -> Vec<String> {
        let mut cols = self.columns.clone();
        cols.extend(appended_columns());
        cols
    }

    /// Augmented rows as JSON records.
    pub fn to_records(&self) -> ScoredRecords {
        let columns = self.output_columns();
        let rows = self
            .rows
            .iter()
            .map(|r| {
                let mut rec: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(r.record().cells.iter().cloned())
                    .collect();
                let p = r.probabilities();
                for label in ClusterLabel::ALL {
                    rec.insert(probability_column(label), Value::from(p.percent(label)));
                }
                rec.insert(LABEL_COLUMN.to_string(), Value::from(r.label().as_str()));
                rec
            })
            .collect();
        ScoredRecords {
            model: self.model.clone(),
            columns,
            rows,
        }
    }

    /// Augmented rows as CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(self.output_columns())?;
        for r in &self.rows {
            w.write_record(output_fields(r))?;
        }
        w.flush()?;
        Ok(())
    }
}

/// Source cells as text, then the appended fields.
fn output_fields(r: &ScoredBranch) -> Vec<String> {
    let mut fields: Vec<String> = r
        .record()
        .cells
        .iter()
        .map(|c| match c {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let p = r.probabilities();
    for label in ClusterLabel::ALL {
        fields.push(format!("{:.1}", p.percent(label)));
    }
    fields.push(r.label().as_str().to_string());
    fields
}

fn reject_reason(e: &ExtractError) -> &'static str {
    match e {
        ExtractError::MissingColumns(_) => "missing_columns",
        ExtractError::NonNumericCell { .. } => "non_numeric_cell",
    }
}

/// Dev logs carry a hashed branch name, never the name itself.
pub(crate) fn anon_hash(text: &str) -> String {
    short_hex(&Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::MissingColumnsError;

    const CSV: &str = "\
Región,Zona,Sucursal,Capital Dispersado Actual,Morosidad Temprana Actual,% FPD Actual,ICV,Saldo Insoluto Vencido Actual,Ratio_Cartera_Vencida Actual,Crecimiento Saldo Actual,Gerente
Norte,Z1,Valle Chalco,1500000,0.05,0.07,0.3,120000,0.08,0.02,Ana
Sur,Z2,Puente,,abc,0.1,0.5,90000,0.15,-0.03,Luis
";

    fn engine() -> ClusterEngine {
        ClusterEngine::new(
            ClusterModel::default(),
            ColumnAliases::default_seed(),
            CoercionPolicy::Lenient,
        )
    }

    #[test]
    fn scores_spreadsheet_headers_and_keeps_extra_columns() {
        let ds = Dataset::from_csv_reader(CSV.as_bytes()).unwrap();
        let batch = engine().score_dataset(ds).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.rows[0].branch(), "Valle Chalco");
        assert_eq!(batch.rows[1].features().capital(), 0.0);
        assert_eq!(batch.rows[1].features().early_delinquency_rate(), 0.0);

        let out = batch.to_records();
        assert_eq!(out.columns.last().map(String::as_str), Some(LABEL_COLUMN));
        assert_eq!(out.rows[0]["Gerente"], Value::from("Ana"));
        // built-in calibration is intercept-only → every branch lands in Main_1
        assert_eq!(out.rows[1][LABEL_COLUMN], Value::from("Main_1"));
        assert_eq!(out.rows[0]["prob_Main_1"], Value::from(52.6));
    }

    #[test]
    fn missing_columns_abort_the_batch() {
        let ds = Dataset::from_csv_reader("Sucursal,ICV\nA,0.2\n".as_bytes()).unwrap();
        let err = engine().score_dataset(ds).unwrap_err();
        match err {
            ExtractError::MissingColumns(MissingColumnsError { missing }) => {
                assert_eq!(missing.len(), 6);
                assert!(!missing.contains(&"credit_risk_index".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stream_matches_in_memory_path() {
        let mut streamed = Vec::new();
        let n = engine()
            .score_csv_stream(CSV.as_bytes(), &mut streamed)
            .unwrap();
        assert_eq!(n, 2);

        let ds = Dataset::from_csv_reader(CSV.as_bytes()).unwrap();
        let mut in_memory = Vec::new();
        engine().score_dataset(ds).unwrap().write_csv(&mut in_memory).unwrap();

        let streamed = String::from_utf8(streamed).unwrap();
        let in_memory = String::from_utf8(in_memory).unwrap();
        let header = streamed.lines().next().unwrap();
        assert!(header.starts_with("Región,Zona,Sucursal"));
        assert!(header.ends_with("prob_0_0,prob_0_1,prob_Main_1,Cluster_ML"));
        // in-memory path writes canonical headers; the data rows are identical
        assert_eq!(
            streamed.lines().skip(1).collect::<Vec<_>>(),
            in_memory.lines().skip(1).collect::<Vec<_>>()
        );
    }

    #[test]
    fn stream_rejects_missing_columns_before_writing() {
        let mut out = Vec::new();
        let err = engine()
            .score_csv_stream("Sucursal\nA\n".as_bytes(), &mut out)
            .unwrap_err();
        assert!(err.downcast_ref::<ExtractError>().is_some());
        assert!(out.is_empty());
    }

    #[test]
    fn strict_policy_fails_on_text_cells() {
        let strict = strict_engine();
        let ds = Dataset::from_csv_reader(CSV.as_bytes()).unwrap();
        assert!(matches!(
            strict.score_dataset(ds),
            Err(ExtractError::NonNumericCell { row: 1, .. })
        ));
    }

    #[test]
    fn rescoring_output_recomputes_appended_columns() {
        let mut first = Vec::new();
        engine().score_csv_stream(CSV.as_bytes(), &mut first).unwrap();
        let mut second = Vec::new();
        engine()
            .score_csv_stream(first.as_slice(), &mut second)
            .unwrap();
        assert_eq!(
            String::from_utf8(first.clone()).unwrap(),
            String::from_utf8(second).unwrap()
        );

        let ds = Dataset::from_csv_reader(first.as_slice()).unwrap();
        let out = engine().score_dataset(ds).unwrap().to_records();
        assert_eq!(out.columns.len(), 15);
        assert_eq!(out.rows[0].len(), out.columns.len());
        assert_eq!(out.columns.iter().filter(|c| *c == LABEL_COLUMN).count(), 1);
    }

    fn strict_engine() -> ClusterEngine {
        ClusterEngine::new(
            ClusterModel::default(),
            ColumnAliases::default_seed(),
            CoercionPolicy::Strict,
        )
    }

    #[test]
    fn rejected_file_run_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, CSV).unwrap();
        std::fs::write(&output, "previous\n").unwrap();

        // row 0 scores, row 1 has `abc` in a feature column
        assert!(strict_engine().score_csv_file(&input, &output).is_err());
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

        assert_eq!(engine().score_csv_file(&input, &output).unwrap(), 2);
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 3);
        assert!(written.lines().all(|l| !l.starts_with("previous")));
    }

    #[test]
    fn anon_hash_is_short_and_stable() {
        assert_eq!(anon_hash("Valle Chalco"), anon_hash("Valle Chalco"));
        assert_eq!(anon_hash("x").len(), 12);
    }
}
