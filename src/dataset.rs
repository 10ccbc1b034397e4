//! # Dataset
//! In-memory rows × named columns, as handed over by the file-loading side
//! (JSON records from the dashboard, or a CSV export).
//!
//! Cells are kept as loose JSON scalars; numeric coercion belongs to the
//! feature extractor, not to loading.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::io::Read;
use tracing::debug;

use crate::columns::ColumnAliases;

/// One cell: number, string, bool or null.
pub type Cell = Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding with nulls (or truncating) to the header width.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Remove every column with one of these names, cells included.
    pub fn drop_columns<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            while let Some(i) = self.column_index(name.as_ref()) {
                self.columns.remove(i);
                for row in &mut self.rows {
                    if i < row.len() {
                        row.remove(i);
                    }
                }
            }
        }
        self
    }

    /// Build from JSON records. Column order is first-seen order across
    /// records; keys a record lacks become null cells.
    pub fn from_records(records: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for rec in &records {
            for key in rec.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut out = Self::new(columns);
        for mut rec in records {
            let row = out
                .columns
                .iter()
                .map(|c| rec.remove(c).unwrap_or(Value::Null))
                .collect();
            out.rows.push(row);
        }
        out
    }

    /// Read a CSV with a header line. Every cell is kept as a trimmed string;
    /// short rows are padded with nulls.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = csv_reader
            .headers()
            .context("reading CSV header")?
            .iter()
            .map(str::to_string)
            .collect();
        let mut out = Self::new(columns);

        for (line_num, result) in csv_reader.records().enumerate() {
            let record =
                result.with_context(|| format!("CSV parse error at line {}", line_num + 2))?;
            out.push_row(
                record
                    .iter()
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            );
        }
        Ok(out)
    }

    /// Rename headers that match a known alias to their canonical name.
    /// When two headers resolve to the same name, the first one wins and the
    /// later one keeps its original text.
    pub fn canonicalize(mut self, aliases: &ColumnAliases) -> Self {
        self.columns = canonical_headers(&self.columns, aliases);
        self
    }

    /// Rows as JSON records keyed by column name.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Header renaming shared by the in-memory and streaming paths.
pub(crate) fn canonical_headers(headers: &[String], aliases: &ColumnAliases) -> Vec<String> {
    let mut taken: Vec<String> = Vec::with_capacity(headers.len());
    for header in headers {
        let renamed = match aliases.resolve(header) {
            Some(canon) if !taken.iter().any(|t| t == canon) => {
                if canon != header {
                    debug!(header = %header, canonical = canon, "renamed column");
                }
                canon.to_string()
            }
            _ => header.clone(),
        };
        taken.push(renamed);
    }
    taken
}
