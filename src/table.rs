//! In-memory log table: load, column typing, result write-back.
//!
//! Cells are kept as the raw strings read from disk so that the result
//! table carries every original cell value unchanged. Quoting and line
//! endings are normalised by the writer.

use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{debug, info};

use crate::detect::{AnomalyLabel, FeatureMatrix, ModelError};
use crate::error::{Result, ScoreError};
use crate::storage;

/// Ordered rows of heterogeneous string cells under a single header.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Table {
    pub fn new(headers: StringRecord, rows: Vec<StringRecord>) -> Self {
        Self { headers, rows }
    }

    /// Read a delimited file with a header row. Ragged rows and invalid
    /// UTF-8 are parse errors.
    pub fn load(path: &Path, delimiter: u8) -> Result<Self> {
        let file = File::open(path).map_err(|e| ScoreError::io(path, e))?;
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| ScoreError::csv(path, e))?
            .clone();
        let rows = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ScoreError::csv(path, e))?;

        info!(
            path = %path.display(),
            rows = rows.len(),
            columns = headers.len(),
            "loaded table"
        );
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Indices of numeric columns, in header order.
    ///
    /// A column is numeric when at least one cell is non-empty and every
    /// non-empty cell parses as a float. Empty cells do not change the type;
    /// they are rejected later when the feature matrix is built.
    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.headers.len())
            .filter(|&col| {
                let mut seen = false;
                for row in &self.rows {
                    let cell = row.get(col).unwrap_or("").trim();
                    if cell.is_empty() {
                        continue;
                    }
                    if cell.parse::<f64>().is_err() {
                        return false;
                    }
                    seen = true;
                }
                seen
            })
            .collect()
    }

    /// Project the numeric columns into a feature matrix, one row per record.
    pub fn feature_matrix(&self) -> std::result::Result<FeatureMatrix, ModelError> {
        let cols = self.numeric_columns();
        if cols.is_empty() {
            return Err(ModelError::NoNumericColumns);
        }
        let names: Vec<String> = cols.iter().map(|&c| self.headers[c].to_string()).collect();
        debug!(columns = ?names, "selected numeric feature columns");

        let mut rows = Vec::with_capacity(self.rows.len());
        for (row_idx, record) in self.rows.iter().enumerate() {
            let mut values = Vec::with_capacity(cols.len());
            for (&col, name) in cols.iter().zip(&names) {
                let value = record
                    .get(col)
                    .and_then(|cell| cell.trim().parse::<f64>().ok())
                    .ok_or_else(|| ModelError::NonFiniteValue {
                        row: row_idx,
                        column: name.clone(),
                    })?;
                values.push(value);
            }
            rows.push(values);
        }

        FeatureMatrix::from_rows(names, rows)
    }

    /// Write this table with `labels` appended as a trailing `anomaly`
    /// column, replacing `path` atomically.
    pub fn write_labeled(&self, path: &Path, labels: &[AnomalyLabel], delimiter: u8) -> Result<()> {
        if labels.len() != self.rows.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.rows.len(),
                got: labels.len(),
            }
            .into());
        }

        storage::write_atomic(path, |file| {
            let mut writer = WriterBuilder::new().delimiter(delimiter).from_writer(file);

            let mut header = self.headers.clone();
            header.push_field(AnomalyLabel::COLUMN);
            writer.write_record(&header)?;

            for (record, label) in self.rows.iter().zip(labels) {
                let mut out = record.clone();
                out.push_field(&label.to_string());
                writer.write_record(&out)?;
            }
            writer.flush()?;
            Ok::<_, csv::Error>(())
        })
        .map_err(|e| ScoreError::csv(path, e))?;

        info!(path = %path.display(), rows = self.rows.len(), "wrote result table");
        Ok(())
    }
}
