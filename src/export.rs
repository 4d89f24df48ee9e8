//! Export a scored result table as JSON records or a filtered CSV.

use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{StringRecord, WriterBuilder};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::detect::AnomalyLabel;
use crate::error::ScoreError;
use crate::storage;
use crate::table::Table;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Load(#[from] ScoreError),

    #[error("{} is not a result table: no `anomaly` column", path.display())]
    MissingLabelColumn { path: PathBuf },

    #[error("row {row}: invalid anomaly label {value:?}")]
    InvalidLabel { row: usize, value: String },

    #[error("row {row}: unparseable timestamp {value:?}")]
    InvalidTimestamp { row: usize, value: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format '{}' (expected json or csv)", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Which rows to keep, by label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelFilter {
    #[default]
    All,
    Outliers,
    Inliers,
}

impl LabelFilter {
    pub fn keeps(self, label: AnomalyLabel) -> bool {
        match self {
            LabelFilter::All => true,
            LabelFilter::Outliers => label.is_outlier(),
            LabelFilter::Inliers => !label.is_outlier(),
        }
    }
}

impl FromStr for LabelFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(LabelFilter::All),
            "outliers" => Ok(LabelFilter::Outliers),
            "inliers" => Ok(LabelFilter::Inliers),
            other => Err(format!(
                "unknown filter '{}' (expected all, outliers or inliers)",
                other
            )),
        }
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelFilter::All => write!(f, "all"),
            LabelFilter::Outliers => write!(f, "outliers"),
            LabelFilter::Inliers => write!(f, "inliers"),
        }
    }
}

/// Column holding the alert severity.
pub const SEVERITY_COLUMN: &str = "severity";
/// Column holding the event time.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Row selection for an export. Severity and time bounds only apply when
/// the table has the matching column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    pub label: LabelFilter,
    /// Severities to keep; empty keeps every severity.
    pub severity: Vec<String>,
    /// Inclusive lower bound on `timestamp`.
    pub since: Option<NaiveDateTime>,
    /// Inclusive upper bound on `timestamp`.
    pub until: Option<NaiveDateTime>,
}

impl RowFilter {
    pub fn by_label(label: LabelFilter) -> Self {
        Self {
            label,
            ..Self::default()
        }
    }

    fn has_time_bounds(&self) -> bool {
        self.since.is_some() || self.until.is_some()
    }
}

/// Parse a timestamp cell: RFC 3339 (normalised to UTC), a naive
/// `YYYY-MM-DD[T ]HH:MM:SS[.f]`, or a bare date at midnight.
pub fn parse_timestamp(cell: &str) -> Option<NaiveDateTime> {
    let cell = cell.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(cell) {
        return Some(ts.with_timezone(&Utc).naive_utc());
    }
    if let Ok(ts) = cell.parse::<NaiveDateTime>() {
        return Some(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(cell, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ts);
    }
    cell.parse::<NaiveDate>()
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse an upper time bound. A bare date covers the whole day.
pub fn parse_until(s: &str) -> Result<NaiveDateTime, String> {
    if let Ok(d) = s.trim().parse::<NaiveDate>() {
        return d
            .and_hms_nano_opt(23, 59, 59, 999_999_999)
            .ok_or_else(|| format!("date out of range: {}", s));
    }
    parse_since(s)
}

/// Parse a lower time bound.
pub fn parse_since(s: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(s).ok_or_else(|| {
        format!(
            "invalid time '{}' (expected YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or RFC 3339)",
            s
        )
    })
}

/// Rows of `table` that pass `filter`, in original order.
pub fn select_rows<'a>(
    table: &'a Table,
    filter: &RowFilter,
    source: &Path,
) -> Result<Vec<&'a StringRecord>, ExportError> {
    let label_col = table
        .column_index(AnomalyLabel::COLUMN)
        .ok_or_else(|| ExportError::MissingLabelColumn {
            path: source.to_path_buf(),
        })?;

    let severity_col = if filter.severity.is_empty() {
        None
    } else {
        let col = table.column_index(SEVERITY_COLUMN);
        if col.is_none() {
            warn!(path = %source.display(), "no `severity` column, severity filter ignored");
        }
        col
    };
    let time_col = if filter.has_time_bounds() {
        let col = table.column_index(TIMESTAMP_COLUMN);
        if col.is_none() {
            warn!(path = %source.display(), "no `timestamp` column, time filter ignored");
        }
        col
    } else {
        None
    };

    let mut selected = Vec::new();
    for (row, record) in table.rows().iter().enumerate() {
        let cell = record.get(label_col).unwrap_or("");
        let label = AnomalyLabel::parse(cell).ok_or_else(|| ExportError::InvalidLabel {
            row,
            value: cell.to_string(),
        })?;
        if !filter.label.keeps(label) {
            continue;
        }

        if let Some(col) = severity_col {
            let severity = record.get(col).unwrap_or("");
            if !filter.severity.iter().any(|s| s == severity) {
                continue;
            }
        }

        if let Some(col) = time_col {
            let cell = record.get(col).unwrap_or("");
            // Rows without a time never fall inside a range.
            if cell.trim().is_empty() {
                continue;
            }
            let ts = parse_timestamp(cell).ok_or_else(|| ExportError::InvalidTimestamp {
                row,
                value: cell.to_string(),
            })?;
            if filter.since.is_some_and(|since| ts < since)
                || filter.until.is_some_and(|until| ts > until)
            {
                continue;
            }
        }

        selected.push(record);
    }
    Ok(selected)
}

/// Typed JSON for a raw cell: integers and finite floats become numbers,
/// `true`/`false` booleans, empty cells `null`, everything else a string.
pub fn cell_to_json(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    match cell {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

/// One JSON object per row, keys in header order.
pub fn to_json_records(headers: &StringRecord, rows: &[&StringRecord]) -> Vec<Value> {
    rows.iter()
        .map(|record| {
            let obj: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .map(|(h, cell)| (h.to_string(), cell_to_json(cell)))
                .collect();
            Value::Object(obj)
        })
        .collect()
}

/// Export the result table at `source` to `dest`. Returns the number of
/// rows written.
pub fn export(
    source: &Path,
    dest: &Path,
    format: ExportFormat,
    filter: &RowFilter,
    delimiter: u8,
) -> Result<usize, ExportError> {
    let table = Table::load(source, delimiter)?;
    let rows = select_rows(&table, filter, source)?;

    match format {
        ExportFormat::Json => {
            let records = to_json_records(table.headers(), &rows);
            storage::write_atomic(dest, |file| {
                let mut out = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut out, &records)?;
                out.write_all(b"\n")?;
                out.flush()?;
                Ok::<_, ExportError>(())
            })?;
        }
        ExportFormat::Csv => {
            storage::write_atomic(dest, |file| {
                let mut writer = WriterBuilder::new().delimiter(delimiter).from_writer(file);
                writer.write_record(table.headers())?;
                for record in &rows {
                    writer.write_record(*record)?;
                }
                writer.flush()?;
                Ok::<_, ExportError>(())
            })?;
        }
    }

    info!(
        source = %source.display(),
        dest = %dest.display(),
        %format,
        label = %filter.label,
        severity = ?filter.severity,
        rows = rows.len(),
        "exported result table"
    );
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT: &str = "ts,proto,bytes,duration,anomaly\n\
        2024-01-01T00:00:00,TCP,100,0.5,1\n\
        2024-01-01T00:00:01,UDP,999999,1.5,-1\n\
        2024-01-01T00:00:02,ICMP,,2,1\n";

    fn result_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("result.csv");
        std::fs::write(&path, RESULT).unwrap();
        path
    }

    #[test]
    fn test_cell_typing() {
        assert_eq!(cell_to_json("42"), Value::from(42));
        assert_eq!(cell_to_json("-1"), Value::from(-1));
        assert_eq!(cell_to_json("0.5"), serde_json::json!(0.5));
        assert_eq!(cell_to_json(""), Value::Null);
        assert_eq!(cell_to_json("true"), Value::Bool(true));
        assert_eq!(cell_to_json("TCP"), Value::String("TCP".into()));
        // Non-finite floats have no JSON number form.
        assert_eq!(cell_to_json("NaN"), Value::String("NaN".into()));
    }

    #[test]
    fn test_json_export_outliers_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = result_file(&dir);
        let dest = dir.path().join("out/outliers.json");

        let n = export(&source, &dest, ExportFormat::Json, &RowFilter::by_label(LabelFilter::Outliers), b',').unwrap();
        assert_eq!(n, 1);

        let parsed: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&dest).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["proto"], "UDP");
        assert_eq!(parsed[0]["bytes"], 999999);
        assert_eq!(parsed[0]["anomaly"], -1);
    }

    #[test]
    fn test_csv_export_inliers_keeps_cells() {
        let dir = tempfile::tempdir().unwrap();
        let source = result_file(&dir);
        let dest = dir.path().join("inliers.csv");

        let n = export(&source, &dest, ExportFormat::Csv, &RowFilter::by_label(LabelFilter::Inliers), b',').unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            std::fs::read_to_string(&dest).unwrap(),
            "ts,proto,bytes,duration,anomaly\n\
             2024-01-01T00:00:00,TCP,100,0.5,1\n\
             2024-01-01T00:00:02,ICMP,,2,1\n"
        );
    }

    #[test]
    fn test_plain_log_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw.csv");
        std::fs::write(&source, "ts,bytes\na,1\n").unwrap();

        let err = export(
            &source,
            &dir.path().join("x.json"),
            ExportFormat::Json,
            &RowFilter::default(),
            b',',
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::MissingLabelColumn { .. }));
    }

    #[test]
    fn test_bad_label_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("bad.csv");
        std::fs::write(&source, "bytes,anomaly\n1,1\n2,0\n").unwrap();

        let err = export(
            &source,
            &dir.path().join("x.csv"),
            ExportFormat::Csv,
            &RowFilter::default(),
            b',',
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::InvalidLabel { row: 1, .. }));
    }

    const ALERTS: &str = "timestamp,severity,bytes,anomaly\n\
        2024-05-01T09:00:00Z,high,100,-1\n\
        2024-05-01 23:30:00,low,120,1\n\
        2024-05-02T00:15:00.250,medium,90,1\n\
        2024-05-03T12:00:00+02:00,high,5000,-1\n\
        ,high,80,1\n";

    fn alerts_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("alerts.csv");
        std::fs::write(&path, ALERTS).unwrap();
        path
    }

    fn bytes_of(table: &Table, rows: &[&StringRecord]) -> Vec<String> {
        let col = table.column_index("bytes").unwrap();
        rows.iter().map(|r| r[col].to_string()).collect()
    }

    #[test]
    fn test_severity_filter() {
        let dir = tempfile::tempdir().unwrap();
        let source = alerts_file(&dir);
        let table = Table::load(&source, b',').unwrap();

        let filter = RowFilter {
            severity: vec!["high".into(), "medium".into()],
            ..RowFilter::default()
        };
        let rows = select_rows(&table, &filter, &source).unwrap();
        assert_eq!(bytes_of(&table, &rows), vec!["100", "90", "5000", "80"]);

        let filter = RowFilter {
            label: LabelFilter::Outliers,
            severity: vec!["high".into()],
            ..RowFilter::default()
        };
        let rows = select_rows(&table, &filter, &source).unwrap();
        assert_eq!(bytes_of(&table, &rows), vec!["100", "5000"]);
    }

    #[test]
    fn test_time_range_filter() {
        let dir = tempfile::tempdir().unwrap();
        let source = alerts_file(&dir);
        let table = Table::load(&source, b',').unwrap();

        // A bare `until` date covers the whole day; rows with no time drop out.
        let filter = RowFilter {
            since: Some(parse_since("2024-05-01").unwrap()),
            until: Some(parse_until("2024-05-01").unwrap()),
            ..RowFilter::default()
        };
        let rows = select_rows(&table, &filter, &source).unwrap();
        assert_eq!(bytes_of(&table, &rows), vec!["100", "120"]);

        // Offsets are normalised to UTC: 12:00+02:00 is 10:00Z.
        let filter = RowFilter {
            since: Some(parse_since("2024-05-02T00:15:00.250").unwrap()),
            until: Some(parse_until("2024-05-03T10:00:00Z").unwrap()),
            ..RowFilter::default()
        };
        let rows = select_rows(&table, &filter, &source).unwrap();
        assert_eq!(bytes_of(&table, &rows), vec!["90", "5000"]);

        let dest = dir.path().join("may2.csv");
        let filter = RowFilter {
            since: Some(parse_since("2024-05-02").unwrap()),
            ..RowFilter::default()
        };
        assert_eq!(export(&source, &dest, ExportFormat::Csv, &filter, b',').unwrap(), 2);
    }

    #[test]
    fn test_filters_without_columns_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let source = result_file(&dir);
        let table = Table::load(&source, b',').unwrap();
        let filter = RowFilter {
            severity: vec!["high".into()],
            since: Some(parse_since("2030-01-01").unwrap()),
            ..RowFilter::default()
        };
        assert_eq!(select_rows(&table, &filter, &source).unwrap().len(), 3);
    }

    #[test]
    fn test_bad_timestamp_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("bad.csv");
        std::fs::write(&source, "timestamp,anomaly\n2024-05-01,1\nyesterday,1\n").unwrap();
        let table = Table::load(&source, b',').unwrap();
        let filter = RowFilter {
            until: Some(parse_until("2024-06-01").unwrap()),
            ..RowFilter::default()
        };
        let err = select_rows(&table, &filter, &source).unwrap_err();
        assert!(matches!(err, ExportError::InvalidTimestamp { row: 1, .. }));
        assert!(parse_since("yesterday").is_err());
    }

    #[test]
    fn test_parse_cli_values() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("outliers".parse::<LabelFilter>().unwrap(), LabelFilter::Outliers);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
