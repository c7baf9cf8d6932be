#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CSV export of flattened records.
//!
//! Rows are [`FlatRecord`]s: sparse maps from column name to JSON value.
//! The caller's column list fixes the header order; any other key found in
//! the rows is appended after it in sorted order. A field present in only
//! some rows still gets a column and the other rows leave that cell empty.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use backyard_ecology_fetch_models::FlatRecord;
use serde_json::Value;

/// Errors that can occur while writing records.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// CSV encoding or write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error (file create/flush).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for flattened records.
pub trait RecordSink {
    /// Writes all `rows`. Called once per output.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows cannot be written.
    fn write_records(&mut self, rows: &[FlatRecord]) -> Result<(), ExportError>;
}

/// Writes records as CSV.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<String>,
}

impl<W: Write> CsvSink<W> {
    /// Wraps `writer`. `columns` gives the leading header columns in
    /// order, and is the whole header when there are no rows.
    pub fn new(writer: W, columns: &[&str]) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            columns: columns.iter().map(ToString::to_string).collect(),
        }
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Io`] if the final flush fails.
    pub fn into_inner(self) -> Result<W, ExportError> {
        self.writer
            .into_inner()
            .map_err(|e| ExportError::Io(e.into_error()))
    }
}

impl CsvSink<File> {
    /// Creates (or truncates) the file at `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Io`] if the file cannot be created.
    pub fn create(path: &Path, columns: &[&str]) -> Result<Self, ExportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(File::create(path)?, columns))
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn write_records(&mut self, rows: &[FlatRecord]) -> Result<(), ExportError> {
        let header = header_for(&self.columns, rows);

        self.writer.write_record(&header)?;
        for row in rows {
            self.writer
                .write_record(header.iter().map(|key| cell(row.get(key))))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// `columns` in order, followed by every other key in `rows`, sorted.
#[must_use]
pub fn header_for(columns: &[String], rows: &[FlatRecord]) -> Vec<String> {
    let extra: BTreeSet<&String> = rows
        .iter()
        .flat_map(|r| r.keys())
        .filter(|key| !columns.contains(key))
        .collect();
    columns.iter().chain(extra).cloned().collect()
}

/// Renders one value as a CSV cell: strings verbatim, `null` or missing
/// as empty, everything else as JSON text.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Writes `rows` to a new CSV file at `path`, logging the row count.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_csv(path: &Path, rows: &[FlatRecord], columns: &[&str]) -> Result<(), ExportError> {
    let mut sink = CsvSink::create(path, columns)?;
    sink.write_records(rows)?;
    sink.into_inner()?;
    log::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(fields: &[(&str, Value)]) -> FlatRecord {
        fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn render(rows: &[FlatRecord], columns: &[&str]) -> String {
        let mut sink = CsvSink::new(Vec::new(), columns);
        sink.write_records(rows).unwrap();
        String::from_utf8(sink.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn header_is_sorted_union_and_sparse_cells_are_empty() {
        let rows = [
            record(&[("id", json!("a")), ("score", json!(0.5))]),
            record(&[("id", json!("b")), ("extra", json!(true))]),
        ];
        assert_eq!(
            render(&rows, &[]),
            "extra,id,score\n,a,0.5\ntrue,b,\n"
        );
    }

    #[test]
    fn columns_keep_caller_order_and_extras_follow() {
        let rows = [record(&[
            ("count", json!(3)),
            ("species_name", json!("Wren")),
            ("date", json!("2024-06-01")),
            ("serial_code", json!("AAA")),
            ("note", json!("late")),
        ])];
        assert_eq!(
            render(&rows, &["date", "serial_code", "species_name", "count"]),
            "date,serial_code,species_name,count,note\n2024-06-01,AAA,Wren,3,late\n"
        );
    }

    #[test]
    fn empty_rows_write_columns_only() {
        assert_eq!(render(&[], &["id", "timestamp", "lat"]), "id,timestamp,lat\n");
    }

    #[test]
    fn null_and_nested_values() {
        let rows = [record(&[
            ("a", Value::Null),
            ("b", json!({"k": 1})),
            ("c", json!("has, comma")),
        ])];
        assert_eq!(render(&rows, &[]), "a,b,c\n,\"{\"\"k\"\":1}\",\"has, comma\"\n");
    }

    #[test]
    fn write_csv_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/birdweather_duval_fl.csv");

        write_csv(&path, &[record(&[("id", json!(1))])], &[]).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id\n1\n");
    }
}
