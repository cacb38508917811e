//! Dataset loading and cleaning.
//!
//! The dataset is read once per request from a CSV file, cleaned, and then
//! shared read-only by every agent. Besides the table itself it provides
//! the text renderings the prompts need (schema, column list, preview) and
//! a content fingerprint used to detect index drift.

use crate::config::DataConfig;
use crate::error::DatasetError;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A single table cell.
///
/// Numbers keep the text they were parsed from so that rendering never
/// rewrites the source value ("007" stays "007").
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Number { value: f64, raw: String },
    Text(String),
}

impl Cell {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || matches!(raw, "NA" | "N/A" | "NaN" | "nan" | "null" | "NULL") {
            return Cell::Missing;
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Cell::Number {
                value,
                raw: raw.to_string(),
            },
            _ => Cell::Text(raw.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// Demote a number back to its source text.
    fn into_text(self) -> Self {
        match self {
            Cell::Number { raw, .. } => Cell::Text(raw),
            other => other,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Cell::Missing => Value::Null,
            Cell::Number { value, .. } if value.fract() == 0.0 && value.abs() < 9.0e15 => {
                Value::from(*value as i64)
            }
            Cell::Number { value, .. } => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => Ok(()),
            Cell::Number { raw, .. } => write!(f, "{}", raw),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Inferred column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "int64"),
            ColumnType::Float => write!(f, "float64"),
            ColumnType::Text => write!(f, "object"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
}

/// A cleaned, read-only table.
#[derive(Debug, Clone)]
pub struct Dataset {
    source: PathBuf,
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
    fingerprint: String,
}

impl Dataset {
    /// Load and clean a CSV file.
    ///
    /// A missing file yields [`DatasetError::NotFound`] so callers can report
    /// it distinctly from a malformed one.
    pub fn load(path: &Path, config: &DataConfig) -> Result<Self, DatasetError> {
        if !path.exists() {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }

        info!("Loading data from {}", path.display());
        let bytes = std::fs::read(path)?;
        let fingerprint = hex::encode(Sha256::digest(&bytes));

        let parse_err = |e: csv::Error| DatasetError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes.as_slice());

        let headers: Vec<String> = reader
            .headers()
            .map_err(parse_err)?
            .iter()
            .map(String::from)
            .collect();

        let mut raw_rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(parse_err)?;
            raw_rows.push(record.iter().map(String::from).collect::<Vec<_>>());
        }

        let mut dataset = Self::from_records(path.to_path_buf(), headers, raw_rows, config);
        dataset.fingerprint = fingerprint;

        if dataset.rows.is_empty() {
            return Err(DatasetError::Empty(path.to_path_buf()));
        }

        info!(
            "Data loaded successfully. Shape: ({}, {})",
            dataset.row_count(),
            dataset.columns.len()
        );
        Ok(dataset)
    }

    /// Build a dataset from raw string records, applying the cleaning rules.
    pub fn from_records(
        source: PathBuf,
        headers: Vec<String>,
        raw_rows: Vec<Vec<String>>,
        config: &DataConfig,
    ) -> Self {
        let width = headers.len();
        let numeric: Vec<bool> = headers
            .iter()
            .map(|h| config.numeric_columns.iter().any(|c| c == h))
            .collect();
        let required: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| config.required_columns.iter().any(|c| c == *h))
            .map(|(i, _)| i)
            .collect();

        let total = raw_rows.len();
        let mut rows: Vec<Vec<Cell>> = raw_rows
            .into_iter()
            .map(|raw| {
                (0..width)
                    .map(|i| {
                        let cell = raw.get(i).map(|s| Cell::parse(s)).unwrap_or(Cell::Missing);
                        match cell {
                            Cell::Text(_) if numeric[i] => Cell::Missing,
                            other => other,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|row| required.iter().all(|&i| !row[i].is_missing()))
            .collect();

        if rows.len() < total {
            debug!("Dropped {} rows with missing required values", total - rows.len());
        }

        let columns: Vec<Column> = headers
            .into_iter()
            .enumerate()
            .map(|(i, name)| Column {
                name,
                dtype: infer_type(rows.iter().map(|r| &r[i])),
            })
            .collect();

        // Numeric-looking values in text columns stay text
        for (i, column) in columns.iter().enumerate() {
            if column.dtype == ColumnType::Text {
                for row in rows.iter_mut() {
                    row[i] = std::mem::replace(&mut row[i], Cell::Missing).into_text();
                }
            }
        }

        let fingerprint = fingerprint_rows(&rows);

        Self {
            source,
            columns,
            rows,
            fingerprint,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// SHA-256 of the source content.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// `a, b, c` rendering of the column names.
    pub fn column_list(&self) -> String {
        self.column_names().join(", ")
    }

    /// Column/type listing used by the code-generation prompt.
    pub fn schema_description(&self) -> String {
        let width = self.columns.iter().map(|c| c.name.len()).max().unwrap_or(0);
        self.columns
            .iter()
            .map(|c| format!("{:<width$}  {}", c.name, c.dtype, width = width))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First `n` rows as a Markdown table.
    pub fn sample_preview(&self, n: usize) -> String {
        let mut out = String::new();
        out.push_str(&format!("| {} |\n", self.column_names().join(" | ")));
        out.push_str(&format!(
            "|{}\n",
            self.columns.iter().map(|_| "---|").collect::<String>()
        ));
        for row in self.rows.iter().take(n) {
            let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        out
    }

    /// First `n` rows as JSON objects keyed by column name.
    pub fn preview_records(&self, n: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(n)
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(col, cell)| (col.name.clone(), cell.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Text description of one row, restricted to `only` when non-empty.
    ///
    /// Missing cells are skipped.
    pub fn describe_row(&self, index: usize, only: &[String]) -> Option<String> {
        let row = self.rows.get(index)?;
        let parts: Vec<String> = self
            .columns
            .iter()
            .zip(row)
            .filter(|(col, _)| only.is_empty() || only.iter().any(|c| c == &col.name))
            .filter(|(_, cell)| !cell.is_missing())
            .map(|(col, cell)| format!("{}: {}", col.name, cell))
            .collect();
        Some(format!("{}.", parts.join(". ")))
    }

    /// Serialize the cleaned table back to CSV for the sandbox.
    pub fn to_csv(&self) -> anyhow::Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|c| c.to_string()))?;
        }
        Ok(writer.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))?)
    }
}

fn infer_type<'a>(cells: impl Iterator<Item = &'a Cell>) -> ColumnType {
    let mut dtype = ColumnType::Integer;
    for cell in cells {
        match cell {
            Cell::Missing => {}
            Cell::Text(_) => return ColumnType::Text,
            Cell::Number { value, .. } if value.fract() != 0.0 => dtype = ColumnType::Float,
            Cell::Number { .. } => {}
        }
    }
    dtype
}

fn fingerprint_rows(rows: &[Vec<Cell>]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        for cell in row {
            hasher.update(cell.to_string().as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}
