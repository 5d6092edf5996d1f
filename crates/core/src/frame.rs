//! Minimal owned table model — named columns over rows of loosely typed
//! cells. Analysis operates on a working copy so caller-owned data is never
//! mutated in place.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{CohortError, CohortResult};

/// A single table value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric coercion: integers widen, floats pass through, strings are
    /// parsed (tolerating surrounding whitespace). Anything else is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => {
                if v.is_finite() {
                    Some(*v)
                } else {
                    None
                }
            }
            Self::Str(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Render the cell the way a user would expect to see it in an export.
    pub fn display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    /// Timestamp coercion. Unparseable values coerce to `None` (the null
    /// date marker) rather than failing the batch.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Str(s) => parse_timestamp(s),
            Self::Int(v) => {
                // Stringified year-month-day without separators is the only
                // integer date form we accept (e.g. 20240105).
                parse_timestamp(&v.to_string())
            }
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Cell {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Int(b as i64),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    n.as_f64().map_or(Self::Null, Self::Float)
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            other => Self::Str(other.to_string()),
        }
    }
}

/// Datetime formats attempted in order. Date-only forms resolve to
/// midnight.
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y", "%Y%m%d"];

/// Parse a timestamp trying a fixed set of common formats.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// An owned, row-major table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a frame from an array of JSON records. The column set is the
    /// union of keys across all records, in first-seen order; missing keys
    /// become nulls.
    pub fn from_records(records: Vec<serde_json::Value>) -> CohortResult<Self> {
        let mut objects = Vec::with_capacity(records.len());
        for record in records {
            match record {
                serde_json::Value::Object(obj) => objects.push(obj),
                _ => {
                    return Err(CohortError::Validation(
                        "Each record must be a JSON object".to_string(),
                    ))
                }
            }
        }

        let mut columns: Vec<String> = Vec::new();
        for obj in &objects {
            for key in obj.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut frame = Self::new(columns);
        for mut obj in objects {
            let row = frame
                .columns
                .iter()
                .map(|col| obj.remove(col).map_or(Cell::Null, Cell::from))
                .collect();
            frame.rows.push(row);
        }
        Ok(frame)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Vec<Cell>] {
        &mut self.rows
    }

    /// Append a row; arity must match the column set.
    pub fn push_row(&mut self, row: Vec<Cell>) -> CohortResult<()> {
        if row.len() != self.columns.len() {
            return Err(CohortError::Validation(format!(
                "Row has {} cells but frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        &self.rows[row][col]
    }

    /// Keep only rows matching the predicate.
    pub fn retain_rows<F: FnMut(&[Cell]) -> bool>(&mut self, mut keep: F) {
        self.rows.retain(|row| keep(row));
    }

    /// Project onto the named columns, silently skipping names that do not
    /// exist. Column order follows the request.
    pub fn select(&self, names: &[String]) -> Self {
        let indices: Vec<usize> = names
            .iter()
            .filter_map(|n| self.column_index(n))
            .collect();
        let columns = indices.iter().map(|&i| self.columns[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Self { columns, rows }
    }

    /// Iterate one column's cells.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &Cell> {
        self.rows.iter().map(move |row| &row[index])
    }
}
