// VecIngest — record.rs
// Raw CSV rows and the typed records built from them.
// Author: d65v <https://github.com/d65v>

use serde::{Deserialize, Serialize};

// ── Raw Row ───────────────────────────────────────────────────────────────────

/// One decoded CSV line, before any schema is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Source line number, for diagnostics only
    pub line: u64,
    pub cells: Vec<String>,
}

impl RawRow {
    pub fn new(line: u64, cells: Vec<String>) -> Self {
        Self { line, cells }
    }

    pub fn from_cells<I, S>(line: u64, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            line,
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// ── Typed Values ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Int64(i64),
    VarChar(String),
    FloatVector(Vec<f64>),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::VarChar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            FieldValue::FloatVector(v) => Some(v),
            _ => None,
        }
    }

    /// Rough in-memory payload size, used for byte-bounded batches.
    pub fn estimated_size(&self) -> usize {
        match self {
            FieldValue::Int64(_) => 8,
            FieldValue::VarChar(s) => s.len(),
            FieldValue::FloatVector(v) => v.len() * 8,
        }
    }
}

// ── Record ────────────────────────────────────────────────────────────────────

/// A fully validated row bound to one collection. Fields keep schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub collection: String,
    pub fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn estimated_size(&self) -> usize {
        self.fields
            .iter()
            .map(|(name, value)| name.len() + value.estimated_size())
            .sum()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            collection: "demo".into(),
            fields: vec![
                ("id".into(), FieldValue::Int64(1)),
                ("name".into(), FieldValue::VarChar("ok".into())),
                ("vec".into(), FieldValue::FloatVector(vec![1.0, 2.0])),
            ],
        }
    }

    #[test]
    fn test_record_get_by_name() {
        let r = sample();
        assert_eq!(r.get("id").and_then(FieldValue::as_i64), Some(1));
        assert_eq!(r.get("name").and_then(FieldValue::as_str), Some("ok"));
        assert_eq!(r.get("vec").and_then(FieldValue::as_vector), Some(&[1.0, 2.0][..]));
        assert!(r.get("missing").is_none());
    }

    #[test]
    fn test_estimated_size() {
        // "id"+8, "name"+2, "vec"+16
        assert_eq!(sample().estimated_size(), 10 + 6 + 19);
    }

    #[test]
    fn test_raw_row_from_cells() {
        let row = RawRow::from_cells(3, ["a", "b"]);
        assert_eq!(row.line, 3);
        assert_eq!(row.len(), 2);
        assert_eq!(row.cells[1], "b");
    }
}
