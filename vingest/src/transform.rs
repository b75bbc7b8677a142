// VecIngest — transform.rs
// Row → record conversion: cell count check, index column drop,
// position-gated int64 coercion, sanitisation, length and vector checks.
// Author: d65v <https://github.com/d65v>

use crate::embedding::parse_vector_literal;
use crate::record::{FieldValue, RawRow, Record};
use crate::schema::{CollectionSchema, FieldKind, FieldSpec};
use crate::{IngestError, Rejection, Result, DEFAULT_MAX_FIELD_LENGTH};

// ── Rules ─────────────────────────────────────────────────────────────────────

/// Per-run transformation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRules {
    /// Positions allowed to become int64. `None` = every Int64 field.
    pub numeric_positions: Option<Vec<usize>>,
    /// Limit for every non-numeric cell, in characters.
    pub max_field_length: usize,
    /// Rows carry a leading index column that is not part of the schema.
    pub drop_index_column: bool,
}

impl Default for TransformRules {
    fn default() -> Self {
        Self {
            numeric_positions: None,
            max_field_length: DEFAULT_MAX_FIELD_LENGTH,
            drop_index_column: false,
        }
    }
}

impl TransformRules {
    /// One flag per schema field: may this position be coerced to int64?
    ///
    /// # Errors
    /// `InvalidConfig` if a position is out of range or names a non-Int64 field.
    pub fn numeric_mask(&self, schema: &CollectionSchema) -> Result<Vec<bool>> {
        let positions = match &self.numeric_positions {
            Some(p) => p.clone(),
            None => schema.int64_positions(),
        };

        let mut mask = vec![false; schema.fields.len()];
        for pos in positions {
            let field = schema.fields.get(pos).ok_or_else(|| {
                IngestError::InvalidConfig(format!(
                    "numeric position {} is out of range for '{}' ({} fields)",
                    pos,
                    schema.name,
                    schema.fields.len()
                ))
            })?;
            if field.kind != FieldKind::Int64 {
                return Err(IngestError::InvalidConfig(format!(
                    "numeric position {} ('{}') is not an int64 field",
                    pos, field.name
                )));
            }
            mask[pos] = true;
        }
        Ok(mask)
    }
}

// ── Transformer ───────────────────────────────────────────────────────────────

/// Cell after the first pass: either coerced already or sanitised text.
enum Cell {
    Int(i64),
    Text(String),
    Overflow,
}

/// Converts raw rows into records for one schema. Pure; safe to share
/// between threads.
#[derive(Debug)]
pub struct RecordTransformer<'a> {
    schema: &'a CollectionSchema,
    numeric: Vec<bool>,
    max_field_length: usize,
    drop_index_column: bool,
}

impl<'a> RecordTransformer<'a> {
    pub fn new(schema: &'a CollectionSchema, rules: &TransformRules) -> Result<Self> {
        Ok(Self {
            schema,
            numeric: rules.numeric_mask(schema)?,
            max_field_length: rules.max_field_length,
            drop_index_column: rules.drop_index_column,
        })
    }

    pub fn schema(&self) -> &'a CollectionSchema {
        self.schema
    }

    /// Cells a row must carry, including the index column if one is dropped.
    pub fn expected_cells(&self) -> usize {
        self.schema.fields.len() + usize::from(self.drop_index_column)
    }

    /// Build a record from `row`, or say why the whole row is rejected.
    ///
    /// Every non-numeric cell is length-checked before any type check, so an
    /// over-long cell always wins as the rejection reason.
    pub fn transform(&self, row: &RawRow) -> std::result::Result<Record, Rejection> {
        let expected = self.expected_cells();
        let got = row.cells.len();
        if got < expected {
            return Err(Rejection::ShortRow { line: row.line, expected, got });
        }
        if got > expected {
            return Err(Rejection::WideRow { line: row.line, expected, got });
        }

        let data = &row.cells[usize::from(self.drop_index_column)..];

        let mut cells = Vec::with_capacity(data.len());
        for (pos, (spec, raw)) in self.schema.fields.iter().zip(data).enumerate() {
            cells.push(self.first_pass(row.line, pos, spec, raw)?);
        }

        let mut fields = Vec::with_capacity(cells.len());
        for (spec, cell) in self.schema.fields.iter().zip(cells) {
            let value = typed_value(row.line, spec, cell)?;
            fields.push((spec.name.clone(), value));
        }

        Ok(Record {
            collection: self.schema.name.clone(),
            fields,
        })
    }

    fn first_pass(
        &self,
        line: u64,
        pos: usize,
        spec: &FieldSpec,
        raw: &str,
    ) -> std::result::Result<Cell, Rejection> {
        if self.numeric[pos] && is_decimal_digits(raw) {
            return Ok(raw.parse().map(Cell::Int).unwrap_or(Cell::Overflow));
        }

        let text = sanitize(raw);
        let max = match spec.kind {
            FieldKind::VarChar { max_len } => max_len.min(self.max_field_length),
            _ => self.max_field_length,
        };
        let len = text.chars().count();
        if len > max {
            return Err(Rejection::FieldTooLong {
                line,
                field: spec.name.clone(),
                len,
                max,
            });
        }
        Ok(Cell::Text(text))
    }
}

fn typed_value(line: u64, spec: &FieldSpec, cell: Cell) -> std::result::Result<FieldValue, Rejection> {
    match (&spec.kind, cell) {
        (FieldKind::Int64, Cell::Int(v)) => Ok(FieldValue::Int64(v)),
        (FieldKind::Int64, _) => Err(Rejection::InvalidInteger {
            line,
            field: spec.name.clone(),
        }),
        (FieldKind::VarChar { .. }, Cell::Text(text)) => Ok(FieldValue::VarChar(text)),
        (FieldKind::FloatVector { dim }, Cell::Text(text)) => {
            let malformed = |reason: String| Rejection::MalformedVector {
                line,
                field: spec.name.clone(),
                reason,
            };
            let values = parse_vector_literal(&text).map_err(|e| malformed(e.to_string()))?;
            if values.len() != *dim {
                return Err(malformed(format!(
                    "expected {} values, got {}",
                    dim,
                    values.len()
                )));
            }
            Ok(FieldValue::FloatVector(values))
        }
        // The numeric mask only ever covers Int64 fields.
        (_, _) => unreachable!("int64 coercion applied to non-int64 field '{}'", spec.name),
    }
}

/// Non-empty and ASCII digits only: no sign, no spaces, no decimal point,
/// no non-ASCII digits.
fn is_decimal_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Single quotes become spaces so values can sit inside quoted filter
/// expressions on the store side.
fn sanitize(s: &str) -> String {
    s.replace('\'', " ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{movie_feature_schema, FieldSpec, MOVIE_NUMERIC_POSITIONS};
    use crate::RejectKind;

    fn demo_schema() -> CollectionSchema {
        CollectionSchema::new(
            "demo",
            "demo collection",
            vec![
                FieldSpec::int64("id").primary(),
                FieldSpec::varchar("name", 5),
                FieldSpec::float_vector("vec", 2),
            ],
        )
    }

    fn demo_rules() -> TransformRules {
        TransformRules {
            numeric_positions: Some(vec![0]),
            ..TransformRules::default()
        }
    }

    fn row(cells: &[&str]) -> RawRow {
        RawRow::from_cells(2, cells.iter().copied())
    }

    fn reject_kind(schema: &CollectionSchema, rules: &TransformRules, cells: &[&str]) -> RejectKind {
        let t = RecordTransformer::new(schema, rules).unwrap();
        t.transform(&row(cells)).unwrap_err().kind()
    }

    #[test]
    fn test_accepts_valid_row() {
        let schema = demo_schema();
        let t = RecordTransformer::new(&schema, &demo_rules()).unwrap();
        let rec = t.transform(&row(&["1", "ok", "[1.0,2.0]"])).unwrap();

        assert_eq!(rec.collection, "demo");
        assert_eq!(
            rec.fields,
            vec![
                ("id".to_string(), FieldValue::Int64(1)),
                ("name".to_string(), FieldValue::VarChar("ok".into())),
                ("vec".to_string(), FieldValue::FloatVector(vec![1.0, 2.0])),
            ]
        );
    }

    #[test]
    fn test_field_too_long_rejects_whole_row() {
        let schema = demo_schema();
        let t = RecordTransformer::new(&schema, &demo_rules()).unwrap();
        let err = t.transform(&row(&["1", "toolong", "[1.0,2.0]"])).unwrap_err();
        assert_eq!(
            err,
            Rejection::FieldTooLong {
                line: 2,
                field: "name".into(),
                len: 7,
                max: 5
            }
        );
    }

    #[test]
    fn test_single_quote_sanitised() {
        let schema = demo_schema();
        let t = RecordTransformer::new(&schema, &demo_rules()).unwrap();
        let rec = t.transform(&row(&["1", "o'k", "[1.0,2.0]"])).unwrap();
        assert_eq!(rec.get("name"), Some(&FieldValue::VarChar("o k".into())));
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        let schema = demo_schema();
        let t = RecordTransformer::new(&schema, &demo_rules()).unwrap();
        let rec = t.transform(&row(&["1", "ééééé", "[1.0,2.0]"])).unwrap();
        assert_eq!(rec.get("name"), Some(&FieldValue::VarChar("ééééé".into())));
    }

    #[test]
    fn test_short_and_wide_rows() {
        let schema = demo_schema();
        let rules = demo_rules();
        let t = RecordTransformer::new(&schema, &rules).unwrap();
        assert_eq!(
            t.transform(&row(&["1", "ok"])).unwrap_err(),
            Rejection::ShortRow { line: 2, expected: 3, got: 2 }
        );
        assert_eq!(
            reject_kind(&schema, &rules, &["1", "ok", "[1.0,2.0]", "extra"]),
            RejectKind::WideRow
        );
    }

    #[test]
    fn test_drops_leading_index_column() {
        let schema = demo_schema();
        let rules = TransformRules {
            drop_index_column: true,
            ..demo_rules()
        };
        let t = RecordTransformer::new(&schema, &rules).unwrap();
        assert_eq!(t.expected_cells(), 4);

        let rec = t.transform(&row(&["0", "7", "ok", "[1.0,2.0]"])).unwrap();
        assert_eq!(rec.get("id"), Some(&FieldValue::Int64(7)));

        assert_eq!(
            t.transform(&row(&["7", "ok", "[1.0,2.0]"])).unwrap_err().kind(),
            RejectKind::ShortRow
        );
    }

    #[test]
    fn test_coercion_is_position_gated() {
        // "42" in a varchar column stays text even though it looks numeric.
        let schema = demo_schema();
        let t = RecordTransformer::new(&schema, &demo_rules()).unwrap();
        let rec = t.transform(&row(&["1", "42", "[1.0,2.0]"])).unwrap();
        assert_eq!(rec.get("name"), Some(&FieldValue::VarChar("42".into())));
    }

    #[test]
    fn test_int64_outside_allowlist_is_rejected() {
        let schema = demo_schema();
        let rules = TransformRules {
            numeric_positions: Some(vec![]),
            ..TransformRules::default()
        };
        assert_eq!(
            reject_kind(&schema, &rules, &["1", "ok", "[1.0,2.0]"]),
            RejectKind::InvalidInteger
        );
    }

    #[test]
    fn test_non_digit_integers_rejected() {
        let schema = demo_schema();
        let rules = demo_rules();
        // Non-ASCII digits are not integers here.
        for bad in ["-5", "1.5", " 3", "", "12a", "99999999999999999999", "٣", "１２"] {
            assert_eq!(
                reject_kind(&schema, &rules, &[bad, "ok", "[1.0,2.0]"]),
                RejectKind::InvalidInteger,
                "cell {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_malformed_vectors() {
        let schema = demo_schema();
        let rules = demo_rules();
        for bad in ["[1.0]", "[1.0,2.0,3.0]", "1.0,2.0", "[a,b]", "[]"] {
            assert_eq!(
                reject_kind(&schema, &rules, &["1", "ok", bad]),
                RejectKind::MalformedVector,
                "cell {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_vector_quotes_are_sanitised_before_parsing() {
        let schema = demo_schema();
        let rules = demo_rules();
        // "'1.0'" becomes " 1.0 " and parses.
        let t = RecordTransformer::new(&schema, &rules).unwrap();
        let rec = t.transform(&row(&["1", "ok", "['1.0', 2.0]"])).unwrap();
        assert_eq!(rec.get("vec"), Some(&FieldValue::FloatVector(vec![1.0, 2.0])));
    }

    #[test]
    fn test_too_long_wins_over_type_errors() {
        let schema = demo_schema();
        let rules = demo_rules();
        assert_eq!(
            reject_kind(&schema, &rules, &["x", "toolong", "nope"]),
            RejectKind::FieldTooLong
        );
    }

    #[test]
    fn test_global_max_caps_every_text_cell() {
        let schema = demo_schema();
        let rules = TransformRules {
            max_field_length: 3,
            ..demo_rules()
        };
        assert_eq!(
            reject_kind(&schema, &rules, &["1", "abcd", "[1,2]"]),
            RejectKind::FieldTooLong
        );
        // The vector cell itself is bounded too.
        assert_eq!(
            reject_kind(&schema, &rules, &["1", "ab", "[1.0,2.0]"]),
            RejectKind::FieldTooLong
        );
    }

    #[test]
    fn test_transform_is_pure() {
        let schema = demo_schema();
        let t = RecordTransformer::new(&schema, &demo_rules()).unwrap();
        let r = row(&["3", "o'k", "(0.5, -1e-3)"]);
        assert_eq!(t.transform(&r).unwrap(), t.transform(&r).unwrap());
    }

    #[test]
    fn test_numeric_mask_validation() {
        let schema = demo_schema();
        let out_of_range = TransformRules {
            numeric_positions: Some(vec![9]),
            ..TransformRules::default()
        };
        assert!(matches!(
            RecordTransformer::new(&schema, &out_of_range).unwrap_err(),
            IngestError::InvalidConfig(_)
        ));

        let not_int = TransformRules {
            numeric_positions: Some(vec![1]),
            ..TransformRules::default()
        };
        assert!(matches!(
            RecordTransformer::new(&schema, &not_int).unwrap_err(),
            IngestError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_movie_row() {
        let schema = movie_feature_schema();
        let rules = TransformRules {
            numeric_positions: Some(MOVIE_NUMERIC_POSITIONS.to_vec()),
            drop_index_column: true,
            ..TransformRules::default()
        };
        let t = RecordTransformer::new(&schema, &rules).unwrap();

        let vector = format!("[{}]", vec!["0.25"; 128].join(", "));
        let mut cells: Vec<String> = (0..29).map(|i| format!("text {}", i)).collect();
        cells[0] = "0".into();
        for pos in MOVIE_NUMERIC_POSITIONS {
            cells[pos + 1] = (pos * 10).to_string();
        }
        cells[28] = vector;

        let rec = t.transform(&RawRow::new(2, cells)).unwrap();
        assert_eq!(rec.len(), 28);
        assert_eq!(rec.get("id"), Some(&FieldValue::Int64(80)));
        assert_eq!(rec.get("cast"), Some(&FieldValue::VarChar("text 1".into())));
        assert_eq!(
            rec.get("movie_feature").and_then(FieldValue::as_vector).map(<[f64]>::len),
            Some(128)
        );
    }
}
