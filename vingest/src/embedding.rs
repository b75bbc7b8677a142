// VecIngest — embedding.rs
// Vector literal parsing and formatting for embedding cells.
// Author: d65v <https://github.com/d65v>
//
// Cells hold literals such as "[0.12, -3.4e-2, 7]". Only flat lists or
// tuples of decimal numbers are accepted; nothing is ever evaluated.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VectorParseError {
    #[error("not a bracketed sequence")]
    NotASequence,

    #[error("element {index} is not a number: '{token}'")]
    BadElement { index: usize, token: String },

    #[error("element {index} is not finite")]
    NonFinite { index: usize },
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `[a, b, ...]` or `(a, b, ...)` into a vector of f64.
///
/// A single trailing comma is allowed. An empty sequence parses to an empty
/// vector; the caller checks the dimension.
pub fn parse_vector_literal(text: &str) -> Result<Vec<f64>, VectorParseError> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .or_else(|| trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')))
        .ok_or(VectorParseError::NotASequence)?;

    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    let inner = inner.strip_suffix(',').unwrap_or(inner);

    inner
        .split(',')
        .enumerate()
        .map(|(index, raw)| {
            let token = raw.trim();
            if !is_number_literal(token) {
                return Err(VectorParseError::BadElement {
                    index,
                    token: token.to_string(),
                });
            }
            let value: f64 = token.parse().map_err(|_| VectorParseError::BadElement {
                index,
                token: token.to_string(),
            })?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(VectorParseError::NonFinite { index })
            }
        })
        .collect()
}

/// `[+-]digits[.digits][(e|E)[+-]digits]`, with digits on at least one side of
/// the point. Rejects names like `inf`/`nan` that `f64::from_str` would take.
fn is_number_literal(token: &str) -> bool {
    let b = token.as_bytes();
    let mut i = 0;
    let digits = |i: &mut usize| {
        let start = *i;
        while *i < b.len() && b[*i].is_ascii_digit() {
            *i += 1;
        }
        *i - start
    };

    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let mut mantissa = digits(&mut i);
    if i < b.len() && b[i] == b'.' {
        i += 1;
        mantissa += digits(&mut i);
    }
    if mantissa == 0 {
        return false;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        if digits(&mut i) == 0 {
            return false;
        }
    }
    i == b.len()
}

// ── Formatting ────────────────────────────────────────────────────────────────

/// Inverse of [`parse_vector_literal`]; re-parsing yields identical values.
pub fn format_vector_literal(values: &[f64]) -> String {
    let body: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
    format!("[{}]", body.join(", "))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
