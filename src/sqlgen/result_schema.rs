//! Result-shape inference from the first returned row.

use lazy_static::lazy_static;
use regex::Regex;

use crate::cache::{ColumnShape, ColumnType, ResultSchema};
use crate::models::{JsonValue, Row};

lazy_static! {
    /// ISO-8601 prefix: YYYY-MM-DD.
    static ref ISO_DATE_PREFIX: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("static regex");
}

/// Sample the first row and classify every column value. Empty result sets
/// yield no schema.
pub fn infer_result_schema(rows: &[Row]) -> Option<ResultSchema> {
    let first = rows.first()?;
    Some(
        first
            .iter()
            .map(|(name, value)| (name.clone(), classify(value)))
            .collect(),
    )
}

fn classify(value: &JsonValue) -> ColumnShape {
    match value {
        JsonValue::Null => ColumnShape::of(ColumnType::Null),
        JsonValue::Bool(_) => ColumnShape::of(ColumnType::Boolean),
        JsonValue::Number(n) => {
            if n.is_i64() || n.is_u64() {
                ColumnShape::of(ColumnType::Integer)
            } else {
                ColumnShape::of(ColumnType::Number)
            }
        }
        JsonValue::String(s) => {
            if ISO_DATE_PREFIX.is_match(s) {
                ColumnShape::date()
            } else {
                ColumnShape::of(ColumnType::String)
            }
        }
        JsonValue::Array(_) => ColumnShape::of(ColumnType::Array),
        JsonValue::Object(_) => ColumnShape::of(ColumnType::Object),
    }
}
