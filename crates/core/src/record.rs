use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QcError, Result};

/// Scalar cell value as it arrives from a spreadsheet import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Null,
}

impl CellValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => CellValue::Null,
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) => CellValue::Number(f),
                None => CellValue::Text(n.to_string()),
            },
            Value::Bool(b) => CellValue::Text(b.to_string()),
            other => CellValue::Text(other.to_string()),
        }
    }

    /// String coercion used for fingerprint input and display. Integral
    /// numbers render without a fractional part, matching how spreadsheet
    /// cells come in ("1", not "1.0").
    pub fn display(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            CellValue::Null => String::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// One tabular record: an ordered mapping from column name (as it appeared
/// in the source data) to a scalar value. Column order is preserved so the
/// empty-selection fallback can use the record's own header order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    columns: IndexMap<String, CellValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        self.columns.insert(column.into(), value);
    }

    /// Builds a record from a JSON object. Anything that is not an object is
    /// the malformed-record case; `row` is only used for the error.
    pub fn from_json_object(value: &Value, row: usize) -> Result<Self> {
        let map = value.as_object().ok_or(QcError::MalformedRecord(row))?;
        let mut columns = IndexMap::with_capacity(map.len());
        for (key, val) in map {
            columns.insert(key.clone(), CellValue::from_json(val));
        }
        Ok(Self { columns })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns.get(column)
    }

    /// Resolves a column case-insensitively, ignoring surrounding whitespace
    /// on both sides of the match.
    pub fn get_ci(&self, column: &str) -> Option<(&str, &CellValue)> {
        let wanted = normalize_header(column);
        self.columns
            .iter()
            .find(|(key, _)| normalize_header(key) == wanted)
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Canonical form used when matching header names: trimmed and lowercased.
pub fn normalize_header(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_preserves_column_order() {
        let value = json!({"Name": "Ada", "Email": "ada@example.com", "Id": 1});
        let record = Record::from_json_object(&value, 2).unwrap();
        let keys: Vec<_> = record.keys().collect();
        assert_eq!(keys, vec!["Name", "Email", "Id"]);
    }

    #[test]
    fn non_object_is_malformed() {
        let err = Record::from_json_object(&json!([1, 2, 3]), 5).unwrap_err();
        assert!(matches!(err, QcError::MalformedRecord(5)));
    }

    #[test]
    fn header_resolution_ignores_case_and_whitespace() {
        let value = json!({" Email Address ": "a@b.c"});
        let record = Record::from_json_object(&value, 2).unwrap();
        let (key, cell) = record.get_ci("email address").unwrap();
        assert_eq!(key, " Email Address ");
        assert_eq!(cell.display(), "a@b.c");
    }

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(CellValue::Number(42.0).display(), "42");
        assert_eq!(CellValue::Number(1.5).display(), "1.5");
        assert_eq!(CellValue::Null.display(), "");
    }
}
