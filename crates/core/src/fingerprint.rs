use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::record::{CellValue, Record};

/// Content fingerprint of one record: SHA-256 (lowercase hex) over the
/// `|`-joined values of the selected columns, with the whole joined string
/// lowercased and trimmed before hashing. Header casing and declaration
/// order never affect the result; selection order does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFingerprint {
    pub hash: String,
    /// Pre-hash join, kept for diagnostics only.
    pub input: String,
    /// Column -> raw value pairs that produced the hash, keyed by the
    /// selection's spelling. Columns missing from the record are omitted.
    pub matched: IndexMap<String, CellValue>,
}

/// One fingerprinted row of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintedRow {
    pub row: usize,
    pub record: Record,
    #[serde(flatten)]
    pub fingerprint: RecordFingerprint,
}

/// Per-row result of batch fingerprinting. Malformed rows (not a
/// column/value mapping) are reported explicitly, never silently skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowOutcome {
    Fingerprinted(FingerprintedRow),
    Malformed { row: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintBatch {
    /// The column selection actually used. When the caller passed an empty
    /// selection this is the first well-formed row's own header list.
    pub columns: Vec<String>,
    pub rows: Vec<RowOutcome>,
}

pub fn hash_fingerprint_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprints a single record against an explicit column selection.
/// Pure; never fails for a well-formed record.
pub fn fingerprint_record(record: &Record, columns: &[String]) -> RecordFingerprint {
    let mut parts = Vec::with_capacity(columns.len());
    let mut matched = IndexMap::new();
    for column in columns {
        match record.get_ci(column) {
            Some((_, value)) => {
                parts.push(value.display());
                matched.insert(column.clone(), value.clone());
            }
            None => parts.push(String::new()),
        }
    }
    let input = parts.join("|").to_lowercase().trim().to_string();
    RecordFingerprint {
        hash: hash_fingerprint_input(&input),
        input,
        matched,
    }
}

/// Fingerprints a whole batch of raw rows.
///
/// `columns` is the configured important-column selection; when it is empty
/// the selection falls back to the first well-formed row's own headers, once
/// for the whole batch. `first_row` is the position of the first data row in
/// the source (2 for a sheet whose row 1 is the header).
pub fn fingerprint_rows(rows: &[Value], columns: &[String], first_row: usize) -> FingerprintBatch {
    let records: Vec<(usize, Option<Record>)> = rows
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            let row = first_row + idx;
            (row, Record::from_json_object(value, row).ok())
        })
        .collect();

    let effective: Vec<String> = if columns.is_empty() {
        records
            .iter()
            .find_map(|(_, record)| record.as_ref())
            .map(|record| record.keys().map(str::to_string).collect())
            .unwrap_or_default()
    } else {
        columns.to_vec()
    };

    let rows = records
        .into_iter()
        .map(|(row, record)| match record {
            Some(record) => {
                let fingerprint = fingerprint_record(&record, &effective);
                RowOutcome::Fingerprinted(FingerprintedRow {
                    row,
                    record,
                    fingerprint,
                })
            }
            None => RowOutcome::Malformed { row },
        })
        .collect();

    FingerprintBatch {
        columns: effective,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn header_casing_and_order_do_not_change_the_hash() {
        let a = Record::from_json_object(&json!({"Name": "Ada", "Email": "A@B.C"}), 2).unwrap();
        let b = Record::from_json_object(&json!({"EMAIL": "a@b.c", "name": "ADA"}), 2).unwrap();
        let selection = cols(&["name", "email"]);
        assert_eq!(
            fingerprint_record(&a, &selection).hash,
            fingerprint_record(&b, &selection).hash
        );
    }

    #[test]
    fn changing_a_matched_value_changes_the_hash() {
        let a = Record::from_json_object(&json!({"name": "Ada"}), 2).unwrap();
        let b = Record::from_json_object(&json!({"name": "Alan"}), 2).unwrap();
        let selection = cols(&["name"]);
        assert_ne!(
            fingerprint_record(&a, &selection).hash,
            fingerprint_record(&b, &selection).hash
        );
    }

    #[test]
    fn missing_columns_resolve_to_empty_strings() {
        let record = Record::from_json_object(&json!({"name": "Ada"}), 2).unwrap();
        let fp = fingerprint_record(&record, &cols(&["name", "phone"]));
        assert_eq!(fp.input, "ada|");
        assert!(!fp.matched.contains_key("phone"));
    }

    #[test]
    fn separator_collisions_are_a_known_limitation() {
        // {"a":"x|y","b":"z"} and {"a":"x","b":"y|z"} join to the same
        // input under [a, b]; the `|` separator is not escaped.
        let a = Record::from_json_object(&json!({"a": "x|y", "b": "z"}), 2).unwrap();
        let b = Record::from_json_object(&json!({"a": "x", "b": "y|z"}), 2).unwrap();
        let selection = cols(&["a", "b"]);
        assert_eq!(
            fingerprint_record(&a, &selection).hash,
            fingerprint_record(&b, &selection).hash
        );
    }

    #[test]
    fn empty_selection_falls_back_to_first_row_headers_per_batch() {
        let rows = vec![
            json!({"Name": "Ada", "Email": "a@b.c"}),
            json!({"Email": "a@b.c", "Name": "Ada", "Extra": "ignored"}),
        ];
        let batch = fingerprint_rows(&rows, &[], 2);
        assert_eq!(batch.columns, vec!["Name", "Email"]);
        let hashes: Vec<_> = batch
            .rows
            .iter()
            .filter_map(|outcome| match outcome {
                RowOutcome::Fingerprinted(row) => Some(row.fingerprint.hash.clone()),
                RowOutcome::Malformed { .. } => None,
            })
            .collect();
        // the second row's Extra column is outside the batch selection
        assert_eq!(hashes[0], hashes[1]);
    }

    #[test]
    fn malformed_rows_are_marked_not_skipped() {
        let rows = vec![json!({"name": "Ada"}), json!("not a mapping")];
        let batch = fingerprint_rows(&rows, &cols(&["name"]), 2);
        assert_eq!(batch.rows.len(), 2);
        assert!(matches!(batch.rows[1], RowOutcome::Malformed { row: 3 }));
    }

    #[test]
    fn row_positions_honor_the_header_offset() {
        let rows = vec![json!({"name": "Ada"})];
        let batch = fingerprint_rows(&rows, &cols(&["name"]), 2);
        match &batch.rows[0] {
            RowOutcome::Fingerprinted(row) => assert_eq!(row.row, 2),
            RowOutcome::Malformed { .. } => panic!("row should fingerprint"),
        }
    }
}
