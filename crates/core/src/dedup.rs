use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{FingerprintBatch, RowOutcome};
use crate::record::{CellValue, Record};

/// How a duplicate row relates to what has been seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateKind {
    /// Duplicate of an earlier row in the same batch.
    InBatch,
    /// Duplicate of a fingerprint in the persisted store.
    Persisted,
    /// Both of the above.
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowClassification {
    Unique,
    Duplicate(DuplicateKind),
}

/// Classification of one row, emitted for every fingerprinted row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedRow {
    pub row: usize,
    pub fingerprint: String,
    pub classification: RowClassification,
    /// First batch row carrying the same fingerprint, for in-batch
    /// duplicates. The earliest row wins as the original.
    pub first_seen_row: Option<usize>,
}

/// Full detail for a duplicate row: the source record and the column/value
/// pairs that produced the matching fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub row: usize,
    pub fingerprint: String,
    pub kind: DuplicateKind,
    pub first_seen_row: Option<usize>,
    pub record: Record,
    pub matched: IndexMap<String, CellValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub columns: Vec<String>,
    pub rows: Vec<ClassifiedRow>,
    pub duplicates: Vec<DuplicateRecord>,
    /// Rows excluded from fingerprinting because they were not mappings.
    pub malformed_rows: Vec<usize>,
}

impl BatchReport {
    pub fn has_duplicates(&self) -> bool {
        !self.duplicates.is_empty()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicates.len()
    }

    /// Fingerprints of rows safe to persist: first occurrences that matched
    /// nothing in the store.
    pub fn unique_rows(&self) -> impl Iterator<Item = &ClassifiedRow> {
        self.rows
            .iter()
            .filter(|r| r.classification == RowClassification::Unique)
    }
}

/// Classifies every row of a fingerprinted batch against the batch itself
/// and a snapshot of persisted fingerprints.
///
/// Processing is strictly sequential in row order: row N's in-batch verdict
/// depends on rows before it, and ties go to the earliest row. The persisted
/// set is read-only snapshot state; it is never consulted twice for one row.
pub fn classify_batch(batch: FingerprintBatch, persisted: &FxHashSet<String>) -> BatchReport {
    let mut first_seen: FxHashMap<String, usize> = FxHashMap::default();
    let mut rows = Vec::new();
    let mut duplicates = Vec::new();
    let mut malformed_rows = Vec::new();

    for outcome in batch.rows {
        let fingerprinted = match outcome {
            RowOutcome::Fingerprinted(row) => row,
            RowOutcome::Malformed { row } => {
                malformed_rows.push(row);
                continue;
            }
        };
        let hash = fingerprinted.fingerprint.hash.clone();
        let in_store = persisted.contains(&hash);
        let earlier = first_seen.get(&hash).copied();

        let classification = match (in_store, earlier.is_some()) {
            (true, true) => RowClassification::Duplicate(DuplicateKind::Both),
            (true, false) => RowClassification::Duplicate(DuplicateKind::Persisted),
            (false, true) => RowClassification::Duplicate(DuplicateKind::InBatch),
            (false, false) => RowClassification::Unique,
        };

        rows.push(ClassifiedRow {
            row: fingerprinted.row,
            fingerprint: hash.clone(),
            classification,
            first_seen_row: earlier,
        });

        if let RowClassification::Duplicate(kind) = classification {
            duplicates.push(DuplicateRecord {
                row: fingerprinted.row,
                fingerprint: hash.clone(),
                kind,
                first_seen_row: earlier,
                record: fingerprinted.record,
                matched: fingerprinted.fingerprint.matched,
            });
        }

        first_seen.entry(hash).or_insert(fingerprinted.row);
    }

    BatchReport {
        columns: batch.columns,
        rows,
        duplicates,
        malformed_rows,
    }
}

/// What the caller does with a batch that contains duplicates. The
/// classifier only reports; this is orchestration vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestPolicy {
    /// Reject the whole batch when any duplicate exists.
    #[default]
    Strict,
    /// Keep going: persist unique rows, report the duplicates.
    Lenient,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_rows;
    use serde_json::json;

    fn persisted(hashes: &[&str]) -> FxHashSet<String> {
        hashes.iter().map(|h| h.to_string()).collect()
    }

    fn columns() -> Vec<String> {
        vec!["name".to_string()]
    }

    #[test]
    fn repeated_row_is_an_in_batch_duplicate_of_the_earliest() {
        let rows = vec![
            json!({"name": "Ada"}),
            json!({"name": "Ada"}),
            json!({"name": "Alan"}),
        ];
        let batch = fingerprint_rows(&rows, &columns(), 2);
        let report = classify_batch(batch, &FxHashSet::default());

        assert_eq!(report.rows[0].classification, RowClassification::Unique);
        assert_eq!(
            report.rows[1].classification,
            RowClassification::Duplicate(DuplicateKind::InBatch)
        );
        assert_eq!(report.rows[1].first_seen_row, Some(2));
        assert_eq!(report.rows[2].classification, RowClassification::Unique);
        assert_eq!(report.duplicate_count(), 1);
    }

    #[test]
    fn swapping_row_order_moves_the_duplicate_not_the_fact() {
        let forward = vec![json!({"name": "Ada", "id": 1}), json!({"name": "Ada", "id": 2})];
        let reversed = vec![json!({"name": "Ada", "id": 2}), json!({"name": "Ada", "id": 1})];
        let selection = columns();

        let forward_report =
            classify_batch(fingerprint_rows(&forward, &selection, 2), &FxHashSet::default());
        let reversed_report =
            classify_batch(fingerprint_rows(&reversed, &selection, 2), &FxHashSet::default());

        // a duplicate exists either way; only which physical row is reported
        // as the duplicate changes
        assert_eq!(forward_report.duplicates[0].row, 3);
        assert_eq!(reversed_report.duplicates[0].row, 3);
        assert_eq!(forward_report.duplicates[0].record.get("id").unwrap().display(), "2");
        assert_eq!(reversed_report.duplicates[0].record.get("id").unwrap().display(), "1");
    }

    #[test]
    fn persisted_match_is_reported_separately_from_in_batch() {
        let rows = vec![json!({"name": "Ada"}), json!({"name": "Ada"})];
        let batch = fingerprint_rows(&rows, &columns(), 2);
        let hash = batch
            .rows
            .iter()
            .find_map(|outcome| match outcome {
                RowOutcome::Fingerprinted(r) => Some(r.fingerprint.hash.clone()),
                RowOutcome::Malformed { .. } => None,
            })
            .unwrap();
        let report = classify_batch(batch, &persisted(&[&hash]));

        assert_eq!(
            report.rows[0].classification,
            RowClassification::Duplicate(DuplicateKind::Persisted)
        );
        assert_eq!(
            report.rows[1].classification,
            RowClassification::Duplicate(DuplicateKind::Both)
        );
        assert_eq!(report.rows[1].first_seen_row, Some(2));
    }

    #[test]
    fn duplicates_carry_the_matched_values() {
        let rows = vec![
            json!({"Name": "Ada", "Email": "a@b.c"}),
            json!({"NAME": "ada", "email": "A@B.C"}),
        ];
        let selection = vec!["name".to_string(), "email".to_string()];
        let report = classify_batch(fingerprint_rows(&rows, &selection, 2), &FxHashSet::default());

        assert_eq!(report.duplicate_count(), 1);
        let dup = &report.duplicates[0];
        assert_eq!(dup.matched.get("name").unwrap().display(), "ada");
        assert_eq!(dup.matched.get("email").unwrap().display(), "A@B.C");
    }

    #[test]
    fn malformed_rows_do_not_poison_the_report() {
        let rows = vec![json!(42), json!({"name": "Ada"})];
        let report = classify_batch(
            fingerprint_rows(&rows, &columns(), 2),
            &FxHashSet::default(),
        );
        assert_eq!(report.malformed_rows, vec![2]);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].row, 3);
    }
}
