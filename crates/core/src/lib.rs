mod catalog;
mod dedup;
mod error;
mod feedback;
mod fingerprint;
mod record;
mod sample;
mod scoring;

pub use catalog::{legacy_fatal, Category, CatalogSource, StaticCatalog, Subcategory};
pub use dedup::{
    classify_batch, BatchReport, ClassifiedRow, DuplicateKind, DuplicateRecord, IngestPolicy,
    RowClassification,
};
pub use error::{QcError, Result};
pub use feedback::{
    build_feedback_request, needs_feedback, ErrorGroup, FeedbackRequest, IssueDetail,
    DEFAULT_FEEDBACK_THRESHOLD, MAX_SAMPLE_LEN,
};
pub use fingerprint::{
    fingerprint_record, fingerprint_rows, hash_fingerprint_input, FingerprintBatch,
    FingerprintedRow, RecordFingerprint, RowOutcome,
};
pub use record::{normalize_header, CellValue, Record};
pub use sample::sample_rows;
pub use scoring::{
    calculate_score, score_summary, validate_markings, CategoryScore, FatalError, Marking,
    ScoreResult, SubcategoryScore,
};
