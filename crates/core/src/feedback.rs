use serde::{Deserialize, Serialize};

use crate::scoring::{FatalError, ScoreResult};

/// Feedback generation is only requested below this overall percentage
/// (or on rejection). Callers may override it.
pub const DEFAULT_FEEDBACK_THRESHOLD: f64 = 95.0;

/// Sample detail snippets are truncated to this many characters.
pub const MAX_SAMPLE_LEN: usize = 200;

/// A raw per-record evaluation issue supplied by upstream review tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDetail {
    pub subcategory_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_ref: Option<String>,
    pub detail: String,
}

/// Errors for one subcategory, with a bounded set of example details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub subcategory_id: i64,
    pub subcategory_name: String,
    pub error_count: i64,
    pub is_fatal: bool,
    pub samples: Vec<String>,
}

/// Language-agnostic summary handed to the external text-generation
/// collaborator. Pure data; the builder does no I/O and knows nothing
/// about any model or vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub overall_score: f64,
    pub total_records: usize,
    pub is_rejected: bool,
    pub errors: Vec<ErrorGroup>,
    pub fatal_errors: Vec<FatalError>,
}

/// Reshapes a score result plus raw issue details into the summary payload
/// for feedback generation. Groups follow catalog order; only subcategories
/// with errors appear; each group carries at most `max_samples` snippets.
pub fn build_feedback_request(
    result: &ScoreResult,
    issues: &[IssueDetail],
    total_records: usize,
    max_samples: usize,
) -> FeedbackRequest {
    let mut errors = Vec::new();
    for category in &result.category_scores {
        for subcategory in &category.subcategories {
            if subcategory.error_count <= 0 {
                continue;
            }
            let samples: Vec<String> = issues
                .iter()
                .filter(|issue| issue.subcategory_id == subcategory.subcategory_id)
                .take(max_samples)
                .map(format_sample)
                .collect();
            errors.push(ErrorGroup {
                subcategory_id: subcategory.subcategory_id,
                subcategory_name: subcategory.name.clone(),
                error_count: subcategory.error_count,
                is_fatal: subcategory.is_fatal,
                samples,
            });
        }
    }
    FeedbackRequest {
        overall_score: result.total_percentage,
        total_records,
        is_rejected: result.is_rejected,
        errors,
        fatal_errors: result.fatal_errors.clone(),
    }
}

/// Whether the external collaborator should be asked for feedback at all.
pub fn needs_feedback(result: &ScoreResult, threshold: f64) -> bool {
    result.total_percentage < threshold || result.is_rejected
}

fn format_sample(issue: &IssueDetail) -> String {
    let detail = truncate(&issue.detail, MAX_SAMPLE_LEN);
    match &issue.record_ref {
        Some(record_ref) => format!("[{record_ref}] {detail}"),
        None => detail,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, StaticCatalog, Subcategory};
    use crate::scoring::{calculate_score, Marking};

    fn sample_result() -> ScoreResult {
        let catalog = StaticCatalog::single(
            7,
            vec![Category {
                category_id: 1,
                name: "Accuracy".to_string(),
                total_points: 100.0,
                subcategories: vec![
                    Subcategory {
                        subcategory_id: 1,
                        name: "Wrong value".to_string(),
                        point_value: 50.0,
                        is_fatal: false,
                    },
                    Subcategory {
                        subcategory_id: 2,
                        name: "Untouched".to_string(),
                        point_value: 50.0,
                        is_fatal: false,
                    },
                ],
            }],
        );
        let markings = vec![Marking {
            subcategory_id: 1,
            error_count: 3,
            points_deducted: 15.0,
        }];
        calculate_score(&catalog, 7, &markings).unwrap()
    }

    #[test]
    fn only_subcategories_with_errors_are_grouped() {
        let request = build_feedback_request(&sample_result(), &[], 40, 3);
        assert_eq!(request.errors.len(), 1);
        assert_eq!(request.errors[0].subcategory_name, "Wrong value");
        assert_eq!(request.errors[0].error_count, 3);
        assert_eq!(request.total_records, 40);
    }

    #[test]
    fn samples_are_capped_and_truncated() {
        let issues: Vec<IssueDetail> = (0..5)
            .map(|i| IssueDetail {
                subcategory_id: 1,
                record_ref: Some(format!("row {}", i + 2)),
                detail: "x".repeat(300),
            })
            .collect();
        let request = build_feedback_request(&sample_result(), &issues, 40, 2);
        assert_eq!(request.errors[0].samples.len(), 2);
        assert!(request.errors[0].samples[0].starts_with("[row 2] "));
        assert!(request.errors[0].samples[0].ends_with("..."));
    }

    #[test]
    fn threshold_gates_feedback() {
        let result = sample_result();
        // 85/100 = 85% < 95
        assert!(needs_feedback(&result, DEFAULT_FEEDBACK_THRESHOLD));
        assert!(!needs_feedback(&result, 80.0));
    }
}
