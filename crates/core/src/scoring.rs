use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSource;
use crate::error::{QcError, Result};

/// A reviewer-submitted error tally against one subcategory. Counts and
/// deductions are signed so validation can enumerate negative inputs
/// instead of failing at the serde boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Marking {
    pub subcategory_id: i64,
    pub error_count: i64,
    pub points_deducted: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubcategoryScore {
    pub subcategory_id: i64,
    pub name: String,
    pub error_count: i64,
    pub points_deducted: f64,
    pub is_fatal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category_id: i64,
    pub name: String,
    pub total_points: f64,
    pub points_deducted: f64,
    pub final_score: f64,
    pub percentage: f64,
    pub subcategories: Vec<SubcategoryScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatalError {
    pub subcategory_id: i64,
    pub subcategory_name: String,
    pub category_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub total_score: f64,
    /// 0-100, rounded to 2 decimals half-away-from-zero.
    pub total_percentage: f64,
    pub is_rejected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub category_scores: Vec<CategoryScore>,
    pub fatal_errors: Vec<FatalError>,
}

/// Checks a marking submission and returns every violation found, not just
/// the first: duplicate subcategory ids, negative error counts, negative
/// deductions. An empty list means the submission is valid.
pub fn validate_markings(markings: &[Marking]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen: IndexMap<i64, usize> = IndexMap::new();
    for marking in markings {
        *seen.entry(marking.subcategory_id).or_insert(0) += 1;
    }
    for (subcategory_id, count) in &seen {
        if *count > 1 {
            errors.push(format!(
                "duplicate markings for subcategory id {subcategory_id}"
            ));
        }
    }
    for marking in markings {
        if marking.error_count < 0 {
            errors.push(format!(
                "negative error count for subcategory id {}",
                marking.subcategory_id
            ));
        }
        if marking.points_deducted < 0.0 {
            errors.push(format!(
                "negative points deducted for subcategory id {}",
                marking.subcategory_id
            ));
        }
    }
    errors
}

/// Rolls a flat marking list up into per-category and overall scores.
///
/// Fatal subcategories with any errors zero out their entire category and
/// reject the evaluation. Category scores clamp at zero; a category with
/// zero total points contributes 0% rather than dividing by zero. Catalog
/// or validation failure aborts the whole calculation; a zero score is
/// never substituted for a failed one.
pub fn calculate_score(
    catalog: &dyn CatalogSource,
    project_type_id: i64,
    markings: &[Marking],
) -> Result<ScoreResult> {
    let violations = validate_markings(markings);
    if !violations.is_empty() {
        return Err(QcError::InvalidMarkings(violations));
    }

    let categories = catalog.categories_for(project_type_id)?;
    let by_subcategory: FxHashMap<i64, &Marking> = markings
        .iter()
        .map(|m| (m.subcategory_id, m))
        .collect();

    let mut category_scores = Vec::with_capacity(categories.len());
    let mut fatal_errors = Vec::new();
    let mut total_project_points = 0.0;
    let mut total_score = 0.0;

    for category in &categories {
        total_project_points += category.total_points;

        let mut deducted = 0.0;
        let mut fatal_hit = false;
        let mut subcategories = Vec::with_capacity(category.subcategories.len());

        for subcategory in &category.subcategories {
            let marking = by_subcategory.get(&subcategory.subcategory_id);
            let error_count = marking.map(|m| m.error_count).unwrap_or(0);
            let points_deducted = marking.map(|m| m.points_deducted).unwrap_or(0.0);

            if subcategory.is_fatal && error_count > 0 {
                fatal_errors.push(FatalError {
                    subcategory_id: subcategory.subcategory_id,
                    subcategory_name: subcategory.name.clone(),
                    category_name: category.name.clone(),
                });
                fatal_hit = true;
            } else {
                deducted += points_deducted;
            }

            subcategories.push(SubcategoryScore {
                subcategory_id: subcategory.subcategory_id,
                name: subcategory.name.clone(),
                error_count,
                points_deducted,
                is_fatal: subcategory.is_fatal,
            });
        }

        // A fatal error forfeits the full category weight, overriding any
        // partial deductions.
        if fatal_hit {
            deducted = category.total_points;
        }

        let final_score = (category.total_points - deducted).max(0.0);
        let percentage = if category.total_points > 0.0 {
            final_score / category.total_points * 100.0
        } else {
            0.0
        };
        total_score += final_score;

        category_scores.push(CategoryScore {
            category_id: category.category_id,
            name: category.name.clone(),
            total_points: category.total_points,
            points_deducted: deducted,
            final_score,
            percentage,
            subcategories,
        });
    }

    let total_percentage = if total_project_points > 0.0 {
        round2(total_score / total_project_points * 100.0)
    } else {
        0.0
    };
    let is_rejected = !fatal_errors.is_empty();
    let rejection_reason = is_rejected.then(|| {
        let names: Vec<&str> = fatal_errors
            .iter()
            .map(|f| f.subcategory_name.as_str())
            .collect();
        format!("fatal error(s) found: {}", names.join(", "))
    });

    Ok(ScoreResult {
        total_score,
        total_percentage,
        is_rejected,
        rejection_reason,
        category_scores,
        fatal_errors,
    })
}

/// One-line report of a score result.
pub fn score_summary(result: &ScoreResult) -> String {
    if result.is_rejected {
        return format!(
            "QC rejected: {}. Overall score: {}%",
            result
                .rejection_reason
                .as_deref()
                .unwrap_or("fatal error(s) found"),
            result.total_percentage
        );
    }
    let breakdown: Vec<String> = result
        .category_scores
        .iter()
        .map(|cat| format!("{}: {:.1}%", cat.name, cat.percentage))
        .collect();
    format!(
        "QC passed: overall score {}%. Category breakdown: {}",
        result.total_percentage,
        breakdown.join(", ")
    )
}

/// Round to 2 decimals, half away from zero (`f64::round` semantics).
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, StaticCatalog, Subcategory};

    fn subcategory(id: i64, name: &str, points: f64, fatal: bool) -> Subcategory {
        Subcategory {
            subcategory_id: id,
            name: name.to_string(),
            point_value: points,
            is_fatal: fatal,
        }
    }

    fn category(id: i64, name: &str, points: f64, subcategories: Vec<Subcategory>) -> Category {
        Category {
            category_id: id,
            name: name.to_string(),
            total_points: points,
            subcategories,
        }
    }

    fn marking(id: i64, errors: i64, deducted: f64) -> Marking {
        Marking {
            subcategory_id: id,
            error_count: errors,
            points_deducted: deducted,
        }
    }

    #[test]
    fn validation_enumerates_every_violation() {
        let markings = vec![
            marking(1, 1, 5.0),
            marking(1, 2, 3.0),
            marking(2, -1, 0.0),
            marking(3, 0, -2.0),
        ];
        let errors = validate_markings(&markings);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("duplicate markings for subcategory id 1"));
        assert!(errors[1].contains("negative error count for subcategory id 2"));
        assert!(errors[2].contains("negative points deducted for subcategory id 3"));
    }

    #[test]
    fn invalid_markings_abort_the_calculation() {
        let catalog = StaticCatalog::single(
            1,
            vec![category(1, "Formatting", 20.0, vec![subcategory(1, "Typo", 20.0, false)])],
        );
        let err = calculate_score(&catalog, 1, &[marking(1, 1, 5.0), marking(1, 1, 5.0)])
            .unwrap_err();
        assert!(err.violations().is_some());
    }

    #[test]
    fn fatal_error_zeroes_the_whole_category() {
        let catalog = StaticCatalog::single(
            1,
            vec![category(
                1,
                "Compliance",
                100.0,
                vec![
                    subcategory(1, "Minor", 50.0, false),
                    subcategory(2, "Fatal Error", 50.0, true),
                ],
            )],
        );
        let result = calculate_score(&catalog, 1, &[marking(2, 1, 10.0)]).unwrap();
        assert_eq!(result.category_scores[0].final_score, 0.0);
        assert_eq!(result.category_scores[0].points_deducted, 100.0);
        assert!(result.is_rejected);
        assert_eq!(result.fatal_errors.len(), 1);
    }

    #[test]
    fn fatal_subcategory_without_errors_is_inert() {
        let catalog = StaticCatalog::single(
            1,
            vec![category(
                1,
                "Compliance",
                100.0,
                vec![subcategory(2, "Fatal Error", 100.0, true)],
            )],
        );
        let result = calculate_score(&catalog, 1, &[]).unwrap();
        assert!(!result.is_rejected);
        assert_eq!(result.total_percentage, 100.0);
    }

    #[test]
    fn zero_point_category_never_divides_by_zero() {
        let catalog = StaticCatalog::single(
            1,
            vec![category(1, "Empty", 0.0, vec![subcategory(1, "Anything", 0.0, false)])],
        );
        let result = calculate_score(&catalog, 1, &[marking(1, 1, 0.0)]).unwrap();
        assert_eq!(result.category_scores[0].percentage, 0.0);
        assert_eq!(result.total_percentage, 0.0);
    }

    #[test]
    fn deductions_clamp_at_zero() {
        let catalog = StaticCatalog::single(
            1,
            vec![category(1, "Formatting", 10.0, vec![subcategory(1, "Typo", 10.0, false)])],
        );
        let result = calculate_score(&catalog, 1, &[marking(1, 4, 25.0)]).unwrap();
        assert_eq!(result.category_scores[0].final_score, 0.0);
        assert_eq!(result.total_percentage, 0.0);
        assert!(!result.is_rejected);
    }

    #[test]
    fn identical_inputs_yield_identical_results() {
        let catalog = StaticCatalog::single(
            1,
            vec![
                category(1, "Formatting", 20.0, vec![subcategory(1, "Typo", 20.0, false)]),
                category(2, "Accuracy", 30.0, vec![subcategory(2, "Wrong value", 30.0, false)]),
            ],
        );
        let markings = vec![marking(1, 2, 5.0), marking(2, 1, 7.5)];
        let first = calculate_score(&catalog, 1, &markings).unwrap();
        let second = calculate_score(&catalog, 1, &markings).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn summary_names_categories() {
        let catalog = StaticCatalog::single(
            1,
            vec![category(1, "Formatting", 20.0, vec![subcategory(1, "Typo", 20.0, false)])],
        );
        let result = calculate_score(&catalog, 1, &[marking(1, 1, 5.0)]).unwrap();
        let summary = score_summary(&result);
        assert!(summary.contains("QC passed"));
        assert!(summary.contains("Formatting: 75.0%"));
    }
}
