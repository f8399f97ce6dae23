use sheetqc_core::{
    build_feedback_request, calculate_score, needs_feedback, Category, IssueDetail, Marking,
    QcError, StaticCatalog, Subcategory, DEFAULT_FEEDBACK_THRESHOLD,
};

fn review_catalog() -> StaticCatalog {
    StaticCatalog::single(
        4,
        vec![
            Category {
                category_id: 1,
                name: "Formatting".to_string(),
                total_points: 20.0,
                subcategories: vec![Subcategory {
                    subcategory_id: 1,
                    name: "Typo".to_string(),
                    point_value: 20.0,
                    is_fatal: false,
                }],
            },
            Category {
                category_id: 2,
                name: "Compliance".to_string(),
                total_points: 100.0,
                subcategories: vec![Subcategory {
                    subcategory_id: 2,
                    name: "Fatal Error".to_string(),
                    point_value: 100.0,
                    is_fatal: true,
                }],
            },
        ],
    )
}

#[test]
fn partial_deductions_roll_up_across_categories() {
    let markings = vec![Marking {
        subcategory_id: 1,
        error_count: 2,
        points_deducted: 5.0,
    }];
    let result = calculate_score(&review_catalog(), 4, &markings).unwrap();

    assert_eq!(result.category_scores[0].final_score, 15.0);
    assert_eq!(result.category_scores[0].percentage, 75.0);
    assert_eq!(result.category_scores[1].final_score, 100.0);
    assert_eq!(result.category_scores[1].percentage, 100.0);
    assert_eq!(result.total_score, 115.0);
    assert_eq!(result.total_percentage, 95.83);
    assert!(!result.is_rejected);
    assert!(result.rejection_reason.is_none());
}

#[test]
fn fatal_marking_rejects_the_evaluation() {
    let markings = vec![Marking {
        subcategory_id: 2,
        error_count: 1,
        points_deducted: 0.0,
    }];
    let result = calculate_score(&review_catalog(), 4, &markings).unwrap();

    assert_eq!(result.category_scores[1].final_score, 0.0);
    assert_eq!(result.total_score, 20.0);
    assert_eq!(result.total_percentage, 16.67);
    assert!(result.is_rejected);
    assert!(result
        .rejection_reason
        .as_deref()
        .unwrap()
        .contains("Fatal Error"));
    assert_eq!(result.fatal_errors.len(), 1);
    assert_eq!(result.fatal_errors[0].category_name, "Compliance");
}

#[test]
fn unknown_project_type_fails_instead_of_scoring_zero() {
    let err = calculate_score(&review_catalog(), 99, &[]).unwrap_err();
    assert!(matches!(err, QcError::UnknownProjectType(99)));
}

#[test]
fn feedback_request_follows_the_score() {
    let markings = vec![Marking {
        subcategory_id: 2,
        error_count: 1,
        points_deducted: 0.0,
    }];
    let result = calculate_score(&review_catalog(), 4, &markings).unwrap();
    assert!(needs_feedback(&result, DEFAULT_FEEDBACK_THRESHOLD));

    let issues = vec![IssueDetail {
        subcategory_id: 2,
        record_ref: Some("row 7".to_string()),
        detail: "missing mandatory consent field".to_string(),
    }];
    let request = build_feedback_request(&result, &issues, 120, 3);

    assert!(request.is_rejected);
    assert_eq!(request.overall_score, 16.67);
    assert_eq!(request.total_records, 120);
    assert_eq!(request.errors.len(), 1);
    assert!(request.errors[0].is_fatal);
    assert_eq!(request.errors[0].samples[0], "[row 7] missing mandatory consent field");
    assert_eq!(request.fatal_errors.len(), 1);
}
