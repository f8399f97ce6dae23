use serde::{Deserialize, Serialize};
use serde_json::Value;

use sheetqc_core::FeedbackRequest;

/// Structured feedback parsed from the collaborator's response. Every field
/// defaults so a partially conforming response still yields a summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default, rename = "overallScore")]
    pub overall_score: f64,
    #[serde(default, rename = "isRejected")]
    pub is_rejected: bool,
    #[serde(default, rename = "categoryAnalysis")]
    pub category_analysis: Vec<CategoryAnalysis>,
    #[serde(default, rename = "priorityIssues")]
    pub priority_issues: Vec<PriorityIssue>,
    #[serde(default, rename = "improvementSuggestions")]
    pub improvement_suggestions: Vec<String>,
    #[serde(default, rename = "nextSteps")]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryAnalysis {
    #[serde(default)]
    pub subcategory_name: String,
    #[serde(default)]
    pub error_count: i64,
    #[serde(default)]
    pub is_fatal_error: bool,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityIssue {
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub affected_records: i64,
    #[serde(default)]
    pub action_required: String,
}

/// Renders the structured feedback payload into the prompt handed to the
/// text-generation collaborator. The core built the payload; nothing here
/// reaches back into scoring.
pub fn render_feedback_prompt(request: &FeedbackRequest) -> String {
    let errors = serde_json::to_string_pretty(&request.errors).unwrap_or_else(|_| "[]".to_string());
    let fatal =
        serde_json::to_string_pretty(&request.fatal_errors).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are a QC evaluation expert analyzing category-level review errors.
Return ONLY valid JSON. Do not include markdown, code fences, or extra text.

Goal: Provide detailed feedback based on the category-specific errors found
during QC evaluation. Focus on which subcategories had the most issues and
give actionable recommendations.

EVALUATION ANALYSIS:
Overall Score: {score}%
Total Records Evaluated: {records}
Is Rejected: {rejected}

ERRORS BY SUBCATEGORY:
{errors}

FATAL ERRORS:
{fatal}

Output JSON schema (strict):
{{
  "summary": "<string>",
  "overallScore": <number 0-100>,
  "isRejected": <boolean>,
  "categoryAnalysis": [
    {{
      "subcategory_name": "<string>",
      "error_count": <number>,
      "is_fatal_error": <boolean>,
      "impact": "<string>",
      "recommendations": ["<string>"]
    }}
  ],
  "priorityIssues": [
    {{
      "subcategory": "<string>",
      "severity": "high|medium|low",
      "affected_records": <number>,
      "action_required": "<string>"
    }}
  ],
  "improvementSuggestions": ["<string>"],
  "nextSteps": ["<string>"]
}}
"#,
        score = request.overall_score,
        records = request.total_records,
        rejected = request.is_rejected,
        errors = errors,
        fatal = fatal,
    )
}

/// Renders the data-quality analysis prompt for one chunk of raw records.
pub fn render_dataset_prompt(records: &[Value], important_columns: &str) -> String {
    let dataset = serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are a QC expert performing comprehensive data quality analysis on a dataset.
Return ONLY valid JSON. Do not include markdown, code fences, or extra text.

IMPORTANT COLUMNS: {columns}

COMPLETE DATASET ({count} records):
{dataset}

ANALYSIS FOCUS:
1. Data completeness (missing values in important columns)
2. Data accuracy (format validation)
3. Data consistency (standardization, case sensitivity)
4. Duplicate records (exact and near-duplicates)
5. Outliers that may indicate errors

Output JSON schema (strict):
{{
  "qualityScore": <number 0-100>,
  "totalRecords": <number>,
  "validRecords": <number>,
  "issuesFound": <number>,
  "summary": "<max 2 sentences>",
  "criticalIssues": [
    {{
      "issue": "<string>",
      "location": "<column/row>",
      "impact": "<string>",
      "fix": "<string>",
      "affectedRecords": <number>
    }}
  ],
  "suggestions": ["<max 3 strings>"]
}}
Provide exact counts, analyze every record, and ensure validRecords + issuesFound = totalRecords.
"#,
        columns = important_columns,
        count = records.len(),
        dataset = dataset,
    )
}

/// Pulls the JSON document out of a model response: code fences are
/// stripped, then the outermost object or array is sliced as a fallback.
pub fn extract_json(text: &str) -> Option<String> {
    let mut clean = text.replace("```json", "```");
    if clean.contains("```") {
        clean = clean.replace("```", "");
    }
    let clean = clean.trim();
    if serde_json::from_str::<Value>(clean).is_ok() {
        return Some(clean.to_string());
    }

    let first_obj = clean.find('{');
    let last_obj = clean.rfind('}');
    let first_arr = clean.find('[');
    let last_arr = clean.rfind(']');

    if let (Some(start), Some(end)) = (first_arr, last_arr) {
        if first_obj.map_or(true, |obj| start < obj) && start < end {
            let slice = &clean[start..=end];
            if serde_json::from_str::<Value>(slice).is_ok() {
                return Some(slice.to_string());
            }
        }
    }
    if let (Some(start), Some(end)) = (first_obj, last_obj) {
        if start < end {
            let slice = &clean[start..=end];
            if serde_json::from_str::<Value>(slice).is_ok() {
                return Some(slice.to_string());
            }
        }
    }
    None
}

/// Parses a feedback response, falling back to a summary-only object when
/// the collaborator returned prose instead of JSON. Feedback being
/// unavailable or malformed must never fail the scoring path.
pub fn parse_feedback(content: &str) -> FeedbackSummary {
    if let Some(json) = extract_json(content) {
        if let Ok(parsed) = serde_json::from_str::<FeedbackSummary>(&json) {
            return parsed;
        }
    }
    FeedbackSummary {
        summary: content.trim().chars().take(500).collect(),
        ..FeedbackSummary::default()
    }
}

/// Deterministic offline response used by the local provider, shaped by
/// which prompt asked for it.
pub fn synthesize_local_response(prompt: &str) -> String {
    if prompt.contains("ERRORS BY SUBCATEGORY") {
        return serde_json::json!({
            "summary": "Offline feedback: review the listed subcategories and correct the flagged records.",
            "overallScore": 0,
            "isRejected": prompt.contains("Is Rejected: true"),
            "categoryAnalysis": [],
            "priorityIssues": [],
            "improvementSuggestions": ["Re-check the flagged subcategories before resubmitting."],
            "nextSteps": ["Fix the marked records", "Resubmit the batch"]
        })
        .to_string();
    }
    if prompt.contains("COMPLETE DATASET") {
        return serde_json::json!({
            "qualityScore": 100,
            "totalRecords": 0,
            "validRecords": 0,
            "issuesFound": 0,
            "summary": "Offline analysis: no issues detected.",
            "criticalIssues": [],
            "suggestions": []
        })
        .to_string();
    }
    serde_json::json!({ "summary": "Offline response." }).to_string()
}
