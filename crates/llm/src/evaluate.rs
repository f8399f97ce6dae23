use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::task::JoinSet;
use tracing::info;

use crate::client::{FeedbackClient, LlmRequest};
use crate::gate::RequestGate;
use crate::prompt::{extract_json, render_dataset_prompt};

/// Records per text-generation call when sweeping a whole dataset.
pub const CHUNK_SIZE: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriticalIssue {
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub fix: String,
    #[serde(default, rename = "affectedRecords")]
    pub affected_records: Option<i64>,
}

/// Parsed data-quality verdict for one chunk of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkEvaluation {
    pub quality_score: f64,
    pub total_records: usize,
    pub valid_records: usize,
    pub issues_found: usize,
    pub summary: String,
    pub critical_issues: Vec<CriticalIssue>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateEvaluation {
    /// Record-weighted mean of the chunk quality scores, rounded.
    pub quality_score: i64,
    pub total_records: usize,
    pub valid_records: usize,
    pub issues_found: usize,
    pub summary: String,
    pub suggestions: Vec<String>,
    pub critical_issues: Vec<CriticalIssue>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEvaluation {
    #[serde(default, rename = "qualityScore")]
    quality_score: f64,
    #[serde(default, rename = "issuesFound")]
    issues_found: Option<i64>,
    #[serde(default)]
    summary: String,
    #[serde(default, rename = "criticalIssues")]
    critical_issues: Vec<CriticalIssue>,
    #[serde(default)]
    suggestions: Vec<String>,
}

static RECORD_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+records?").expect("valid regex"));
static ROW_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"rows?\s+(\d+)").expect("valid regex"));

/// Turns a model response for one chunk into a `ChunkEvaluation`.
///
/// The problematic-record count prefers each issue's explicit
/// `affectedRecords`, then counts quoted in the issue text or location, then
/// one record per issue; it is clamped so `valid + issues == total` always
/// holds. Unparseable responses degrade to a mostly-fine verdict carrying
/// the raw text as summary.
pub fn parse_evaluation(content: &str, chunk_len: usize) -> ChunkEvaluation {
    let raw: Option<RawEvaluation> =
        extract_json(content).and_then(|json| serde_json::from_str(&json).ok());
    let raw = match raw {
        Some(raw) => raw,
        None => {
            return ChunkEvaluation {
                quality_score: 85.0,
                total_records: chunk_len,
                valid_records: chunk_len.saturating_sub(1),
                issues_found: 1.min(chunk_len),
                summary: content.trim().to_string(),
                critical_issues: Vec::new(),
                suggestions: Vec::new(),
            }
        }
    };

    let mut problematic: i64 = if raw.critical_issues.is_empty() {
        raw.issues_found.unwrap_or(0)
    } else {
        raw.critical_issues
            .iter()
            .map(|issue| {
                issue
                    .affected_records
                    .or_else(|| capture_count(&RECORD_COUNT_RE, &issue.issue))
                    .or_else(|| capture_count(&ROW_REF_RE, &issue.location))
                    .unwrap_or(1)
            })
            .sum()
    };
    problematic = problematic.clamp(0, chunk_len as i64);
    let issues_found = problematic as usize;

    ChunkEvaluation {
        quality_score: raw.quality_score,
        total_records: chunk_len,
        valid_records: chunk_len - issues_found,
        issues_found,
        summary: raw.summary,
        critical_issues: raw.critical_issues,
        suggestions: raw.suggestions,
    }
}

fn capture_count(re: &Regex, text: &str) -> Option<i64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Sweeps a whole dataset: fixed-size chunks, each evaluated through the
/// gate concurrently, results merged into one verdict. A chunk failing
/// after its retries fails the sweep; partial verdicts are not reported as
/// complete ones.
pub async fn evaluate_dataset(
    client: &FeedbackClient,
    gate: &RequestGate,
    rows: &[Value],
    important_columns: &str,
    chunk_size: usize,
) -> Result<AggregateEvaluation> {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Vec<Value>> = rows.chunks(chunk_size).map(|c| c.to_vec()).collect();
    info!(
        records = rows.len(),
        chunks = chunks.len(),
        "evaluating dataset"
    );

    let mut join_set = JoinSet::new();
    for (idx, chunk) in chunks.into_iter().enumerate() {
        let client = client.clone();
        let gate = gate.clone();
        let columns = important_columns.to_string();
        join_set.spawn(async move {
            let _permit = gate.acquire().await?;
            let prompt = render_dataset_prompt(&chunk, &columns);
            let content = client.generate(&LlmRequest { prompt }).await?;
            Ok::<(usize, ChunkEvaluation), anyhow::Error>((
                idx,
                parse_evaluation(&content, chunk.len()),
            ))
        });
    }

    let mut evaluations: Vec<Option<ChunkEvaluation>> = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        let (idx, evaluation) = joined.context("evaluation task panicked")??;
        if evaluations.len() <= idx {
            evaluations.resize(idx + 1, None);
        }
        evaluations[idx] = Some(evaluation);
    }
    let ordered: Vec<ChunkEvaluation> = evaluations.into_iter().flatten().collect();
    aggregate_evaluations(&ordered).context("no evaluation results to aggregate")
}

/// Blocking wrapper for synchronous callers.
pub fn evaluate_dataset_blocking(
    client: &FeedbackClient,
    gate: &RequestGate,
    rows: &[Value],
    important_columns: &str,
    chunk_size: usize,
) -> Result<AggregateEvaluation> {
    let rt = Runtime::new().context("failed to create tokio runtime")?;
    rt.block_on(evaluate_dataset(client, gate, rows, important_columns, chunk_size))
}

/// Merges chunk verdicts: quality is weighted by chunk size, counts add up,
/// suggestions are deduplicated and capped, issue lists are capped to keep
/// payloads bounded.
pub fn aggregate_evaluations(results: &[ChunkEvaluation]) -> Option<AggregateEvaluation> {
    if results.is_empty() {
        return None;
    }

    let mut weighted_score = 0.0;
    let mut total_records = 0usize;
    let mut valid_records = 0usize;
    let mut issues_found = 0usize;
    let mut suggestions: Vec<String> = Vec::new();
    let mut critical_issues: Vec<CriticalIssue> = Vec::new();
    let mut first_summary: Option<&str> = None;

    for result in results {
        weighted_score += result.quality_score * result.total_records as f64;
        total_records += result.total_records;
        valid_records += result.valid_records;
        issues_found += result.issues_found;
        for suggestion in &result.suggestions {
            if !suggestions.contains(suggestion) {
                suggestions.push(suggestion.clone());
            }
        }
        critical_issues.extend(result.critical_issues.iter().cloned());
        if first_summary.is_none() && !result.summary.is_empty() {
            first_summary = Some(&result.summary);
        }
    }

    suggestions.truncate(5);
    critical_issues.truncate(50);
    let quality_score = if total_records > 0 {
        (weighted_score / total_records as f64).round() as i64
    } else {
        0
    };
    let summary = match first_summary {
        Some(summary) if summary.chars().count() > 200 => {
            let head: String = summary.chars().take(200).collect();
            format!("{head}...")
        }
        Some(summary) => summary.to_string(),
        None => "Batch analysis completed.".to_string(),
    };

    Some(AggregateEvaluation {
        quality_score,
        total_records,
        valid_records,
        issues_found,
        summary,
        suggestions,
        critical_issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(score: f64, total: usize, issues: usize, summary: &str) -> ChunkEvaluation {
        ChunkEvaluation {
            quality_score: score,
            total_records: total,
            valid_records: total - issues,
            issues_found: issues,
            summary: summary.to_string(),
            critical_issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    #[test]
    fn counts_prefer_explicit_affected_records() {
        let content = r#"{
            "qualityScore": 70,
            "criticalIssues": [
                {"issue": "missing emails", "affectedRecords": 4},
                {"issue": "3 records have bad phone numbers"},
                {"issue": "stray header", "location": "row 12"}
            ]
        }"#;
        let parsed = parse_evaluation(content, 50);
        assert_eq!(parsed.issues_found, 4 + 3 + 12);
        assert_eq!(parsed.valid_records, 50 - 19);
    }

    #[test]
    fn counts_never_exceed_the_chunk() {
        let content = r#"{"qualityScore": 10, "criticalIssues": [{"issue": "900 records broken"}]}"#;
        let parsed = parse_evaluation(content, 20);
        assert_eq!(parsed.issues_found, 20);
        assert_eq!(parsed.valid_records, 0);
    }

    #[test]
    fn unparseable_responses_degrade_gracefully() {
        let parsed = parse_evaluation("model went off script", 10);
        assert_eq!(parsed.quality_score, 85.0);
        assert_eq!(parsed.issues_found, 1);
        assert_eq!(parsed.summary, "model went off script");
    }

    #[test]
    fn aggregation_weights_by_chunk_size() {
        let results = vec![chunk(100.0, 50, 0, "clean"), chunk(50.0, 10, 5, "")];
        let merged = aggregate_evaluations(&results).unwrap();
        // (100*50 + 50*10) / 60
        assert_eq!(merged.quality_score, 92);
        assert_eq!(merged.total_records, 60);
        assert_eq!(merged.issues_found, 5);
        assert_eq!(merged.summary, "clean");
    }

    #[test]
    fn aggregation_of_nothing_is_none() {
        assert!(aggregate_evaluations(&[]).is_none());
    }
}
