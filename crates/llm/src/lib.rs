mod client;
mod evaluate;
mod gate;
mod prompt;

use anyhow::Result;

use sheetqc_core::FeedbackRequest;

pub use client::{FeedbackClient, LlmProvider, LlmRequest};
pub use evaluate::{
    aggregate_evaluations, evaluate_dataset, evaluate_dataset_blocking, parse_evaluation,
    AggregateEvaluation, ChunkEvaluation, CriticalIssue, CHUNK_SIZE,
};
pub use gate::{RequestGate, ServiceLimits};
pub use prompt::{
    extract_json, parse_feedback, render_dataset_prompt, render_feedback_prompt, CategoryAnalysis,
    FeedbackSummary, PriorityIssue,
};

/// Full feedback round trip: render the structured payload, call the
/// collaborator through the gate, parse the response. Failures here are the
/// recoverable "feedback unavailable" kind; they never block a score.
pub async fn generate_feedback(
    client: &FeedbackClient,
    gate: &RequestGate,
    request: &FeedbackRequest,
) -> Result<FeedbackSummary> {
    let _permit = gate.acquire().await?;
    let prompt = render_feedback_prompt(request);
    let content = client.generate(&LlmRequest { prompt }).await?;
    Ok(parse_feedback(&content))
}

/// Blocking wrapper for synchronous callers.
pub fn generate_feedback_blocking(
    client: &FeedbackClient,
    gate: &RequestGate,
    request: &FeedbackRequest,
) -> Result<FeedbackSummary> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(generate_feedback(client, gate, request))
}
