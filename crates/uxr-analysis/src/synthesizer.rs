//! The Synthesizer (§4.6): a single schema-validated LLM call producing the
//! study-level synthesis. Pure over its inputs, retried up to 3x on
//! transient provider failures.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uxr_llm::{next_backoff_ms, LlmClient, LlmClientError};

const MAX_SYNTHESIS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySynthesis {
    pub overall_ux_score: u8,
    pub executive_summary: String,
    #[serde(default)]
    pub universal_issues: Vec<String>,
    #[serde(default)]
    pub persona_specific_findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

fn is_transient(error: &LlmClientError) -> bool {
    matches!(error, LlmClientError::Provider { .. } | LlmClientError::RateLimited { .. })
}

/// `Synthesize(study_url, tasks, session_summaries, all_issues)`. Retries
/// transient provider errors with the shared backoff schedule; schema or
/// parse errors are not retried since a different prompt will not fix them.
pub async fn synthesize_study(
    llm: &dyn LlmClient,
    study_url: &str,
    tasks: &[String],
    session_summaries: &[String],
    all_issues: &[Value],
) -> Result<StudySynthesis> {
    let study_context = json!({
        "study_url": study_url,
        "tasks": tasks,
        "session_summaries": session_summaries,
        "all_issues": all_issues,
    });

    let mut last_error = None;
    for attempt in 0..MAX_SYNTHESIS_ATTEMPTS {
        match llm.synthesize_study(&study_context).await {
            Ok(call_result) => {
                let synthesis: StudySynthesis = serde_json::from_value(call_result.value)?;
                return Ok(StudySynthesis {
                    overall_ux_score: synthesis.overall_ux_score.min(100),
                    ..synthesis
                });
            }
            Err(error) if is_transient(&error) && attempt + 1 < MAX_SYNTHESIS_ATTEMPTS => {
                let delay_ms = next_backoff_ms(attempt);
                tracing::warn!(%error, attempt, delay_ms, "synthesis call failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                last_error = Some(error);
            }
            Err(error) => return Err(error.into()),
        }
    }
    Err(last_error.expect("loop always sets last_error before exhausting attempts").into())
}
