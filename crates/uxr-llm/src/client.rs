//! The LLM client contract (§6): a capability set the Navigator, Analyzer,
//! and Synthesizer call against. Contract only — no concrete vendor
//! transport lives here; callers supply an `LlmClient` implementation.

use async_trait::async_trait;
use jsonschema::validator_for;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmClientError {
    #[error("llm call '{operation}' failed: {message}")]
    Provider { operation: String, message: String },
    #[error("llm call '{operation}' was rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { operation: String, retry_after_ms: Option<u64> },
    #[error("llm call '{operation}' returned a response that could not be parsed or repaired: {source}")]
    Unparseable { operation: String, source: String },
    #[error("llm response for '{operation}' failed schema validation: {message}")]
    SchemaInvalid { operation: String, message: String },
}

/// Validates `value` against `schema`, surfacing the first error with the
/// calling operation's name for context.
pub fn validate_against_schema(operation: &str, schema: &Value, value: &Value) -> Result<(), LlmClientError> {
    let validator = validator_for(schema).map_err(|error| LlmClientError::SchemaInvalid {
        operation: operation.to_string(),
        message: format!("invalid schema: {error}"),
    })?;
    if let Some(first_error) = validator.iter_errors(value).next() {
        return Err(LlmClientError::SchemaInvalid {
            operation: operation.to_string(),
            message: first_error.to_string(),
        });
    }
    Ok(())
}

/// Token usage reported alongside every LLM call, for `CostTracker::record_llm_usage`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LlmCallResult {
    pub value: Value,
    pub usage: LlmUsage,
}

/// Capability set backing the Orchestrator (`plan_study`, `generate_persona`,
/// `generate_fix_suggestion`), Navigator (`navigate_decision`), Analyzer
/// (`analyze_screenshot`), and Synthesizer (`synthesize_study`). Every
/// operation returns a schema-validated structured value — implementations
/// are expected to run their raw text response through the tolerant JSON
/// pipeline (`json_repair::parse_json_response`) before returning.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn plan_study(&self, url: &str, goal: &str) -> Result<LlmCallResult, LlmClientError>;

    async fn generate_persona(&self, study_context: &Value) -> Result<LlmCallResult, LlmClientError>;

    /// `context` carries `{persona_profile, task, prior_steps_summary,
    /// current_observation}`; `screenshot` is the current page capture.
    async fn navigate_decision(&self, screenshot: &[u8], context: &Value) -> Result<LlmCallResult, LlmClientError>;

    async fn analyze_screenshot(&self, screenshot: &[u8], context: &Value) -> Result<LlmCallResult, LlmClientError>;

    async fn synthesize_study(&self, study_context: &Value) -> Result<LlmCallResult, LlmClientError>;

    async fn generate_fix_suggestion(&self, issue_context: &Value) -> Result<LlmCallResult, LlmClientError>;
}
