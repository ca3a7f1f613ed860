//! The LLM client contract, tolerant JSON extraction, retry/backoff, and
//! cost tracking shared by the Navigator, Analyzer, and Synthesizer.
pub mod client;
pub mod cost;
pub mod json_repair;
pub mod retry;

pub use client::{validate_against_schema, LlmCallResult, LlmClient, LlmClientError, LlmUsage};
pub use cost::{BrowserRateCard, CostTracker, LlmRateCard, StorageRateCard};
pub use json_repair::{extract_json_object, parse_json_response, repair_json, JsonRepairError};
pub use retry::{
    capped_backoff_ms, new_request_id, next_backoff_ms, next_backoff_ms_with_jitter, parse_retry_after_ms,
    provider_retry_delay_ms, retry_budget_allows_delay, should_retry_status,
};
