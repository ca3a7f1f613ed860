//! The external-collaborator seam (raw LLM/vendor transport, real browser
//! automation) is out of scope for this crate: it is a contract the core
//! consumes, not something this repo implements. These adapters satisfy the
//! `BrowserProvider`, `DriverFactory`, and `LlmClient` traits with a clear,
//! immediate error so a host binary that wires this crate in without
//! supplying a real backend fails loudly at first use rather than hanging.

use anyhow::{bail, Result};
use async_trait::async_trait;
use uxr_browser::{BrowserDriver, BrowserProvider, Lease};
use uxr_core::EntityId;
use uxr_llm::{LlmCallResult, LlmClient, LlmClientError};
use uxr_orchestrator::DriverFactory;
use serde_json::Value;

pub struct UnconfiguredBrowserProvider;

#[async_trait]
impl BrowserProvider for UnconfiguredBrowserProvider {
    async fn acquire_local(&self, _session_id: EntityId) -> Result<()> {
        bail!("no local browser backend is wired into this binary")
    }

    async fn acquire_cloud(&self, _session_id: EntityId) -> Result<String> {
        bail!("no cloud browser backend is wired into this binary")
    }
}

pub struct UnconfiguredDriverFactory;

#[async_trait]
impl DriverFactory for UnconfiguredDriverFactory {
    async fn create_driver(&self, _lease: &Lease) -> Result<Box<dyn BrowserDriver>> {
        bail!("no browser driver backend is wired into this binary")
    }
}

pub struct UnconfiguredLlmClient;

impl UnconfiguredLlmClient {
    fn unavailable(operation: &str) -> LlmClientError {
        LlmClientError::Provider {
            operation: operation.to_string(),
            message: "no LLM backend is wired into this binary".to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for UnconfiguredLlmClient {
    async fn plan_study(&self, _url: &str, _goal: &str) -> Result<LlmCallResult, LlmClientError> {
        Err(Self::unavailable("plan_study"))
    }

    async fn generate_persona(&self, _study_context: &Value) -> Result<LlmCallResult, LlmClientError> {
        Err(Self::unavailable("generate_persona"))
    }

    async fn navigate_decision(&self, _screenshot: &[u8], _context: &Value) -> Result<LlmCallResult, LlmClientError> {
        Err(Self::unavailable("navigate_decision"))
    }

    async fn analyze_screenshot(&self, _screenshot: &[u8], _context: &Value) -> Result<LlmCallResult, LlmClientError> {
        Err(Self::unavailable("analyze_screenshot"))
    }

    async fn synthesize_study(&self, _study_context: &Value) -> Result<LlmCallResult, LlmClientError> {
        Err(Self::unavailable("synthesize_study"))
    }

    async fn generate_fix_suggestion(&self, _issue_context: &Value) -> Result<LlmCallResult, LlmClientError> {
        Err(Self::unavailable("generate_fix_suggestion"))
    }
}
