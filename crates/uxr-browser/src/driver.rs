//! The browser-driver external capability: a typed action request/result
//! pair plus the async trait the Navigator dispatches actions through.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserActionKind {
    Click,
    Fill,
    Select,
    Scroll,
    Wait,
    Goto,
    Back,
    Submit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserActionRequest {
    pub kind: BrowserActionKind,
    pub selector: Option<String>,
    pub value: Option<String>,
    pub timeout: Duration,
}

impl BrowserActionRequest {
    pub fn goto(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: BrowserActionKind::Goto,
            selector: None,
            value: Some(url.into()),
            timeout,
        }
    }
}

/// Observed page state returned after a successful action, enough for the
/// Navigator's observe phase and the passive detectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageObservation {
    pub url: String,
    pub title: String,
    pub visible_text: String,
    pub visible_selectors: Vec<String>,
    pub viewport_w: u32,
    pub viewport_h: u32,
    pub scroll_y: f64,
    pub max_scroll_y: f64,
    pub load_time_ms: Option<u64>,
    pub first_paint_ms: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserActionError {
    #[error("browser action timed out after {0:?}")]
    Timeout(Duration),
    #[error("browser action failed: {0}")]
    Failed(String),
}

impl BrowserActionError {
    /// Matches the Navigator's retry-eligibility classification (§4.2):
    /// only timeouts are retried, hard failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Capability set required of any concrete browser backend (a real
/// Chromium/Playwright-driven session, or an in-memory fake for tests).
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<PageObservation, BrowserActionError>;
    async fn act(&mut self, request: &BrowserActionRequest) -> Result<PageObservation, BrowserActionError>;
    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserActionError>;
    async fn observe(&mut self) -> Result<PageObservation, BrowserActionError>;
    async fn close(&mut self) -> Result<(), BrowserActionError>;
}
