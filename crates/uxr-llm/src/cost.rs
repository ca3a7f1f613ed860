//! Accumulates per-study usage into the `CostBreakdown` persisted on the
//! Study row (§11.2). Rates follow the teacher's `*_cost_per_million`
//! per-token pricing idiom; browser and storage rates are flat per-unit.

use std::time::Instant;

use uxr_store::CostBreakdown;

/// Per-million-token USD pricing for a single navigate/analyze/synthesize
/// call class. Distinct LLM capabilities may use distinct rates in
/// principle; the tracker is given one rate set per study run.
#[derive(Debug, Clone, Copy)]
pub struct LlmRateCard {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl Default for LlmRateCard {
    fn default() -> Self {
        Self { input_cost_per_million: 3.0, output_cost_per_million: 15.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BrowserRateCard {
    pub cloud_cost_per_second: f64,
}

impl Default for BrowserRateCard {
    fn default() -> Self {
        Self { cloud_cost_per_second: 0.0025 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StorageRateCard {
    pub cost_per_mb: f64,
}

impl Default for StorageRateCard {
    fn default() -> Self {
        Self { cost_per_mb: 0.00002 }
    }
}

struct OpenBrowserSession {
    started_at: Instant,
}

/// Accumulates usage for a single study run. Not `Sync`-shared directly;
/// the orchestrator holds one tracker per study behind its own lock.
pub struct CostTracker {
    llm_rates: LlmRateCard,
    browser_rates: BrowserRateCard,
    storage_rates: StorageRateCard,
    llm_api_calls: u64,
    llm_input_tokens: u64,
    llm_output_tokens: u64,
    browser_mode: String,
    browser_sessions: u64,
    browser_time_seconds: f64,
    open_session: Option<OpenBrowserSession>,
    storage_screenshots: u64,
    storage_bytes: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self {
            llm_rates: LlmRateCard::default(),
            browser_rates: BrowserRateCard::default(),
            storage_rates: StorageRateCard::default(),
            llm_api_calls: 0,
            llm_input_tokens: 0,
            llm_output_tokens: 0,
            browser_mode: "local".to_string(),
            browser_sessions: 0,
            browser_time_seconds: 0.0,
            open_session: None,
            storage_screenshots: 0,
            storage_bytes: 0,
        }
    }

    pub fn with_rates(llm_rates: LlmRateCard, browser_rates: BrowserRateCard, storage_rates: StorageRateCard) -> Self {
        Self { llm_rates, browser_rates, storage_rates, ..Self::new() }
    }

    pub fn record_llm_usage(&mut self, input_tokens: u64, output_tokens: u64) {
        self.llm_api_calls += 1;
        self.llm_input_tokens += input_tokens;
        self.llm_output_tokens += output_tokens;
    }

    pub fn set_browser_mode(&mut self, mode: &str) {
        self.browser_mode = mode.to_string();
    }

    pub fn start_browser_session(&mut self) {
        self.browser_sessions += 1;
        self.open_session = Some(OpenBrowserSession { started_at: Instant::now() });
    }

    /// Ends the currently open session, if any. Safe to call without a
    /// matching `start_browser_session` (a no-op), matching the defensive
    /// shutdown idiom the teacher's session manager uses.
    pub fn end_browser_session(&mut self) {
        if let Some(session) = self.open_session.take() {
            self.browser_time_seconds += session.started_at.elapsed().as_secs_f64();
        }
    }

    pub fn record_screenshot(&mut self, bytes: u64) {
        self.storage_screenshots += 1;
        self.storage_bytes += bytes;
    }

    pub fn get_breakdown(&self) -> CostBreakdown {
        let llm_total_tokens = self.llm_input_tokens + self.llm_output_tokens;
        let llm_cost_usd = (self.llm_input_tokens as f64 / 1_000_000.0) * self.llm_rates.input_cost_per_million
            + (self.llm_output_tokens as f64 / 1_000_000.0) * self.llm_rates.output_cost_per_million;

        let is_cloud = self.browser_mode.eq_ignore_ascii_case("cloud");
        let browser_cost_usd = if is_cloud {
            self.browser_time_seconds * self.browser_rates.cloud_cost_per_second
        } else {
            0.0
        };
        // Local mode accrues no browser cost but is credited with the
        // cloud-equivalent spend it avoided.
        let savings_vs_cloud_usd = if is_cloud {
            0.0
        } else {
            self.browser_time_seconds * self.browser_rates.cloud_cost_per_second
        };

        let storage_size_mb = self.storage_bytes as f64 / (1024.0 * 1024.0);
        let storage_cost_usd = storage_size_mb * self.storage_rates.cost_per_mb;

        CostBreakdown {
            total_cost_usd: llm_cost_usd + browser_cost_usd + storage_cost_usd,
            llm_api_calls: self.llm_api_calls,
            llm_input_tokens: self.llm_input_tokens,
            llm_output_tokens: self.llm_output_tokens,
            llm_total_tokens,
            llm_cost_usd,
            browser_mode: self.browser_mode.clone(),
            browser_sessions: self.browser_sessions,
            browser_time_seconds: self.browser_time_seconds,
            browser_cost_usd,
            savings_vs_cloud_usd,
            storage_screenshots: self.storage_screenshots,
            storage_size_mb,
        }
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}
