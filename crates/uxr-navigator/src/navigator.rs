//! The Navigator (§4.2): drives one browser context through a
//! decide→act→observe loop to attempt a task as a specific persona, and
//! returns a terminal verdict.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::time::{sleep, timeout};
use uxr_browser::{
    detect_blockers, dismiss_cookie_consent, BrowserActionError, BrowserActionKind, BrowserActionRequest,
    BrowserDriver, PageObservation,
};
use uxr_core::EntityId;
use uxr_llm::{next_backoff_ms_with_jitter, LlmClient};
use uxr_store::{ActionType, EmotionalState, PersonaProfile, Step, StepAction};

use crate::decision::{DecisionAction, NavigatorDecision};
use crate::emotional_arc::peak_frustration_page;
use crate::step_recorder::StepRecorder;
use crate::visual_diff::{l1_pixel_diff, StuckGuard};

pub const MAX_STEPS_PER_SESSION_DEFAULT: u32 = 30;
pub const PER_ACTION_TIMEOUT_MS_DEFAULT: u64 = 15_000;
pub const ACTION_RETRIES_DEFAULT: u32 = 1;
pub const SESSION_TIMEOUT_SECONDS_DEFAULT: u64 = 600;

#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    pub max_steps: u32,
    pub per_action_timeout: Duration,
    pub action_retries: u32,
    pub session_timeout: Duration,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            max_steps: MAX_STEPS_PER_SESSION_DEFAULT,
            per_action_timeout: Duration::from_millis(PER_ACTION_TIMEOUT_MS_DEFAULT),
            action_retries: ACTION_RETRIES_DEFAULT,
            session_timeout: Duration::from_secs(SESSION_TIMEOUT_SECONDS_DEFAULT),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub task_completed: bool,
    pub gave_up: bool,
    pub total_steps: u32,
    pub summary: String,
    pub emotional_arc: Vec<EmotionalState>,
    pub peak_frustration_page: Option<String>,
    pub error: Option<String>,
}

struct Terminal {
    task_completed: bool,
    gave_up: bool,
    summary: String,
    error: Option<String>,
}

/// Accumulates progress across the session loop outside the timed-out
/// future so a session timeout still yields the steps taken so far.
#[derive(Default)]
struct Progress {
    total_steps: u32,
    emotional_arc: Vec<(String, EmotionalState)>,
    last_page_url: String,
}

fn to_browser_action(action: &DecisionAction, request_timeout: Duration) -> Option<BrowserActionRequest> {
    let kind = match action.action_type {
        ActionType::Click => BrowserActionKind::Click,
        ActionType::Fill => BrowserActionKind::Fill,
        ActionType::Select => BrowserActionKind::Select,
        ActionType::Scroll => BrowserActionKind::Scroll,
        ActionType::Wait => BrowserActionKind::Wait,
        ActionType::Goto => BrowserActionKind::Goto,
        ActionType::Back => BrowserActionKind::Back,
        ActionType::Submit => BrowserActionKind::Submit,
        ActionType::GiveUp | ActionType::Done => return None,
    };
    Some(BrowserActionRequest { kind, selector: action.selector.clone(), value: action.value.clone(), timeout: request_timeout })
}

async fn goto_with_retry(
    driver: &mut dyn BrowserDriver,
    url: &str,
    config: &NavigatorConfig,
) -> Result<PageObservation, BrowserActionError> {
    let mut attempt = 0;
    loop {
        match driver.goto(url, config.per_action_timeout).await {
            Ok(observation) => return Ok(observation),
            Err(error) if error.is_retryable() && attempt < config.action_retries => {
                sleep(Duration::from_millis(next_backoff_ms_with_jitter(attempt as usize, true))).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn act_with_retry(
    driver: &mut dyn BrowserDriver,
    request: &BrowserActionRequest,
    config: &NavigatorConfig,
) -> Result<PageObservation, BrowserActionError> {
    let mut attempt = 0;
    loop {
        match driver.act(request).await {
            Ok(observation) => return Ok(observation),
            Err(error) if error.is_retryable() && attempt < config.action_retries => {
                sleep(Duration::from_millis(next_backoff_ms_with_jitter(attempt as usize, true))).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Best-effort, ordered consent-dialog dismissal. Failures are silent: a
/// misclick on an unrecognized dialog is not worth aborting the session for.
async fn attempt_cookie_consent(driver: &mut dyn BrowserDriver, observation: &PageObservation, timeout: Duration) {
    if let Some(selector) = dismiss_cookie_consent(&observation.visible_selectors) {
        let request = BrowserActionRequest {
            kind: BrowserActionKind::Click,
            selector: Some(selector.to_string()),
            value: None,
            timeout,
        };
        let _ = driver.act(&request).await;
    }
}

#[allow(clippy::too_many_arguments)]
fn build_step(
    session_id: EntityId,
    step_number: u32,
    observation: &PageObservation,
    decision: &NavigatorDecision,
) -> Step {
    Step {
        id: EntityId::new(),
        session_id,
        step_number,
        page_url: observation.url.clone(),
        page_title: Some(observation.title.clone()),
        screenshot_ref: None,
        think_aloud: decision.think_aloud.clone(),
        action: StepAction {
            action_type: decision.action.action_type,
            selector: decision.action.selector.clone(),
            value: decision.action.value.clone(),
            description: decision.action.description.clone(),
        },
        confidence: decision.confidence,
        task_progress: decision.task_progress,
        emotional_state: decision.emotional_state,
        click_x: None,
        click_y: None,
        viewport_w: Some(observation.viewport_w),
        viewport_h: Some(observation.viewport_h),
        scroll_y: Some(observation.scroll_y),
        max_scroll_y: Some(observation.max_scroll_y),
        load_time_ms: observation.load_time_ms,
        first_paint_ms: observation.first_paint_ms,
    }
}

#[allow(clippy::too_many_arguments)]
async fn navigate_inner(
    session_id: EntityId,
    study_id: EntityId,
    persona: &PersonaProfile,
    task: &str,
    start_url: &str,
    driver: &mut dyn BrowserDriver,
    llm: &dyn LlmClient,
    recorder: &StepRecorder<'_>,
    config: &NavigatorConfig,
    progress: &mut Progress,
) -> Result<Terminal> {
    let mut last_observation = goto_with_retry(driver, start_url, config)
        .await
        .context("initial navigation failed")?;
    progress.last_page_url = last_observation.url.clone();
    attempt_cookie_consent(driver, &last_observation, config.per_action_timeout).await;

    let mut last_screenshot: Option<Vec<u8>> = None;
    let mut stuck_guard = StuckGuard::new();
    let mut prior_steps_summary: Vec<String> = Vec::new();

    for step_number in 1..=config.max_steps {
        let screenshot = driver.screenshot().await.map_err(|error| anyhow::anyhow!("screenshot capture failed: {error}"))?;
        let stuck_signal = match &last_screenshot {
            Some(previous) => stuck_guard.observe(l1_pixel_diff(previous, &screenshot)),
            None => false,
        };
        last_screenshot = Some(screenshot.clone());

        let decision_context = json!({
            "persona_profile": persona,
            "task": task,
            "prior_steps_summary": prior_steps_summary,
            "current_observation": last_observation,
            "stuck_signal": stuck_signal,
        });

        let call_result = llm
            .navigate_decision(&screenshot, &decision_context)
            .await
            .map_err(|error| anyhow::anyhow!("navigate_decision call failed: {error}"))?;
        let decision: NavigatorDecision = serde_json::from_value(call_result.value)
            .context("navigator decision did not match the expected shape")?;

        let action_request = to_browser_action(&decision.action, config.per_action_timeout);
        let (new_observation, action_error) = match &action_request {
            Some(request) => match act_with_retry(driver, request, config).await {
                Ok(observation) => (observation, None),
                Err(error) => (last_observation.clone(), Some(error)),
            },
            None => (last_observation.clone(), None),
        };

        if let Some(error) = action_error {
            return Ok(Terminal {
                task_completed: false,
                gave_up: false,
                summary: format!("action failed after retries on step {step_number}: {error}"),
                error: Some(error.to_string()),
            });
        }

        progress.total_steps = step_number;
        progress.emotional_arc.push((new_observation.url.clone(), decision.emotional_state));
        progress.last_page_url = new_observation.url.clone();
        prior_steps_summary.push(
            decision
                .action
                .description
                .clone()
                .unwrap_or_else(|| format!("{:?}", decision.action.action_type)),
        );

        let step = build_step(session_id, step_number, &new_observation, &decision);
        recorder
            .record(study_id, Some(&screenshot), step)
            .context("failed to persist step")?;

        if let Some(blocker) = detect_blockers(
            &new_observation.url,
            start_url,
            &new_observation.visible_text,
            &new_observation.visible_selectors,
        ) {
            return Ok(Terminal {
                task_completed: false,
                gave_up: true,
                summary: format!("gave up: detected {} at {}", blocker.as_str(), new_observation.url),
                error: None,
            });
        }

        if decision.is_give_up() {
            return Ok(Terminal {
                task_completed: false,
                gave_up: true,
                summary: "gave up: model emitted give_up".to_string(),
                error: None,
            });
        }
        if decision.is_done() {
            return Ok(Terminal { task_completed: true, gave_up: false, summary: "task completed".to_string(), error: None });
        }
        if step_number == config.max_steps {
            return Ok(Terminal {
                task_completed: false,
                gave_up: true,
                summary: "gave up: exhausted step budget".to_string(),
                error: None,
            });
        }

        last_observation = new_observation;
        attempt_cookie_consent(driver, &last_observation, config.per_action_timeout).await;
    }

    unreachable!("the loop above always returns before the range is exhausted")
}

/// `NavigateSession(session_id, persona, task, start_url, browser_ctx, session_timeout)`.
#[allow(clippy::too_many_arguments)]
pub async fn navigate_session(
    session_id: EntityId,
    study_id: EntityId,
    persona: &PersonaProfile,
    task: &str,
    start_url: &str,
    driver: &mut dyn BrowserDriver,
    llm: &dyn LlmClient,
    recorder: &StepRecorder<'_>,
    config: &NavigatorConfig,
) -> Result<NavigationResult> {
    let mut progress = Progress::default();

    let outcome = timeout(
        config.session_timeout,
        navigate_inner(session_id, study_id, persona, task, start_url, driver, llm, recorder, config, &mut progress),
    )
    .await;

    let emotional_arc: Vec<EmotionalState> = progress.emotional_arc.iter().map(|(_, state)| *state).collect();
    let peak_page = peak_frustration_page(&progress.emotional_arc);

    Ok(match outcome {
        Ok(Ok(terminal)) => NavigationResult {
            task_completed: terminal.task_completed,
            gave_up: terminal.gave_up,
            total_steps: progress.total_steps,
            summary: terminal.summary,
            emotional_arc,
            peak_frustration_page: peak_page,
            error: terminal.error,
        },
        Ok(Err(error)) => NavigationResult {
            task_completed: false,
            gave_up: false,
            total_steps: progress.total_steps,
            summary: format!("navigation failed: {error}"),
            emotional_arc,
            peak_frustration_page: peak_page,
            error: Some(error.to_string()),
        },
        Err(_elapsed) => NavigationResult {
            task_completed: false,
            gave_up: true,
            total_steps: progress.total_steps,
            summary: format!("gave up: timed out after {} steps on {}", progress.total_steps, progress.last_page_url),
            emotional_arc,
            peak_frustration_page: peak_page,
            error: None,
        },
    })
}
