//! The Study Orchestrator (§4.1): the top-level run loop that drives a study
//! from `setup` through `running`/`analyzing` to `complete`, fanning sessions
//! out across the browser pool and folding their results through the
//! Analyzer, Prioritizer, and Synthesizer.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::task::JoinSet;
use uxr_analysis::{analyze_session, page_url_for_key, prioritize_study_issues, synthesize_study, to_durable_issue};
use uxr_browser::BrowserPool;
use uxr_browser::BrowserProvider;
use uxr_core::{BlobStore, BrowserMode, EntityId};
use uxr_live::{LiveStateStore, ProgressBus, ProgressEvent};
use uxr_llm::{CostTracker, LlmClient};
use uxr_navigator::{navigate_session, NavigatorConfig, StepRecorder};
use uxr_store::{Insight, InsightType, Persona, Session, SessionStatus, SqliteStore, Study, StudyStatus, Task};

use crate::driver_factory::DriverFactory;

const PERCENT_LAUNCH: f64 = 0.0;
const PERCENT_NAVIGATION_START: f64 = 5.0;
const PERCENT_NAVIGATION_END: f64 = 85.0;
const PERCENT_ANALYSIS_END: f64 = 95.0;
const PERCENT_COMPLETE: f64 = 100.0;

/// Everything one study run needs, shared read-only (behind `Arc`) across the
/// concurrent session tasks fanned out in step 6.
pub struct Orchestrator<P: BrowserProvider> {
    store: Arc<SqliteStore>,
    pool: Arc<BrowserPool<P>>,
    driver_factory: Arc<dyn DriverFactory>,
    llm: Arc<dyn LlmClient>,
    blob_store: Arc<dyn BlobStore>,
    live_state: Arc<LiveStateStore>,
    progress_bus: Arc<ProgressBus>,
    navigator_config: NavigatorConfig,
    default_browser_mode: BrowserMode,
}

impl<P: BrowserProvider + 'static> Orchestrator<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SqliteStore>,
        pool: Arc<BrowserPool<P>>,
        driver_factory: Arc<dyn DriverFactory>,
        llm: Arc<dyn LlmClient>,
        blob_store: Arc<dyn BlobStore>,
        live_state: Arc<LiveStateStore>,
        progress_bus: Arc<ProgressBus>,
        navigator_config: NavigatorConfig,
        default_browser_mode: BrowserMode,
    ) -> Self {
        Self {
            store,
            pool,
            driver_factory,
            llm,
            blob_store,
            live_state,
            progress_bus,
            navigator_config,
            default_browser_mode,
        }
    }

    /// Runs a study end to end. Idempotent on an already-terminal study
    /// (step 1). Steps 1-4 and 7-11 propagate their error to the caller
    /// after persisting `failed` and publishing `StudyError`; Navigator
    /// failures inside step 6 are contained to their own session.
    pub async fn run_study(&self, study_id: EntityId, browser_mode_override: Option<BrowserMode>) -> Result<()> {
        match self.run_study_inner(study_id, browser_mode_override).await {
            Ok(()) => Ok(()),
            Err(error) => {
                let message = error.to_string();
                if let Err(store_error) = self.store.mark_study_failed(study_id, &message) {
                    tracing::error!(%study_id, %store_error, "failed to persist study failure");
                }
                self.progress_bus.publish(study_id, ProgressEvent::StudyError { message });
                Err(error)
            }
        }
    }

    async fn run_study_inner(&self, study_id: EntityId, browser_mode_override: Option<BrowserMode>) -> Result<()> {
        let study = self
            .store
            .get_study(study_id)?
            .with_context(|| format!("study {study_id} not found"))?;
        if study.status.is_terminal() {
            return Ok(());
        }

        self.live_state.clear_study(study_id);

        self.store.transition_study_status(study_id, StudyStatus::Running)?;
        self.store.mark_study_started(study_id)?;
        self.progress_bus.publish(study_id, ProgressEvent::StudyProgress { percent: PERCENT_LAUNCH });

        let tasks = self.store.list_tasks(study_id)?;
        let personas = self.store.list_personas(study_id)?;
        let sessions = self.build_session_list(study_id, &tasks, &personas)?;

        let browser_mode = browser_mode_override.unwrap_or(self.default_browser_mode);

        self.run_sessions(&study, &sessions, &personas, &tasks, browser_mode).await?;

        self.store.transition_study_status(study_id, StudyStatus::Analyzing)?;
        self.progress_bus.publish(study_id, ProgressEvent::StudyAnalyzing);

        let cost_breakdown = self.analyze_and_synthesize(&study, &personas).await?;

        self.store.mark_study_complete(
            study_id,
            cost_breakdown.0,
            &cost_breakdown.1,
            &cost_breakdown.2,
        )?;
        self.store.transition_study_status(study_id, StudyStatus::Complete)?;
        self.progress_bus.publish(study_id, ProgressEvent::StudyComplete);

        Ok(())
    }

    /// Step 4: reuses any `pending`/`failed` session for a (persona, task)
    /// pair, creating a fresh one otherwise.
    fn build_session_list(&self, study_id: EntityId, tasks: &[Task], personas: &[Persona]) -> Result<Vec<Session>> {
        let existing = self.store.list_sessions(study_id)?;
        let mut sessions = Vec::with_capacity(tasks.len() * personas.len());
        for persona in personas {
            for task in tasks {
                let reusable = existing.iter().find(|session| {
                    session.persona_id == persona.id
                        && session.task_id == task.id
                        && matches!(session.status, SessionStatus::Pending | SessionStatus::Failed)
                });
                let session = match reusable {
                    Some(session) => session.clone(),
                    None => self.store.create_session(study_id, persona.id, task.id)?,
                };
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Step 5-6: picks a browser mode, then fans sessions out under the
    /// pool's own bounded semaphore, joining every task regardless of
    /// individual outcome (a failed session never aborts its siblings).
    async fn run_sessions(
        &self,
        study: &Study,
        sessions: &[Session],
        personas: &[Persona],
        tasks: &[Task],
        browser_mode: BrowserMode,
    ) -> Result<()> {
        let total = sessions.len() as u32;
        let completed = Arc::new(AtomicU32::new(0));
        let start_url = build_start_url(study);
        let mut joins = JoinSet::new();

        for session in sessions {
            let persona = personas
                .iter()
                .find(|persona| persona.id == session.persona_id)
                .with_context(|| format!("session {} references unknown persona", session.id))?
                .clone();
            let task = tasks
                .iter()
                .find(|task| task.id == session.task_id)
                .with_context(|| format!("session {} references unknown task", session.id))?
                .clone();

            let store = Arc::clone(&self.store);
            let pool = Arc::clone(&self.pool);
            let driver_factory = Arc::clone(&self.driver_factory);
            let llm = Arc::clone(&self.llm);
            let blob_store = Arc::clone(&self.blob_store);
            let live_state = Arc::clone(&self.live_state);
            let progress_bus = Arc::clone(&self.progress_bus);
            let navigator_config = self.navigator_config.clone();
            let completed = Arc::clone(&completed);
            let study_id = study.id;
            let session = session.clone();
            let start_url = start_url.clone();

            joins.spawn(async move {
                let outcome = run_one_session(
                    &store,
                    &pool,
                    driver_factory.as_ref(),
                    llm.as_ref(),
                    blob_store.as_ref(),
                    &live_state,
                    &progress_bus,
                    &navigator_config,
                    study_id,
                    &session,
                    &persona,
                    &task,
                    &start_url,
                    browser_mode,
                )
                .await;
                if let Err(error) = outcome {
                    tracing::warn!(session_id = %session.id, %error, "session failed, continuing with siblings");
                    if let Err(store_error) = store.finish_session(
                        session.id,
                        SessionStatus::Failed,
                        false,
                        &error.to_string(),
                        &[],
                        None,
                    ) {
                        tracing::error!(session_id = %session.id, %store_error, "failed to persist session failure");
                    }
                }
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let percent = if total == 0 {
                    PERCENT_NAVIGATION_END
                } else {
                    PERCENT_NAVIGATION_START
                        + (PERCENT_NAVIGATION_END - PERCENT_NAVIGATION_START) * (done as f64 / total as f64)
                };
                progress_bus.publish(study_id, ProgressEvent::StudyProgress { percent });
            });
        }

        while joins.join_next().await.is_some() {}
        Ok(())
    }

    /// Steps 8-11: analysis, prioritization, synthesis, and the cost
    /// breakdown, returned as `(overall_score, executive_summary, breakdown)`
    /// for the caller to persist via `mark_study_complete`.
    async fn analyze_and_synthesize(
        &self,
        study: &Study,
        personas: &[Persona],
    ) -> Result<(u8, String, uxr_store::CostBreakdown)> {
        let sessions = self.store.list_sessions(study.id)?;
        let mut cost_tracker = CostTracker::new();
        cost_tracker.set_browser_mode(self.default_browser_mode.as_str());

        let mut session_summaries = Vec::new();
        for session in &sessions {
            if !matches!(session.status, SessionStatus::Complete | SessionStatus::GaveUp) {
                continue;
            }
            if let Some(summary) = &session.summary {
                session_summaries.push(summary.clone());
            }

            let steps = self.store.list_steps(session.id)?;
            let persona_context = personas
                .iter()
                .find(|persona| persona.id == session.persona_id)
                .map(|persona| json!({ "profile": persona.profile }));
            let analysis = analyze_session(self.llm.as_ref(), self.blob_store.as_ref(), &steps, persona_context.as_ref())
                .await
                .with_context(|| format!("analysis failed for session {}", session.id))?;

            for (key, raw) in &analysis.deduplicated_issues {
                let Some(page_url) = page_url_for_key(&analysis.analyses, key) else {
                    tracing::warn!(session_id = %session.id, %key, "dropping issue with no resolvable page_url");
                    continue;
                };
                let mut issue = to_durable_issue(study.id, session.id, &page_url, raw);
                if let Some(schedule_id) = study.schedule_id {
                    if let Some(prior) = self.store.find_prior_issue_for_regression(
                        schedule_id,
                        study.id,
                        &page_url,
                        issue.element.as_deref().unwrap_or(""),
                        &issue.description,
                    )? {
                        issue.is_regression = true;
                        issue.times_seen = prior.times_seen + 1;
                    }
                }
                self.store.insert_issue(&issue)?;
            }
        }

        prioritize_study_issues(&self.store, study.id)?;
        self.progress_bus.publish(study.id, ProgressEvent::StudyProgress { percent: PERCENT_ANALYSIS_END });

        let tasks = self.store.list_tasks(study.id)?;
        let task_descriptions: Vec<String> = tasks.iter().map(|task| task.description.clone()).collect();
        let all_issues = self
            .store
            .list_issues(study.id)?
            .iter()
            .map(|issue| serde_json::to_value(issue).unwrap_or_default())
            .collect::<Vec<_>>();

        let synthesis = synthesize_study(self.llm.as_ref(), &study.url, &task_descriptions, &session_summaries, &all_issues)
            .await
            .context("study synthesis failed")?;

        let insights = build_insights(study.id, &synthesis);
        self.store.replace_insights(study.id, &insights)?;
        self.progress_bus.publish(study.id, ProgressEvent::StudyProgress { percent: PERCENT_COMPLETE });

        Ok((synthesis.overall_ux_score, synthesis.executive_summary, cost_tracker.get_breakdown()))
    }
}

/// Step 6 body for a single (persona, task) session: acquire a browser
/// context, run the Navigator, persist the outcome, release the context.
#[allow(clippy::too_many_arguments)]
async fn run_one_session(
    store: &SqliteStore,
    pool: &BrowserPool<impl BrowserProvider>,
    driver_factory: &dyn DriverFactory,
    llm: &dyn LlmClient,
    blob_store: &dyn BlobStore,
    live_state: &LiveStateStore,
    progress_bus: &ProgressBus,
    navigator_config: &NavigatorConfig,
    study_id: EntityId,
    session: &Session,
    persona: &Persona,
    task: &Task,
    start_url: &str,
    browser_mode: BrowserMode,
) -> Result<()> {
    let lease = pool
        .acquire(browser_mode, session.id)
        .await
        .with_context(|| format!("failed to acquire a browser context for session {}", session.id))?;
    if let Some(live_view_url) = &lease.live_view_url {
        live_state.upsert(
            study_id,
            session.id,
            uxr_live::LiveSessionState { live_view_url: Some(live_view_url.clone()), ..Default::default() },
        );
    }

    let mut driver = driver_factory.create_driver(&lease).await?;
    let recorder = StepRecorder::new(store, blob_store, live_state, progress_bus);

    let result = navigate_session(
        session.id,
        study_id,
        &persona.profile,
        &task.description,
        start_url,
        driver.as_mut(),
        llm,
        &recorder,
        navigator_config,
    )
    .await;

    let _ = driver.close().await;
    lease.release();

    let navigation = result?;
    let status = if navigation.error.is_some() {
        SessionStatus::Failed
    } else if navigation.gave_up {
        SessionStatus::GaveUp
    } else if navigation.task_completed {
        SessionStatus::Complete
    } else {
        SessionStatus::Failed
    };
    let summary = navigation.error.clone().unwrap_or(navigation.summary);
    store.finish_session(session.id, status, navigation.task_completed, &summary, &navigation.emotional_arc, None)?;
    progress_bus.publish(
        study_id,
        ProgressEvent::SessionComplete { session_id: session.id, outcome: status.as_str().to_string() },
    );
    Ok(())
}

fn build_start_url(study: &Study) -> String {
    let base = study.url.trim_end_matches('/');
    if study.starting_path.starts_with('/') {
        format!("{base}{}", study.starting_path)
    } else {
        format!("{base}/{}", study.starting_path)
    }
}

/// Step 10: maps the synthesizer's flat string lists into ranked `Insight`
/// rows, one `InsightType` bucket per list.
fn build_insights(study_id: EntityId, synthesis: &uxr_analysis::StudySynthesis) -> Vec<Insight> {
    let mut rank = 0u32;
    let mut insights = Vec::new();

    for title in &synthesis.universal_issues {
        insights.push(new_insight(study_id, InsightType::Universal, title, rank));
        rank += 1;
    }
    for title in &synthesis.persona_specific_findings {
        insights.push(new_insight(study_id, InsightType::PersonaSpecific, title, rank));
        rank += 1;
    }
    for title in &synthesis.recommendations {
        insights.push(new_insight(study_id, InsightType::Recommendation, title, rank));
        rank += 1;
    }
    insights
}

fn new_insight(study_id: EntityId, insight_type: InsightType, title: &str, rank: u32) -> Insight {
    Insight {
        id: EntityId::new(),
        study_id,
        insight_type,
        title: title.to_string(),
        description: title.to_string(),
        severity: None,
        impact: None,
        effort: None,
        personas_affected: vec![],
        evidence: vec![],
        rank,
    }
}

#[async_trait::async_trait]
impl<P: BrowserProvider + 'static> uxr_queue::StudyRunner for Orchestrator<P> {
    async fn run_study(&self, study_id: EntityId, browser_mode_override: Option<&str>) -> Result<()> {
        let mode = browser_mode_override.map(BrowserMode::from_str).transpose()?;
        self.run_study(study_id, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use uxr_browser::{BrowserActionError, BrowserActionRequest};
    use uxr_core::FsBlobStore;
    use uxr_llm::{LlmCallResult, LlmClientError, LlmUsage};
    use uxr_store::{DevicePreference, PersonaProfile};

    struct FakeProvider {
        fail_acquire: bool,
    }

    #[async_trait::async_trait]
    impl BrowserProvider for FakeProvider {
        async fn acquire_local(&self, _session_id: EntityId) -> anyhow::Result<()> {
            if self.fail_acquire {
                anyhow::bail!("simulated local provider outage");
            }
            Ok(())
        }

        async fn acquire_cloud(&self, _session_id: EntityId) -> anyhow::Result<String> {
            Ok("https://fake.example.com/view".to_string())
        }
    }

    #[derive(Default)]
    struct FakeDriver;

    #[async_trait::async_trait]
    impl uxr_browser::BrowserDriver for FakeDriver {
        async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<uxr_browser::PageObservation, BrowserActionError> {
            Ok(uxr_browser::PageObservation { url: url.to_string(), title: "home".to_string(), ..Default::default() })
        }
        async fn act(&mut self, _request: &BrowserActionRequest) -> Result<uxr_browser::PageObservation, BrowserActionError> {
            Ok(uxr_browser::PageObservation::default())
        }
        async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserActionError> {
            Ok(vec![1, 2, 3])
        }
        async fn observe(&mut self) -> Result<uxr_browser::PageObservation, BrowserActionError> {
            Ok(uxr_browser::PageObservation::default())
        }
        async fn close(&mut self) -> Result<(), BrowserActionError> {
            Ok(())
        }
    }

    struct FakeDriverFactory;

    #[async_trait::async_trait]
    impl DriverFactory for FakeDriverFactory {
        async fn create_driver(&self, _lease: &uxr_browser::Lease) -> Result<Box<dyn uxr_browser::BrowserDriver>> {
            Ok(Box::new(FakeDriver))
        }
    }

    struct FakeLlmClient {
        navigate_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LlmClient for FakeLlmClient {
        async fn plan_study(&self, _url: &str, _goal: &str) -> Result<LlmCallResult, LlmClientError> {
            unimplemented!()
        }
        async fn generate_persona(&self, _ctx: &Value) -> Result<LlmCallResult, LlmClientError> {
            unimplemented!()
        }
        async fn navigate_decision(&self, _screenshot: &[u8], _ctx: &Value) -> Result<LlmCallResult, LlmClientError> {
            self.navigate_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(LlmCallResult {
                value: json!({
                    "emotional_state": "satisfied",
                    "action": {"type": "done"},
                    "confidence": 0.9,
                    "task_progress": 100,
                    "ux_issues": [],
                }),
                usage: LlmUsage::default(),
            })
        }
        async fn analyze_screenshot(&self, _screenshot: &[u8], _ctx: &Value) -> Result<LlmCallResult, LlmClientError> {
            Ok(LlmCallResult { value: json!({"issues": []}), usage: LlmUsage::default() })
        }
        async fn synthesize_study(&self, _ctx: &Value) -> Result<LlmCallResult, LlmClientError> {
            Ok(LlmCallResult {
                value: json!({
                    "overall_ux_score": 80,
                    "executive_summary": "overall fine",
                    "universal_issues": [],
                    "persona_specific_findings": [],
                    "recommendations": ["add more automated coverage"],
                }),
                usage: LlmUsage::default(),
            })
        }
        async fn generate_fix_suggestion(&self, _ctx: &Value) -> Result<LlmCallResult, LlmClientError> {
            unimplemented!()
        }
    }

    fn sample_profile() -> PersonaProfile {
        PersonaProfile {
            name: "Impatient Irene".to_string(),
            emoji: "\u{1F624}".to_string(),
            tech_literacy: 60,
            patience: 20,
            reading_speed: 80,
            trust: 50,
            goals: vec!["buy a shirt".to_string()],
            frustrations: vec![],
            accessibility_needs: vec![],
            device_preference: DevicePreference::Desktop,
        }
    }

    fn build_orchestrator(fail_acquire: bool) -> Orchestrator<FakeProvider> {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
        let pool = Arc::new(BrowserPool::new(
            FakeProvider { fail_acquire },
            2,
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        let tempdir = tempfile::tempdir().expect("tempdir");
        Orchestrator::new(
            store,
            pool,
            Arc::new(FakeDriverFactory),
            Arc::new(FakeLlmClient { navigate_calls: AtomicUsize::new(0) }),
            Arc::new(FsBlobStore::new(tempdir.into_path())),
            Arc::new(LiveStateStore::new()),
            Arc::new(ProgressBus::new()),
            NavigatorConfig::default(),
            BrowserMode::Local,
        )
    }

    #[tokio::test]
    async fn integration_run_study_completes_and_persists_insights() {
        let orchestrator = build_orchestrator(false);
        let study = orchestrator.store.create_study("https://example.com", "/", None).expect("study");
        orchestrator.store.create_task(study.id, "buy a shirt", 0).expect("task");
        orchestrator
            .store
            .create_persona(study.id, None, &sample_profile(), "fake-model")
            .expect("persona");

        orchestrator.run_study(study.id, None).await.expect("run study");

        let reloaded = orchestrator.store.get_study(study.id).expect("load").expect("present");
        assert_eq!(reloaded.status, StudyStatus::Complete);
        assert_eq!(reloaded.overall_score, Some(80));

        let sessions = orchestrator.store.list_sessions(study.id).expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Complete);
        assert!(sessions[0].task_completed);
    }

    #[tokio::test]
    async fn regression_rerunning_a_complete_study_is_a_no_op() {
        let orchestrator = build_orchestrator(false);
        let study = orchestrator.store.create_study("https://example.com", "/", None).expect("study");
        orchestrator.store.create_task(study.id, "buy a shirt", 0).expect("task");
        orchestrator
            .store
            .create_persona(study.id, None, &sample_profile(), "fake-model")
            .expect("persona");

        orchestrator.run_study(study.id, None).await.expect("first run");
        orchestrator.run_study(study.id, None).await.expect("second run is a no-op");

        let sessions = orchestrator.store.list_sessions(study.id).expect("sessions");
        assert_eq!(sessions.len(), 1, "rerun must not duplicate sessions");
    }

    #[tokio::test]
    async fn functional_session_acquisition_failure_is_contained_to_its_session() {
        let orchestrator = build_orchestrator(true);
        let study = orchestrator.store.create_study("https://example.com", "/", None).expect("study");
        orchestrator.store.create_task(study.id, "buy a shirt", 0).expect("task");
        orchestrator
            .store
            .create_persona(study.id, None, &sample_profile(), "fake-model")
            .expect("persona");

        orchestrator.run_study(study.id, None).await.expect("study still completes");

        let reloaded = orchestrator.store.get_study(study.id).expect("load").expect("present");
        assert_eq!(reloaded.status, StudyStatus::Complete, "a failed session must not fail the whole study");

        let sessions = orchestrator.store.list_sessions(study.id).expect("sessions");
        assert_eq!(sessions[0].status, SessionStatus::Failed);
    }
}
