//! Exercises the full study run across crate boundaries: a file-backed
//! `SqliteStore`, the Browser Pool, the Navigator, the Analyzer/Synthesizer,
//! and the Job Queue Adapter, wired together exactly the way `uxr-cli`
//! wires them, but against fakes instead of a real browser/LLM backend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use uxr_browser::{
    BrowserActionError, BrowserActionRequest, BrowserDriver, BrowserPool, BrowserProvider, Lease,
    PageObservation,
};
use uxr_core::{BlobStore, BrowserMode, EntityId, FsBlobStore};
use uxr_live::{LiveStateStore, ProgressBus};
use uxr_llm::{LlmCallResult, LlmClient, LlmClientError, LlmUsage};
use uxr_navigator::NavigatorConfig;
use uxr_orchestrator::{DriverFactory, Orchestrator};
use uxr_queue::{check_schedules_task, run_study_task, StudyRunner};
use uxr_store::{DevicePreference, PersonaProfile, Schedule, ScheduleStatus, SqliteStore, StudyStatus};

struct LocalProvider;

#[async_trait]
impl BrowserProvider for LocalProvider {
    async fn acquire_local(&self, _session_id: EntityId) -> Result<()> {
        Ok(())
    }

    async fn acquire_cloud(&self, _session_id: EntityId) -> Result<String> {
        Ok("https://live.example.com/view".to_string())
    }
}

#[derive(Default)]
struct OneShotDriver {
    actions: AtomicUsize,
}

#[async_trait]
impl BrowserDriver for OneShotDriver {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<PageObservation, BrowserActionError> {
        Ok(PageObservation { url: url.to_string(), title: "Checkout".into(), ..Default::default() })
    }

    async fn act(&mut self, _request: &BrowserActionRequest) -> Result<PageObservation, BrowserActionError> {
        self.actions.fetch_add(1, Ordering::SeqCst);
        Ok(PageObservation::default())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserActionError> {
        Ok(vec![0xFFu8; 32])
    }

    async fn observe(&mut self) -> Result<PageObservation, BrowserActionError> {
        Ok(PageObservation::default())
    }

    async fn close(&mut self) -> Result<(), BrowserActionError> {
        Ok(())
    }
}

struct OneShotDriverFactory;

#[async_trait]
impl DriverFactory for OneShotDriverFactory {
    async fn create_driver(&self, _lease: &Lease) -> Result<Box<dyn BrowserDriver>> {
        Ok(Box::new(OneShotDriver::default()))
    }
}

struct ScriptedLlm;

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn plan_study(&self, _url: &str, _goal: &str) -> Result<LlmCallResult, LlmClientError> {
        unimplemented!("not exercised by this round trip")
    }

    async fn generate_persona(&self, _study_context: &Value) -> Result<LlmCallResult, LlmClientError> {
        unimplemented!("not exercised by this round trip")
    }

    async fn navigate_decision(&self, _screenshot: &[u8], _context: &Value) -> Result<LlmCallResult, LlmClientError> {
        Ok(LlmCallResult {
            value: json!({
                "think_aloud": "The checkout button is right there, I'll click it.",
                "emotional_state": "confident",
                "action": {"type": "click", "selector": "#checkout", "value": null, "description": "click checkout"},
                "confidence": 0.9,
                "task_progress": 100,
                "ux_issues": [],
            }),
            usage: LlmUsage { input_tokens: 120, output_tokens: 40 },
        })
    }

    async fn analyze_screenshot(&self, _screenshot: &[u8], _context: &Value) -> Result<LlmCallResult, LlmClientError> {
        Ok(LlmCallResult {
            value: json!({
                "issues": [{
                    "element": "#checkout",
                    "description": "Checkout button label is ambiguous",
                    "severity": "minor",
                    "issue_type": "ux",
                }],
            }),
            usage: LlmUsage { input_tokens: 200, output_tokens: 60 },
        })
    }

    async fn synthesize_study(&self, _study_context: &Value) -> Result<LlmCallResult, LlmClientError> {
        Ok(LlmCallResult {
            value: json!({
                "overall_ux_score": 72,
                "executive_summary": "Checkout flow is usable with minor labeling issues.",
                "universal_issues": [],
                "persona_specific_findings": [],
                "recommendations": ["Clarify the checkout button label."],
            }),
            usage: LlmUsage { input_tokens: 300, output_tokens: 150 },
        })
    }

    async fn generate_fix_suggestion(&self, _issue_context: &Value) -> Result<LlmCallResult, LlmClientError> {
        unimplemented!("not exercised by this round trip")
    }
}

fn build_orchestrator(db_path: &PathBuf, blob_root: &PathBuf) -> (Arc<SqliteStore>, Orchestrator<LocalProvider>) {
    let store = Arc::new(SqliteStore::open(db_path).expect("open store"));
    let pool = Arc::new(BrowserPool::new(LocalProvider, 2, Duration::from_secs(60), Duration::from_secs(5)));
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        pool,
        Arc::new(OneShotDriverFactory),
        Arc::new(ScriptedLlm),
        Arc::new(FsBlobStore::new(blob_root.clone())) as Arc<dyn BlobStore>,
        Arc::new(LiveStateStore::new()),
        Arc::new(ProgressBus::new()),
        NavigatorConfig::default(),
        BrowserMode::Local,
    );
    (store, orchestrator)
}

fn sample_persona_profile() -> PersonaProfile {
    PersonaProfile {
        name: "Busy Parent".into(),
        emoji: "\u{1F6D2}".into(),
        tech_literacy: 4,
        patience: 3,
        reading_speed: 5,
        trust: 6,
        goals: vec!["buy diapers before nap time".into()],
        frustrations: vec!["too many steps at checkout".into()],
        accessibility_needs: vec![],
        device_preference: DevicePreference::Desktop,
    }
}

#[tokio::test]
async fn integration_run_study_task_persists_sessions_issues_and_insights() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let db_path = tempdir.path().join("studies.db");
    let blob_root = tempdir.path().join("blobs");
    let (store, orchestrator) = build_orchestrator(&db_path, &blob_root);

    let study = store.create_study("https://shop.example.com", "/", None).expect("create study");
    store.create_task(study.id, "buy a pack of diapers", 0).expect("create task");
    store
        .create_persona(study.id, None, &sample_persona_profile(), "fake-model")
        .expect("create persona");

    run_study_task(&orchestrator, study.id, None, Duration::from_secs(10))
        .await
        .expect("study run should complete");

    let reloaded = store.get_study(study.id).expect("get study").expect("study present");
    assert_eq!(reloaded.status, StudyStatus::Complete);
    assert_eq!(reloaded.overall_score, Some(72));

    let sessions = store.list_sessions(study.id).expect("list sessions");
    assert_eq!(sessions.len(), 1);
    let steps = store.list_steps(sessions[0].id).expect("list steps");
    assert!(!steps.is_empty(), "navigator should have recorded at least one step");

    let issues = store.list_issues(study.id).expect("list issues");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].description, "Checkout button label is ambiguous");
}

#[tokio::test]
async fn integration_check_schedules_task_drives_a_full_run_through_the_queue() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let db_path = tempdir.path().join("studies.db");
    let blob_root = tempdir.path().join("blobs");
    let (store, orchestrator) = build_orchestrator(&db_path, &blob_root);

    let schedule = Schedule {
        id: EntityId::new(),
        name: "nightly checkout scan".into(),
        url: "https://shop.example.com".into(),
        starting_path: "/".into(),
        tasks: vec!["buy a pack of diapers".into()],
        persona_template_ids: vec![],
        cron_expression: "0 0 * * * *".into(),
        timezone: "UTC".into(),
        status: ScheduleStatus::Active,
        last_run_at: None,
        next_run_at: None,
        last_study_id: None,
        run_count: 0,
        created_at: chrono::Utc::now(),
    };
    store.create_schedule(&schedule).expect("create schedule");

    let triggered = check_schedules_task(&store, &orchestrator).await.expect("check schedules");
    assert_eq!(triggered.len(), 1);

    let study = store.get_study(triggered[0]).expect("get study").expect("study present");
    // The triggered study has no persona or task created by the schedule tick
    // itself (that is the orchestrator's own `plan_study`/`generate_persona`
    // seam, out of scope here); the Orchestrator still reaches a terminal
    // state because step 4's reuse-or-create logic tolerates zero personas.
    assert!(study.status.is_terminal());
}
