//! The operator entrypoint: a thin clap front end over the store, queue, and
//! orchestrator. Business logic stays in the library crates; this module
//! only parses arguments and prints results.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uxr_browser::BrowserPool;
use uxr_core::{BlobStore, BrowserMode, Config, EntityId, FsBlobStore};
use uxr_live::{LiveStateStore, ProgressBus};
use uxr_navigator::NavigatorConfig;
use uxr_orchestrator::Orchestrator;
use uxr_queue::{check_schedules_task, run_study_task, StudyRunner};
use uxr_store::{Schedule, ScheduleStatus, SqliteStore};

use crate::backend::{UnconfiguredBrowserProvider, UnconfiguredDriverFactory, UnconfiguredLlmClient};

#[derive(Debug, Parser)]
#[command(name = "uxr", about = "Run and inspect automated UX research studies")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the SQLite store at DATA_DIR if it doesn't already exist.
    InitDb,
    /// Create a study with one task per `--task` flag.
    CreateStudy {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "/")]
        starting_path: String,
        #[arg(long = "task", required = true)]
        tasks: Vec<String>,
    },
    /// Print a study's status, tasks, sessions, and issues as JSON.
    ShowStudy {
        #[arg(long)]
        study_id: EntityId,
    },
    /// Run a study to completion (requires a browser and LLM backend to be
    /// wired into the binary; see `uxr-cli::backend`).
    RunStudy {
        #[arg(long)]
        study_id: EntityId,
        #[arg(long)]
        browser_mode: Option<String>,
    },
    /// Register a cron-scheduled recurring study.
    CreateSchedule {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "/")]
        starting_path: String,
        #[arg(long = "task", required = true)]
        tasks: Vec<String>,
        #[arg(long)]
        cron: String,
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
    /// Trigger any schedules that are due now.
    CheckSchedules,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let store = Arc::new(SqliteStore::open(&config.data_dir.join("studies.db")).context("opening store")?);

    match cli.command {
        Command::InitDb => {
            println!("store ready at {}", config.data_dir.join("studies.db").display());
        }
        Command::CreateStudy { url, starting_path, tasks } => {
            let study = store.create_study(&url, &starting_path, None)?;
            for (index, description) in tasks.iter().enumerate() {
                store.create_task(study.id, description, index as u32)?;
            }
            println!("created study {}", study.id);
        }
        Command::ShowStudy { study_id } => {
            let study = store.get_study(study_id)?.context("study not found")?;
            let tasks = store.list_tasks(study_id)?;
            let sessions = store.list_sessions(study_id)?;
            let issues = store.list_issues(study_id)?;
            let report = serde_json::json!({
                "study": study,
                "tasks": tasks,
                "sessions": sessions,
                "issues": issues,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::RunStudy { study_id, browser_mode } => {
            let orchestrator = build_orchestrator(&config, Arc::clone(&store));
            run_study_task(&orchestrator, study_id, browser_mode.as_deref(), Duration::from_secs(config.study_timeout_seconds)).await?;
            println!("study {study_id} finished");
        }
        Command::CreateSchedule { name, url, starting_path, tasks, cron, timezone } => {
            uxr_queue::validate_cron(&cron, &timezone).context("invalid cron expression")?;
            let schedule = Schedule {
                id: EntityId::new(),
                name,
                url,
                starting_path,
                tasks,
                persona_template_ids: Vec::new(),
                cron_expression: cron,
                timezone,
                status: ScheduleStatus::Active,
                last_run_at: None,
                next_run_at: None,
                last_study_id: None,
                run_count: 0,
                created_at: chrono::Utc::now(),
            };
            store.create_schedule(&schedule)?;
            println!("created schedule {}", schedule.id);
        }
        Command::CheckSchedules => {
            let orchestrator = build_orchestrator(&config, Arc::clone(&store));
            let triggered = check_schedules_task(&store, &orchestrator).await?;
            println!("triggered {} stud{}", triggered.len(), if triggered.len() == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}

fn build_orchestrator(config: &Config, store: Arc<SqliteStore>) -> Orchestrator<UnconfiguredBrowserProvider> {
    let pool = Arc::new(BrowserPool::new(
        UnconfiguredBrowserProvider,
        config.max_concurrent_sessions,
        Duration::from_secs(config.failover_cooldown_seconds),
        Duration::from_secs(config.browser_acquire_deadline_seconds),
    ));
    let blob_store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.data_dir.join("blobs")));
    let navigator_config = NavigatorConfig {
        max_steps: config.max_steps_per_session,
        per_action_timeout: Duration::from_millis(config.per_action_timeout_ms),
        action_retries: config.action_retries,
        ..NavigatorConfig::default()
    };
    let default_browser_mode = match config.browser_mode_default {
        uxr_core::config::BrowserModeSetting::Local => BrowserMode::Local,
        uxr_core::config::BrowserModeSetting::Cloud => BrowserMode::Cloud,
    };
    Orchestrator::new(
        store,
        pool,
        Arc::new(UnconfiguredDriverFactory),
        Arc::new(UnconfiguredLlmClient),
        blob_store,
        Arc::new(LiveStateStore::new()),
        Arc::new(ProgressBus::new()),
        navigator_config,
        default_browser_mode,
    )
}
