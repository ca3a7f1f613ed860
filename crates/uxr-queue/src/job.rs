//! The Job Queue Adapter (§4.7): `run_study_task`/`check_schedules_task`
//! job bodies plus the idempotency guards each re-execution relies on.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use uxr_core::EntityId;
use uxr_store::{Schedule, SqliteStore};

use crate::cron_schedule::next_occurrence_after;

/// The Study Orchestrator's entrypoint, as seen by the job queue. Kept as a
/// trait so this crate never depends on `uxr-orchestrator` directly — the
/// queue dispatches into whatever runner is wired up by the host binary.
#[async_trait::async_trait]
pub trait StudyRunner: Send + Sync {
    async fn run_study(&self, study_id: EntityId, browser_mode_override: Option<&str>) -> Result<()>;
}

/// `run_study_task`: the queue-dispatched entrypoint for `RunStudy`, bounded
/// by `study_timeout` in addition to any per-session timeouts the
/// Orchestrator enforces internally. Idempotency is the Orchestrator's
/// terminal-state short-circuit (step 1 of §4.1) — re-running a `complete`
/// or `failed` study is a no-op, not an error.
pub async fn run_study_task(
    runner: &dyn StudyRunner,
    study_id: EntityId,
    browser_mode_override: Option<&str>,
    study_timeout: Duration,
) -> Result<()> {
    tokio::time::timeout(study_timeout, runner.run_study(study_id, browser_mode_override))
        .await
        .with_context(|| format!("study {study_id} exceeded its queue-layer timeout of {study_timeout:?}"))??;
    Ok(())
}

/// `check_schedules_task`: loads `active` schedules due at or before `now`,
/// triggers a fresh run for each, and advances `next_run_at`. A schedule
/// whose cron expression no longer parses is quarantined (paused) rather
/// than retried forever. Guarded by `last_run_at` so a schedule already
/// advanced by a concurrent tick is not double-fired.
pub async fn check_schedules_task(store: &SqliteStore, runner: &dyn StudyRunner) -> Result<Vec<EntityId>> {
    let now = Utc::now();
    let due = store.list_due_schedules(now)?;
    let mut triggered_study_ids = Vec::new();

    for schedule in due {
        match trigger_one(store, runner, &schedule, now).await {
            Ok(Some(study_id)) => triggered_study_ids.push(study_id),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(schedule_id = %schedule.id, %error, "quarantining schedule with invalid cron expression");
                store.quarantine_schedule(schedule.id)?;
            }
        }
    }
    Ok(triggered_study_ids)
}

async fn trigger_one(
    store: &SqliteStore,
    runner: &dyn StudyRunner,
    schedule: &Schedule,
    now: chrono::DateTime<Utc>,
) -> Result<Option<EntityId>> {
    // Idempotency guard: if another tick already advanced last_run_at past
    // `now`, this schedule is not actually due — skip silently.
    if let Some(last_run_at) = schedule.last_run_at {
        if last_run_at >= now {
            return Ok(None);
        }
    }

    let next_run_at = next_occurrence_after(&schedule.cron_expression, &schedule.timezone, now)?;
    let study = store.create_study(&schedule.url, &schedule.starting_path, Some(schedule.id))?;
    store.record_schedule_run(schedule.id, now, next_run_at, study.id)?;
    runner.run_study(study.id, None).await?;
    Ok(Some(study.id))
}
