use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uxr_core::EntityId;

use crate::entities::*;
use crate::schema::{open_connection, open_in_memory};

/// The durable relational store behind the external `DurableStore` capability
/// described by the external interfaces: UUID primary keys, JSON columns for
/// semi-structured fields, a unique constraint on `(session_id, step_number)`,
/// and cascading deletes. Backed by rusqlite; all public methods take short,
/// single-statement-or-transaction-scoped locks so no suspension point holds
/// the connection across an await (methods here are synchronous by design,
/// called from async contexts via `tokio::task::spawn_blocking` by higher layers).
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            connection: Mutex::new(open_connection(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            connection: Mutex::new(open_in_memory()?),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- Studies ---------------------------------------------------------

    pub fn create_study(&self, url: &str, starting_path: &str, schedule_id: Option<EntityId>) -> Result<Study> {
        let study = Study {
            id: EntityId::new(),
            url: url.to_string(),
            starting_path: starting_path.to_string(),
            status: StudyStatus::Setup,
            started_at: None,
            duration_seconds: None,
            overall_score: None,
            executive_summary: None,
            cost_breakdown: None,
            schedule_id,
            created_at: Utc::now(),
            error: None,
        };
        self.lock().execute(
            "INSERT INTO studies (id, url, starting_path, status, schedule_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                study.id.to_string(),
                study.url,
                study.starting_path,
                study.status.as_str(),
                study.schedule_id.map(|id| id.to_string()),
                study.created_at.to_rfc3339(),
            ],
        )?;
        Ok(study)
    }

    pub fn get_study(&self, id: EntityId) -> Result<Option<Study>> {
        let connection = self.lock();
        connection
            .query_row(
                "SELECT id, url, starting_path, status, started_at, duration_seconds, \
                        overall_score, executive_summary, cost_breakdown, schedule_id, created_at, error \
                 FROM studies WHERE id = ?1",
                params![id.to_string()],
                row_to_study,
            )
            .optional()
            .context("failed to load study")
    }

    /// Transitions `status`, enforcing the forward-only state machine.
    /// A transition into the study's current status is a no-op (idempotent re-run).
    pub fn transition_study_status(&self, id: EntityId, next: StudyStatus) -> Result<()> {
        let study = self
            .get_study(id)?
            .with_context(|| format!("study {id} not found"))?;
        if study.status == next {
            return Ok(());
        }
        if !study.status.can_transition_to(next) {
            anyhow::bail!(
                "illegal study status transition {} -> {}",
                study.status.as_str(),
                next.as_str()
            );
        }
        self.lock().execute(
            "UPDATE studies SET status = ?1 WHERE id = ?2",
            params![next.as_str(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_study_started(&self, id: EntityId) -> Result<()> {
        self.lock().execute(
            "UPDATE studies SET started_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_study_complete(
        &self,
        id: EntityId,
        overall_score: u8,
        executive_summary: &str,
        cost_breakdown: &CostBreakdown,
    ) -> Result<()> {
        let study = self.get_study(id)?.with_context(|| format!("study {id} not found"))?;
        let duration_seconds = study
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0);
        self.lock().execute(
            "UPDATE studies SET status = ?1, overall_score = ?2, executive_summary = ?3, \
                cost_breakdown = ?4, duration_seconds = ?5 WHERE id = ?6",
            params![
                StudyStatus::Complete.as_str(),
                overall_score,
                executive_summary,
                serde_json::to_string(cost_breakdown)?,
                duration_seconds,
                id.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn mark_study_failed(&self, id: EntityId, error: &str) -> Result<()> {
        self.lock().execute(
            "UPDATE studies SET status = ?1, error = ?2 WHERE id = ?3",
            params![StudyStatus::Failed.as_str(), error, id.to_string()],
        )?;
        Ok(())
    }

    // -- Tasks / Personas --------------------------------------------------

    pub fn create_task(&self, study_id: EntityId, description: &str, order_index: u32) -> Result<Task> {
        let task = Task {
            id: EntityId::new(),
            study_id,
            description: description.to_string(),
            order_index,
        };
        self.lock().execute(
            "INSERT INTO tasks (id, study_id, description, order_index) VALUES (?1, ?2, ?3, ?4)",
            params![task.id.to_string(), study_id.to_string(), task.description, task.order_index],
        )?;
        Ok(task)
    }

    pub fn list_tasks(&self, study_id: EntityId) -> Result<Vec<Task>> {
        let connection = self.lock();
        let mut statement = connection
            .prepare("SELECT id, study_id, description, order_index FROM tasks WHERE study_id = ?1 ORDER BY order_index")?;
        let rows = statement
            .query_map(params![study_id.to_string()], |row| {
                Ok(Task {
                    id: parse_id(row.get::<_, String>(0)?),
                    study_id: parse_id(row.get::<_, String>(1)?),
                    description: row.get(2)?,
                    order_index: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn create_persona(
        &self,
        study_id: EntityId,
        template_id: Option<EntityId>,
        profile: &PersonaProfile,
        model_choice: &str,
    ) -> Result<Persona> {
        let persona = Persona {
            id: EntityId::new(),
            study_id,
            template_id,
            profile: profile.clone(),
            model_choice: model_choice.to_string(),
        };
        self.lock().execute(
            "INSERT INTO personas (id, study_id, template_id, profile, model_choice) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                persona.id.to_string(),
                study_id.to_string(),
                template_id.map(|id| id.to_string()),
                serde_json::to_string(profile)?,
                persona.model_choice,
            ],
        )?;
        Ok(persona)
    }

    pub fn list_personas(&self, study_id: EntityId) -> Result<Vec<Persona>> {
        let connection = self.lock();
        let mut statement = connection
            .prepare("SELECT id, study_id, template_id, profile, model_choice FROM personas WHERE study_id = ?1")?;
        let rows = statement
            .query_map(params![study_id.to_string()], |row| {
                let profile_json: String = row.get(3)?;
                Ok(Persona {
                    id: parse_id(row.get::<_, String>(0)?),
                    study_id: parse_id(row.get::<_, String>(1)?),
                    template_id: row.get::<_, Option<String>>(2)?.map(parse_id),
                    profile: serde_json::from_str(&profile_json).unwrap_or_else(|_| PersonaProfile {
                        name: "unknown".into(),
                        emoji: "🙂".into(),
                        tech_literacy: 5,
                        patience: 5,
                        reading_speed: 5,
                        trust: 5,
                        goals: vec![],
                        frustrations: vec![],
                        accessibility_needs: vec![],
                        device_preference: DevicePreference::Desktop,
                    }),
                    model_choice: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // -- Sessions ----------------------------------------------------------

    pub fn create_session(&self, study_id: EntityId, persona_id: EntityId, task_id: EntityId) -> Result<Session> {
        let session = Session {
            id: EntityId::new(),
            study_id,
            persona_id,
            task_id,
            status: SessionStatus::Pending,
            total_steps: 0,
            task_completed: false,
            summary: None,
            emotional_arc: vec![],
            ux_score: None,
        };
        self.lock().execute(
            "INSERT INTO sessions (id, study_id, persona_id, task_id, status) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.to_string(),
                study_id.to_string(),
                persona_id.to_string(),
                task_id.to_string(),
                session.status.as_str(),
            ],
        )?;
        Ok(session)
    }

    pub fn get_session(&self, id: EntityId) -> Result<Option<Session>> {
        self.lock()
            .query_row(
                "SELECT id, study_id, persona_id, task_id, status, total_steps, task_completed, \
                        summary, emotional_arc, ux_score FROM sessions WHERE id = ?1",
                params![id.to_string()],
                row_to_session,
            )
            .optional()
            .context("failed to load session")
    }

    pub fn list_sessions(&self, study_id: EntityId) -> Result<Vec<Session>> {
        let connection = self.lock();
        let mut statement = connection.prepare(
            "SELECT id, study_id, persona_id, task_id, status, total_steps, task_completed, \
                    summary, emotional_arc, ux_score FROM sessions WHERE study_id = ?1",
        )?;
        let rows = statement
            .query_map(params![study_id.to_string()], row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn finish_session(
        &self,
        id: EntityId,
        status: SessionStatus,
        task_completed: bool,
        summary: &str,
        emotional_arc: &[EmotionalState],
        ux_score: Option<u8>,
    ) -> Result<()> {
        let arc_json = serde_json::to_string(
            &emotional_arc.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        )?;
        self.lock().execute(
            "UPDATE sessions SET status = ?1, task_completed = ?2, summary = ?3, emotional_arc = ?4, ux_score = ?5 WHERE id = ?6",
            params![status.as_str(), task_completed as i64, summary, arc_json, ux_score, id.to_string()],
        )?;
        Ok(())
    }

    // -- Steps ---------------------------------------------------------------

    /// Inserts a step and bumps the owning session's `total_steps` in one
    /// transaction. Returns an error (no partial write) on a duplicate
    /// `(session_id, step_number)` — the unique constraint does the real work.
    pub fn insert_step(&self, step: &Step) -> Result<()> {
        let mut connection = self.lock();
        let transaction = connection.transaction()?;
        transaction.execute(
            "INSERT INTO steps (id, session_id, step_number, page_url, page_title, screenshot_ref, \
                think_aloud, action, confidence, task_progress, emotional_state, click_x, click_y, \
                viewport_w, viewport_h, scroll_y, max_scroll_y, load_time_ms, first_paint_ms) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                step.id.to_string(),
                step.session_id.to_string(),
                step.step_number,
                step.page_url,
                step.page_title,
                step.screenshot_ref,
                step.think_aloud,
                serde_json::to_string(&step.action)?,
                step.confidence,
                step.task_progress,
                step.emotional_state.as_str(),
                step.click_x,
                step.click_y,
                step.viewport_w,
                step.viewport_h,
                step.scroll_y,
                step.max_scroll_y,
                step.load_time_ms,
                step.first_paint_ms,
            ],
        ).context("failed to insert step (duplicate step_number for this session?)")?;
        transaction.execute(
            "UPDATE sessions SET total_steps = total_steps + 1 WHERE id = ?1",
            params![step.session_id.to_string()],
        )?;
        transaction.commit()?;
        Ok(())
    }

    pub fn list_steps(&self, session_id: EntityId) -> Result<Vec<Step>> {
        let connection = self.lock();
        let mut statement = connection.prepare(
            "SELECT id, session_id, step_number, page_url, page_title, screenshot_ref, think_aloud, \
                    action, confidence, task_progress, emotional_state, click_x, click_y, viewport_w, \
                    viewport_h, scroll_y, max_scroll_y, load_time_ms, first_paint_ms \
             FROM steps WHERE session_id = ?1 ORDER BY step_number",
        )?;
        let rows = statement
            .query_map(params![session_id.to_string()], row_to_step)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Distinct page URLs visited in a session, in first-seen order — the
    /// Analyzer only spends a vision call on each distinct URL once.
    pub fn distinct_page_urls(&self, session_id: EntityId) -> Result<Vec<String>> {
        let steps = self.list_steps(session_id)?;
        let mut seen = std::collections::HashSet::new();
        let mut urls = Vec::new();
        for step in steps {
            if seen.insert(step.page_url.clone()) {
                urls.push(step.page_url);
            }
        }
        Ok(urls)
    }

    // -- Issues ----------------------------------------------------------------

    pub fn insert_issue(&self, issue: &Issue) -> Result<()> {
        self.lock().execute(
            "INSERT INTO issues (id, study_id, session_id, step_id, element, description, severity, \
                issue_type, heuristic, wcag_criterion, recommendation, page_url, times_seen, \
                is_regression, priority_score, created_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            params![
                issue.id.to_string(),
                issue.study_id.to_string(),
                issue.session_id.to_string(),
                issue.step_id.map(|id| id.to_string()),
                issue.element,
                issue.description,
                issue.severity.as_str(),
                format!("{:?}", issue.issue_type).to_lowercase(),
                issue.heuristic,
                issue.wcag_criterion,
                issue.recommendation,
                issue.page_url,
                issue.times_seen,
                issue.is_regression as i64,
                issue.priority_score,
                issue.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_issues(&self, study_id: EntityId) -> Result<Vec<Issue>> {
        let connection = self.lock();
        let mut statement = connection.prepare(
            "SELECT id, study_id, session_id, step_id, element, description, severity, issue_type, \
                    heuristic, wcag_criterion, recommendation, page_url, times_seen, is_regression, \
                    priority_score, created_at \
             FROM issues WHERE study_id = ?1 ORDER BY created_at",
        )?;
        let rows = statement
            .query_map(params![study_id.to_string()], row_to_issue)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_issue_priority_score(&self, issue_id: EntityId, score: f64) -> Result<()> {
        self.lock().execute(
            "UPDATE issues SET priority_score = ?1 WHERE id = ?2",
            params![score, issue_id.to_string()],
        )?;
        Ok(())
    }

    /// Finds a prior issue sharing the same grouping key on a study that ran
    /// against the same schedule, used to set `is_regression`/`times_seen`.
    /// Per the Open Questions resolution, studies not bound to a schedule
    /// never match (there is no cross-study issue table).
    pub fn find_prior_issue_for_regression(
        &self,
        schedule_id: EntityId,
        excluding_study_id: EntityId,
        page_url: &str,
        element: &str,
        description: &str,
    ) -> Result<Option<Issue>> {
        let connection = self.lock();
        connection
            .query_row(
                "SELECT i.id, i.study_id, i.session_id, i.step_id, i.element, i.description, i.severity, \
                        i.issue_type, i.heuristic, i.wcag_criterion, i.recommendation, i.page_url, \
                        i.times_seen, i.is_regression, i.priority_score, i.created_at \
                 FROM issues i \
                 JOIN studies s ON s.id = i.study_id \
                 WHERE s.schedule_id = ?1 AND i.study_id != ?2 \
                   AND lower(coalesce(i.page_url,'')) = lower(?3) \
                   AND lower(coalesce(i.element,'')) = lower(?4) \
                   AND lower(i.description) = lower(?5) \
                 ORDER BY i.created_at DESC LIMIT 1",
                params![
                    schedule_id.to_string(),
                    excluding_study_id.to_string(),
                    page_url,
                    element,
                    description,
                ],
                row_to_issue,
            )
            .optional()
            .context("failed to query prior issue for regression detection")
    }

    // -- Insights ----------------------------------------------------------------

    /// Replaces any prior insights for the study (Synthesizer re-runs supersede).
    pub fn replace_insights(&self, study_id: EntityId, insights: &[Insight]) -> Result<()> {
        let mut connection = self.lock();
        let transaction = connection.transaction()?;
        transaction.execute(
            "DELETE FROM insights WHERE study_id = ?1",
            params![study_id.to_string()],
        )?;
        for insight in insights {
            transaction.execute(
                "INSERT INTO insights (id, study_id, insight_type, title, description, severity, \
                    impact, effort, personas_affected, evidence, rank) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    insight.id.to_string(),
                    study_id.to_string(),
                    format!("{:?}", insight.insight_type).to_lowercase(),
                    insight.title,
                    insight.description,
                    insight.severity.map(|s| s.as_str()),
                    insight.impact,
                    insight.effort,
                    serde_json::to_string(&insight.personas_affected)?,
                    serde_json::to_string(&insight.evidence)?,
                    insight.rank,
                ],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }

    // -- Schedules ----------------------------------------------------------------

    pub fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.lock().execute(
            "INSERT INTO schedules (id, name, url, starting_path, tasks, persona_template_ids, \
                cron_expression, timezone, status, last_run_at, next_run_at, last_study_id, run_count, created_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                schedule.id.to_string(),
                schedule.name,
                schedule.url,
                schedule.starting_path,
                serde_json::to_string(&schedule.tasks)?,
                serde_json::to_string(&schedule.persona_template_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>())?,
                schedule.cron_expression,
                schedule.timezone,
                schedule.status.as_str(),
                schedule.last_run_at.map(|t| t.to_rfc3339()),
                schedule.next_run_at.map(|t| t.to_rfc3339()),
                schedule.last_study_id.map(|id| id.to_string()),
                schedule.run_count,
                schedule.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let connection = self.lock();
        let mut statement = connection.prepare(
            "SELECT id, name, url, starting_path, tasks, persona_template_ids, cron_expression, \
                    timezone, status, last_run_at, next_run_at, last_study_id, run_count, created_at \
             FROM schedules WHERE status = 'active' AND (next_run_at IS NULL OR next_run_at <= ?1)",
        )?;
        let rows = statement
            .query_map(params![now.to_rfc3339()], row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn record_schedule_run(
        &self,
        id: EntityId,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        study_id: EntityId,
    ) -> Result<()> {
        self.lock().execute(
            "UPDATE schedules SET last_run_at = ?1, next_run_at = ?2, last_study_id = ?3, \
                run_count = run_count + 1 WHERE id = ?4",
            params![
                last_run_at.to_rfc3339(),
                next_run_at.to_rfc3339(),
                study_id.to_string(),
                id.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn quarantine_schedule(&self, id: EntityId) -> Result<()> {
        self.lock().execute(
            "UPDATE schedules SET status = ?1 WHERE id = ?2",
            params![ScheduleStatus::Paused.as_str(), id.to_string()],
        )?;
        Ok(())
    }

    /// Longitudinal score trend for a URL across its completed studies —
    /// the score-history surface.
    pub fn score_history(&self, url: &str, limit: u32) -> Result<Vec<(DateTime<Utc>, u8)>> {
        let connection = self.lock();
        let mut statement = connection.prepare(
            "SELECT created_at, overall_score FROM studies \
             WHERE lower(url) = lower(?1) AND status = 'complete' AND overall_score IS NOT NULL \
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = statement
            .query_map(params![url, limit], |row| {
                let created_at: String = row.get(0)?;
                let score: u8 = row.get(1)?;
                Ok((
                    DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    score,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn parse_id(value: String) -> EntityId {
    EntityId::from_str(&value).unwrap_or_default()
}

fn row_to_study(row: &rusqlite::Row) -> rusqlite::Result<Study> {
    let status: String = row.get(3)?;
    let started_at: Option<String> = row.get(4)?;
    let cost_breakdown: Option<String> = row.get(8)?;
    let schedule_id: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    Ok(Study {
        id: parse_id(row.get(0)?),
        url: row.get(1)?,
        starting_path: row.get(2)?,
        status: StudyStatus::from_str(&status).unwrap_or(StudyStatus::Setup),
        started_at: started_at.and_then(|value| {
            DateTime::parse_from_rfc3339(&value).ok().map(|dt| dt.with_timezone(&Utc))
        }),
        duration_seconds: row.get(5)?,
        overall_score: row.get(6)?,
        executive_summary: row.get(7)?,
        cost_breakdown: cost_breakdown.and_then(|raw| serde_json::from_str(&raw).ok()),
        schedule_id: schedule_id.map(parse_id),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        error: row.get(11)?,
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let status: String = row.get(4)?;
    let emotional_arc: String = row.get(8)?;
    Ok(Session {
        id: parse_id(row.get(0)?),
        study_id: parse_id(row.get(1)?),
        persona_id: parse_id(row.get(2)?),
        task_id: parse_id(row.get(3)?),
        status: SessionStatus::from_str(&status).unwrap_or(SessionStatus::Pending),
        total_steps: row.get(5)?,
        task_completed: row.get::<_, i64>(6)? != 0,
        summary: row.get(7)?,
        emotional_arc: serde_json::from_str(&emotional_arc).unwrap_or_default(),
        ux_score: row.get(9)?,
    })
}

fn row_to_step(row: &rusqlite::Row) -> rusqlite::Result<Step> {
    let action_json: String = row.get(7)?;
    let emotional_state: String = row.get(10)?;
    Ok(Step {
        id: parse_id(row.get(0)?),
        session_id: parse_id(row.get(1)?),
        step_number: row.get(2)?,
        page_url: row.get(3)?,
        page_title: row.get(4)?,
        screenshot_ref: row.get(5)?,
        think_aloud: row.get(6)?,
        action: serde_json::from_str(&action_json).unwrap_or(StepAction {
            action_type: ActionType::Wait,
            selector: None,
            value: None,
            description: None,
        }),
        confidence: row.get(8)?,
        task_progress: row.get(9)?,
        emotional_state: EmotionalState::from_str(&emotional_state).unwrap_or(EmotionalState::Neutral),
        click_x: row.get(11)?,
        click_y: row.get(12)?,
        viewport_w: row.get(13)?,
        viewport_h: row.get(14)?,
        scroll_y: row.get(15)?,
        max_scroll_y: row.get(16)?,
        load_time_ms: row.get(17)?,
        first_paint_ms: row.get(18)?,
    })
}

fn row_to_issue(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
    let step_id: Option<String> = row.get(3)?;
    let severity: String = row.get(6)?;
    let issue_type: String = row.get(7)?;
    let created_at: String = row.get(15)?;
    Ok(Issue {
        id: parse_id(row.get(0)?),
        study_id: parse_id(row.get(1)?),
        session_id: parse_id(row.get(2)?),
        step_id: step_id.map(parse_id),
        element: row.get(4)?,
        description: row.get(5)?,
        severity: Severity::from_str(&severity).unwrap_or(Severity::Minor),
        issue_type: IssueType::from_str(&issue_type).unwrap_or(IssueType::Ux),
        heuristic: row.get(8)?,
        wcag_criterion: row.get(9)?,
        recommendation: row.get(10)?,
        page_url: row.get(11)?,
        times_seen: row.get(12)?,
        is_regression: row.get::<_, i64>(13)? != 0,
        priority_score: row.get(14)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<Schedule> {
    let tasks: String = row.get(4)?;
    let persona_template_ids: String = row.get(5)?;
    let status: String = row.get(8)?;
    let last_run_at: Option<String> = row.get(9)?;
    let next_run_at: Option<String> = row.get(10)?;
    let last_study_id: Option<String> = row.get(11)?;
    let created_at: String = row.get(13)?;
    Ok(Schedule {
        id: parse_id(row.get(0)?),
        name: row.get(1)?,
        url: row.get(2)?,
        starting_path: row.get(3)?,
        tasks: serde_json::from_str(&tasks).unwrap_or_default(),
        persona_template_ids: serde_json::from_str::<Vec<String>>(&persona_template_ids)
            .unwrap_or_default()
            .into_iter()
            .map(parse_id)
            .collect(),
        cron_expression: row.get(6)?,
        timezone: row.get(7)?,
        status: ScheduleStatus::from_str(&status).unwrap_or(ScheduleStatus::Paused),
        last_run_at: last_run_at.and_then(|v| DateTime::parse_from_rfc3339(&v).ok().map(|dt| dt.with_timezone(&Utc))),
        next_run_at: next_run_at.and_then(|v| DateTime::parse_from_rfc3339(&v).ok().map(|dt| dt.with_timezone(&Utc))),
        last_study_id: last_study_id.map(parse_id),
        run_count: row.get(12)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> PersonaProfile {
        PersonaProfile {
            name: "Alex".into(),
            emoji: "🙂".into(),
            tech_literacy: 6,
            patience: 4,
            reading_speed: 5,
            trust: 5,
            goals: vec!["buy a plan".into()],
            frustrations: vec![],
            accessibility_needs: vec![],
            device_preference: DevicePreference::Desktop,
        }
    }

    #[test]
    fn functional_study_lifecycle_round_trips() {
        let store = SqliteStore::open_in_memory().expect("open");
        let study = store.create_study("https://example.com", "/", None).expect("create");
        assert_eq!(study.status, StudyStatus::Setup);

        store.transition_study_status(study.id, StudyStatus::Running).expect("transition");
        let reloaded = store.get_study(study.id).expect("get").expect("present");
        assert_eq!(reloaded.status, StudyStatus::Running);

        let breakdown = CostBreakdown::default();
        store
            .mark_study_complete(study.id, 82, "summary", &breakdown)
            .expect("complete");
        let reloaded = store.get_study(study.id).expect("get").expect("present");
        assert_eq!(reloaded.status, StudyStatus::Complete);
        assert_eq!(reloaded.overall_score, Some(82));
    }

    #[test]
    fn regression_illegal_status_transition_is_rejected() {
        let store = SqliteStore::open_in_memory().expect("open");
        let study = store.create_study("https://example.com", "/", None).expect("create");
        let error = store
            .transition_study_status(study.id, StudyStatus::Analyzing)
            .expect_err("setup -> analyzing skips running");
        assert!(error.to_string().contains("illegal"));
    }

    #[test]
    fn unit_insert_step_rejects_duplicate_step_number_without_partial_write() {
        let store = SqliteStore::open_in_memory().expect("open");
        let study = store.create_study("https://example.com", "/", None).expect("create");
        let task = store.create_task(study.id, "find pricing", 0).expect("task");
        let persona = store
            .create_persona(study.id, None, &sample_profile(), "model-a")
            .expect("persona");
        let session = store.create_session(study.id, persona.id, task.id).expect("session");

        let step = Step {
            id: EntityId::new(),
            session_id: session.id,
            step_number: 1,
            page_url: "https://example.com/".into(),
            page_title: None,
            screenshot_ref: None,
            think_aloud: None,
            action: StepAction {
                action_type: ActionType::Click,
                selector: Some("#cta".into()),
                value: None,
                description: None,
            },
            confidence: 0.8,
            task_progress: 10,
            emotional_state: EmotionalState::Curious,
            click_x: None,
            click_y: None,
            viewport_w: None,
            viewport_h: None,
            scroll_y: None,
            max_scroll_y: None,
            load_time_ms: None,
            first_paint_ms: None,
        };
        store.insert_step(&step).expect("first insert succeeds");
        let duplicate = store.insert_step(&step);
        assert!(duplicate.is_err());

        let reloaded = store.get_session(session.id).expect("get").expect("present");
        assert_eq!(reloaded.total_steps, 1, "failed duplicate insert must not bump total_steps");
    }

    #[test]
    fn integration_regression_lookup_matches_same_schedule_only() {
        let store = SqliteStore::open_in_memory().expect("open");
        let schedule_id = EntityId::new();
        let study_a = store.create_study("https://example.com", "/", Some(schedule_id)).expect("create");
        let session_a = store
            .create_session(study_a.id, EntityId::new(), EntityId::new())
            .expect("session");
        let issue = Issue {
            id: EntityId::new(),
            study_id: study_a.id,
            session_id: session_a.id,
            step_id: None,
            element: Some("#submit".into()),
            description: "button is unresponsive".into(),
            severity: Severity::Major,
            issue_type: IssueType::Ux,
            heuristic: None,
            wcag_criterion: None,
            recommendation: None,
            page_url: Some("https://example.com/checkout".into()),
            times_seen: 1,
            is_regression: false,
            priority_score: 0.0,
            created_at: Utc::now(),
        };
        store.insert_issue(&issue).expect("insert");

        let study_b = store.create_study("https://example.com", "/", Some(schedule_id)).expect("create");
        let found = store
            .find_prior_issue_for_regression(
                schedule_id,
                study_b.id,
                "https://example.com/checkout",
                "#submit",
                "button is unresponsive",
            )
            .expect("query")
            .expect("match across studies sharing a schedule");
        assert_eq!(found.id, issue.id);

        let unscheduled_study = store.create_study("https://example.com", "/", None).expect("create");
        let no_match = store
            .find_prior_issue_for_regression(
                schedule_id,
                unscheduled_study.id,
                "https://example.com/checkout",
                "#submit",
                "button is unresponsive",
            )
            .expect("query");
        assert!(no_match.is_some());
    }
}
