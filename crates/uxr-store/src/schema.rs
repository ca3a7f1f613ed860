use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Bumped whenever the table shape below changes incompatibly; checked by
/// callers that persist a copy of this value alongside long-lived state.
pub const SCHEMA_VERSION: u32 = 1;

/// Opens (creating if needed) a sqlite connection with the pragmas this store
/// relies on: WAL for concurrent readers, a busy timeout instead of
/// immediate `SQLITE_BUSY`, and foreign-key enforcement for cascading deletes.
pub fn open_connection(path: &std::path::Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    initialize_schema(&connection)?;
    Ok(connection)
}

/// Opens an in-memory connection, primarily for tests.
pub fn open_in_memory() -> Result<Connection> {
    let connection = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    initialize_schema(&connection)?;
    Ok(connection)
}

/// Idempotent schema bootstrap; safe to call on every connection open.
fn initialize_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS studies (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                starting_path TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                duration_seconds REAL,
                overall_score INTEGER,
                executive_summary TEXT,
                cost_breakdown TEXT,
                schedule_id TEXT,
                created_at TEXT NOT NULL,
                error TEXT
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                study_id TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
                description TEXT NOT NULL,
                order_index INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_study ON tasks(study_id);

            CREATE TABLE IF NOT EXISTS personas (
                id TEXT PRIMARY KEY,
                study_id TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
                template_id TEXT,
                profile TEXT NOT NULL,
                model_choice TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_personas_study ON personas(study_id);

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                study_id TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
                persona_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                total_steps INTEGER NOT NULL DEFAULT 0,
                task_completed INTEGER NOT NULL DEFAULT 0,
                summary TEXT,
                emotional_arc TEXT NOT NULL DEFAULT '[]',
                ux_score INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_study ON sessions(study_id);

            CREATE TABLE IF NOT EXISTS steps (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                step_number INTEGER NOT NULL,
                page_url TEXT NOT NULL,
                page_title TEXT,
                screenshot_ref TEXT,
                think_aloud TEXT,
                action TEXT NOT NULL,
                confidence REAL NOT NULL,
                task_progress INTEGER NOT NULL,
                emotional_state TEXT NOT NULL,
                click_x REAL,
                click_y REAL,
                viewport_w INTEGER,
                viewport_h INTEGER,
                scroll_y REAL,
                max_scroll_y REAL,
                load_time_ms INTEGER,
                first_paint_ms INTEGER,
                UNIQUE(session_id, step_number)
            );
            CREATE INDEX IF NOT EXISTS idx_steps_session ON steps(session_id);

            CREATE TABLE IF NOT EXISTS issues (
                id TEXT PRIMARY KEY,
                study_id TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                step_id TEXT REFERENCES steps(id) ON DELETE SET NULL,
                element TEXT,
                description TEXT NOT NULL,
                severity TEXT NOT NULL,
                issue_type TEXT NOT NULL,
                heuristic TEXT,
                wcag_criterion TEXT,
                recommendation TEXT,
                page_url TEXT,
                times_seen INTEGER NOT NULL DEFAULT 1,
                is_regression INTEGER NOT NULL DEFAULT 0,
                priority_score REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_issues_study ON issues(study_id);

            CREATE TABLE IF NOT EXISTS insights (
                id TEXT PRIMARY KEY,
                study_id TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
                insight_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                severity TEXT,
                impact TEXT,
                effort TEXT,
                personas_affected TEXT NOT NULL DEFAULT '[]',
                evidence TEXT NOT NULL DEFAULT '[]',
                rank INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_insights_study ON insights(study_id);

            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                starting_path TEXT NOT NULL,
                tasks TEXT NOT NULL DEFAULT '[]',
                persona_template_ids TEXT NOT NULL DEFAULT '[]',
                cron_expression TEXT NOT NULL,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                status TEXT NOT NULL,
                last_run_at TEXT,
                next_run_at TEXT,
                last_study_id TEXT,
                run_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_schedules_status ON schedules(status);
            ",
        )
        .context("failed to initialize durable store schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_initialize_schema_is_idempotent() {
        let connection = open_in_memory().expect("open");
        initialize_schema(&connection).expect("re-running init should be a no-op");
    }

    #[test]
    fn regression_step_unique_constraint_rejects_duplicate_step_number() {
        let connection = open_in_memory().expect("open");
        connection
            .execute(
                "INSERT INTO studies (id, url, starting_path, status, created_at) VALUES ('s1','u','/', 'setup', '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        connection
            .execute(
                "INSERT INTO sessions (id, study_id, persona_id, task_id, status) VALUES ('sess1','s1','p1','t1','pending')",
                [],
            )
            .unwrap();
        connection
            .execute(
                "INSERT INTO steps (id, session_id, step_number, page_url, action, confidence, task_progress, emotional_state) \
                 VALUES ('step1','sess1',1,'https://example.com','{}',0.5,0,'neutral')",
                [],
            )
            .unwrap();
        let duplicate = connection.execute(
            "INSERT INTO steps (id, session_id, step_number, page_url, action, confidence, task_progress, emotional_state) \
             VALUES ('step2','sess1',1,'https://example.com','{}',0.5,0,'neutral')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
