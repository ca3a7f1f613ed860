//! The Prioritizer (§4.6): additive priority scoring over a study's issues.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use uxr_core::EntityId;
use uxr_store::{Issue, Session, SessionStatus, SqliteStore};

const PERSONA_AFFECTED_WEIGHT: f64 = 20.0;
const GAVE_UP_BONUS: f64 = 50.0;
const LANDING_PAGE_BONUS: f64 = 15.0;
const HIGH_TRAFFIC_PAGE_BONUS: f64 = 10.0;
const RECURRING_WEIGHT: f64 = 5.0;
const RECURRING_CAP: u32 = 5;
const REGRESSION_BONUS: f64 = 30.0;

const LANDING_PAGE_MARKERS: [&str; 3] = ["home", "/", "landing"];
const HIGH_TRAFFIC_MARKERS: [&str; 5] = ["signup", "login", "pricing", "checkout", "register"];

fn is_landing_page(url: &str) -> bool {
    let lower = url.to_lowercase();
    LANDING_PAGE_MARKERS.iter().any(|marker| lower.ends_with(marker) || lower == *marker)
}

fn is_high_traffic_page(url: &str) -> bool {
    let lower = url.to_lowercase();
    HIGH_TRAFFIC_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Grouping key for personas-affected counting:
/// `lower(page_url)|lower(element[:50])|lower(description[:80])`.
fn personas_group_key(issue: &Issue) -> String {
    let page_url = issue.page_url.as_deref().unwrap_or("").to_lowercase();
    let element = issue.element.as_deref().unwrap_or("").chars().take(50).collect::<String>().to_lowercase();
    let description = issue.description.chars().take(80).collect::<String>().to_lowercase();
    format!("{page_url}|{element}|{description}")
}

fn score_issue(issue: &Issue, session_by_id: &HashMap<EntityId, &Session>, personas_affected: u32) -> f64 {
    let mut score = issue.severity.base_score();
    score += PERSONA_AFFECTED_WEIGHT * personas_affected as f64;

    if session_by_id.get(&issue.session_id).map(|session| session.status) == Some(SessionStatus::GaveUp) {
        score += GAVE_UP_BONUS;
    }

    if let Some(page_url) = &issue.page_url {
        if is_landing_page(page_url) {
            score += LANDING_PAGE_BONUS;
        }
        if is_high_traffic_page(page_url) {
            score += HIGH_TRAFFIC_PAGE_BONUS;
        }
    }

    if issue.times_seen > 1 {
        score += RECURRING_WEIGHT * issue.times_seen.min(RECURRING_CAP) as f64;
    }

    if issue.is_regression {
        score += REGRESSION_BONUS;
    }

    score
}

/// `PrioritizeStudyIssues(study_id)`: scores every issue, persists the
/// updated `priority_score`, and returns issues sorted descending by score
/// (ties broken by `created_at` ascending).
pub fn prioritize_study_issues(store: &SqliteStore, study_id: EntityId) -> Result<Vec<Issue>> {
    let mut issues = store.list_issues(study_id)?;
    let sessions = store.list_sessions(study_id)?;
    let session_by_id: HashMap<EntityId, &Session> = sessions.iter().map(|session| (session.id, session)).collect();

    // Distinct sessions hitting each group key approximate distinct personas,
    // since persona linkage is not directly materialized on Issue.
    let mut sessions_per_group: HashMap<String, HashSet<EntityId>> = HashMap::new();
    for issue in &issues {
        sessions_per_group
            .entry(personas_group_key(issue))
            .or_default()
            .insert(issue.session_id);
    }

    for issue in &mut issues {
        let personas_affected = sessions_per_group
            .get(&personas_group_key(issue))
            .map(|sessions| sessions.len() as u32)
            .unwrap_or(1);
        issue.priority_score = score_issue(issue, &session_by_id, personas_affected);
        store.update_issue_priority_score(issue.id, issue.priority_score)?;
    }

    issues.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uxr_store::{IssueType, Severity};

    fn blank_issue(study_id: EntityId, session_id: EntityId, severity: Severity) -> Issue {
        Issue {
            id: EntityId::new(),
            study_id,
            session_id,
            step_id: None,
            element: Some("#submit".into()),
            description: "button is unresponsive".into(),
            severity,
            issue_type: IssueType::Ux,
            heuristic: None,
            wcag_criterion: None,
            recommendation: None,
            page_url: Some("https://example.com/checkout".into()),
            times_seen: 1,
            is_regression: false,
            priority_score: 0.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unit_is_landing_page_matches_root_and_home() {
        assert!(is_landing_page("https://example.com/"));
        assert!(is_landing_page("https://example.com/home"));
        assert!(!is_landing_page("https://example.com/profile"));
    }

    #[test]
    fn unit_is_high_traffic_page_matches_checkout_and_login() {
        assert!(is_high_traffic_page("https://example.com/checkout"));
        assert!(is_high_traffic_page("https://example.com/login"));
        assert!(!is_high_traffic_page("https://example.com/about"));
    }

    #[test]
    fn integration_prioritize_study_issues_orders_by_score_descending() {
        let store = SqliteStore::open_in_memory().expect("open");
        let study = store.create_study("https://example.com", "/", None).expect("study");
        let session = store
            .create_session(study.id, EntityId::new(), EntityId::new())
            .expect("session");

        let mut critical = blank_issue(study.id, session.id, Severity::Critical);
        critical.is_regression = true;
        let minor = blank_issue(study.id, session.id, Severity::Minor);

        store.insert_issue(&critical).expect("insert critical");
        store.insert_issue(&minor).expect("insert minor");

        let ranked = prioritize_study_issues(&store, study.id).expect("prioritize");
        assert_eq!(ranked[0].id, critical.id);
        assert!(ranked[0].priority_score > ranked[1].priority_score);
    }

    #[test]
    fn functional_gave_up_session_adds_bonus_to_its_issues() {
        let store = SqliteStore::open_in_memory().expect("open");
        let study = store.create_study("https://example.com", "/", None).expect("study");
        let session = store
            .create_session(study.id, EntityId::new(), EntityId::new())
            .expect("session");
        store
            .finish_session(session.id, SessionStatus::GaveUp, false, "gave up", &[], None)
            .expect("finish");

        let issue = blank_issue(study.id, session.id, Severity::Minor);
        store.insert_issue(&issue).expect("insert");

        let ranked = prioritize_study_issues(&store, study.id).expect("prioritize");
        assert!(ranked[0].priority_score >= Severity::Minor.base_score() + GAVE_UP_BONUS);
    }
}
