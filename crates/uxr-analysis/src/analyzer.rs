//! The Analyzer (§4.6): per-distinct-URL vision analysis over a session's
//! steps, with in-session deduplication keeping the highest-severity variant.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uxr_core::BlobStore;
use uxr_llm::LlmClient;
use uxr_store::{Issue, Severity, Step};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUxIssue {
    pub element: Option<String>,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub heuristic: Option<String>,
    #[serde(default)]
    pub wcag_criterion: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnalyzeScreenshotResponse {
    #[serde(default)]
    issues: Vec<RawUxIssue>,
}

#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub page_url: String,
    pub issues: Vec<RawUxIssue>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub analyses: Vec<PageAnalysis>,
    pub all_issues: Vec<RawUxIssue>,
    pub deduplicated_issues: Vec<(String, RawUxIssue)>,
}

/// Groups an issue for in-session dedup: `lower(element[:50]):lower(description[:50])`.
fn dedup_key(element: Option<&str>, description: &str) -> String {
    let truncated_element = element.unwrap_or("").chars().take(50).collect::<String>().to_lowercase();
    let truncated_description = description.chars().take(50).collect::<String>().to_lowercase();
    format!("{truncated_element}:{truncated_description}")
}

/// `AnalyzeSession(session_id, steps, persona_context)`. Visits only
/// distinct page URLs seen across `steps`, in first-seen order. Individual
/// page failures (LLM error or unparseable response) are logged and
/// skipped rather than failing the whole session.
pub async fn analyze_session(
    llm: &dyn LlmClient,
    blob_store: &dyn BlobStore,
    steps: &[Step],
    persona_context: Option<&Value>,
) -> Result<AnalysisResult> {
    let mut seen_urls = Vec::new();
    let mut representative_step_by_url: HashMap<String, &Step> = HashMap::new();
    for step in steps {
        if !representative_step_by_url.contains_key(&step.page_url) {
            seen_urls.push(step.page_url.clone());
            representative_step_by_url.insert(step.page_url.clone(), step);
        }
    }

    let mut analyses = Vec::new();
    let mut all_issues = Vec::new();

    for page_url in seen_urls {
        let step = representative_step_by_url[&page_url];
        let screenshot = match step.screenshot_ref.as_deref().map(|path| blob_store.get(path)) {
            Some(Ok(bytes)) => bytes,
            Some(Err(error)) => {
                tracing::warn!(%page_url, %error, "skipping page analysis: screenshot unavailable");
                continue;
            }
            None => {
                tracing::warn!(%page_url, "skipping page analysis: step has no screenshot reference");
                continue;
            }
        };

        let context = json!({
            "page_url": page_url,
            "persona_context": persona_context,
        });
        let call_result = match llm.analyze_screenshot(&screenshot, &context).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(%page_url, %error, "page analysis call failed, skipping page");
                continue;
            }
        };

        let parsed: AnalyzeScreenshotResponse = match serde_json::from_value(call_result.value.clone()) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(%page_url, %error, "page analysis response unparseable, skipping page");
                continue;
            }
        };

        all_issues.extend(parsed.issues.iter().cloned());
        analyses.push(PageAnalysis { page_url, issues: parsed.issues });
    }

    let deduplicated_issues = deduplicate(&all_issues);

    Ok(AnalysisResult { analyses, all_issues, deduplicated_issues })
}

/// Groups by `dedup_key`, keeping the highest-severity variant per group
/// (critical < major < minor < enhancement ordering is inverted here:
/// `Severity`'s `Ord` ranks `Critical` highest, so `max` picks it).
fn deduplicate(issues: &[RawUxIssue]) -> Vec<(String, RawUxIssue)> {
    let mut best_by_key: HashMap<String, RawUxIssue> = HashMap::new();
    for issue in issues {
        let key = dedup_key(issue.element.as_deref(), &issue.description);
        match best_by_key.get(&key) {
            Some(existing) if existing.severity >= issue.severity => {}
            _ => {
                best_by_key.insert(key, issue.clone());
            }
        }
    }
    let mut result: Vec<(String, RawUxIssue)> = best_by_key.into_iter().collect();
    result.sort_by(|a, b| a.0.cmp(&b.0));
    result
}

/// Looks up the page a deduplicated issue originated from: the first page
/// (in visit order) whose raw issues produced `key`. `deduplicate` discards
/// the per-page association in favor of severity, so callers persisting an
/// `Issue` row recover `page_url` through this lookup.
pub fn page_url_for_key(analyses: &[PageAnalysis], key: &str) -> Option<String> {
    analyses.iter().find_map(|analysis| {
        analysis
            .issues
            .iter()
            .any(|issue| dedup_key(issue.element.as_deref(), &issue.description) == key)
            .then(|| analysis.page_url.clone())
    })
}

/// Converts a deduplicated raw issue into a durable `Issue` row.
pub fn to_durable_issue(
    study_id: uxr_core::EntityId,
    session_id: uxr_core::EntityId,
    page_url: &str,
    raw: &RawUxIssue,
) -> Issue {
    use std::str::FromStr;
    use uxr_store::IssueType;

    Issue {
        id: uxr_core::EntityId::new(),
        study_id,
        session_id,
        step_id: None,
        element: raw.element.clone(),
        description: raw.description.clone(),
        severity: raw.severity,
        issue_type: raw
            .issue_type
            .as_deref()
            .and_then(|value| IssueType::from_str(value).ok())
            .unwrap_or(IssueType::Ux),
        heuristic: raw.heuristic.clone(),
        wcag_criterion: raw.wcag_criterion.clone(),
        recommendation: raw.recommendation.clone(),
        page_url: Some(page_url.to_string()),
        times_seen: 1,
        is_regression: false,
        priority_score: 0.0,
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(element: &str, description: &str, severity: Severity) -> RawUxIssue {
        RawUxIssue {
            element: Some(element.to_string()),
            description: description.to_string(),
            severity,
            issue_type: None,
            heuristic: None,
            wcag_criterion: None,
            recommendation: None,
        }
    }

    #[test]
    fn unit_dedup_key_lowercases_and_truncates() {
        let key = dedup_key(Some("#Submit-Button"), "Button Is Unresponsive After Click");
        assert!(key.starts_with("#submit-button:"));
        assert!(key.chars().all(|c| !c.is_uppercase()));
    }

    #[test]
    fn functional_deduplicate_keeps_highest_severity_variant() {
        let issues = vec![
            issue("#submit", "button is unresponsive", Severity::Minor),
            issue("#submit", "button is unresponsive", Severity::Critical),
            issue("#submit", "button is unresponsive", Severity::Major),
        ];
        let deduped = deduplicate(&issues);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].1.severity, Severity::Critical);
    }

    #[test]
    fn regression_distinct_keys_are_not_merged() {
        let issues = vec![issue("#submit", "unresponsive", Severity::Minor), issue("#cancel", "unresponsive", Severity::Minor)];
        assert_eq!(deduplicate(&issues).len(), 2);
    }

    #[test]
    fn functional_page_url_for_key_finds_the_originating_page() {
        let analyses = vec![
            PageAnalysis { page_url: "https://example.com/".into(), issues: vec![issue("#nav", "menu is hidden", Severity::Minor)] },
            PageAnalysis {
                page_url: "https://example.com/checkout".into(),
                issues: vec![issue("#submit", "button is unresponsive", Severity::Critical)],
            },
        ];
        let key = dedup_key(Some("#submit"), "button is unresponsive");
        assert_eq!(page_url_for_key(&analyses, &key), Some("https://example.com/checkout".to_string()));
    }
}
