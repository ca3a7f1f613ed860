//! Entity types for the durable store, mirroring the data model: Study, Task,
//! Persona, Session, Step, Issue, Insight, and Schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uxr_core::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    Setup,
    Running,
    Analyzing,
    Complete,
    Failed,
}

impl StudyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Running => "running",
            Self::Analyzing => "analyzing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// True when `next` is a legal forward transition from `self` (or a
    /// terminal->terminal no-op for the same status).
    pub fn can_transition_to(&self, next: StudyStatus) -> bool {
        use StudyStatus::*;
        matches!(
            (self, next),
            (Setup, Running)
                | (Running, Analyzing)
                | (Analyzing, Complete)
                | (Setup, Failed)
                | (Running, Failed)
                | (Analyzing, Failed)
        )
    }
}

impl std::str::FromStr for StudyStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "setup" => Ok(Self::Setup),
            "running" => Ok(Self::Running),
            "analyzing" => Ok(Self::Analyzing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown study status '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub total_cost_usd: f64,
    pub llm_api_calls: u64,
    pub llm_input_tokens: u64,
    pub llm_output_tokens: u64,
    pub llm_total_tokens: u64,
    pub llm_cost_usd: f64,
    pub browser_mode: String,
    pub browser_sessions: u64,
    pub browser_time_seconds: f64,
    pub browser_cost_usd: f64,
    pub savings_vs_cloud_usd: f64,
    pub storage_screenshots: u64,
    pub storage_size_mb: f64,
}

impl Default for CostBreakdown {
    fn default() -> Self {
        Self {
            total_cost_usd: 0.0,
            llm_api_calls: 0,
            llm_input_tokens: 0,
            llm_output_tokens: 0,
            llm_total_tokens: 0,
            llm_cost_usd: 0.0,
            browser_mode: "local".to_string(),
            browser_sessions: 0,
            browser_time_seconds: 0.0,
            browser_cost_usd: 0.0,
            savings_vs_cloud_usd: 0.0,
            storage_screenshots: 0,
            storage_size_mb: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: EntityId,
    pub url: String,
    pub starting_path: String,
    pub status: StudyStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub overall_score: Option<u8>,
    pub executive_summary: Option<String>,
    pub cost_breakdown: Option<CostBreakdown>,
    pub schedule_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub study_id: EntityId,
    pub description: String,
    pub order_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    Desktop,
    Mobile,
    Tablet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub name: String,
    pub emoji: String,
    pub tech_literacy: u8,
    pub patience: u8,
    pub reading_speed: u8,
    pub trust: u8,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub frustrations: Vec<String>,
    #[serde(default)]
    pub accessibility_needs: Vec<String>,
    pub device_preference: DevicePreference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: EntityId,
    pub study_id: EntityId,
    pub template_id: Option<EntityId>,
    pub profile: PersonaProfile,
    pub model_choice: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Complete,
    Failed,
    GaveUp,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::GaveUp => "gave_up",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::GaveUp)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "gave_up" => Ok(Self::GaveUp),
            other => anyhow::bail!("unknown session status '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: EntityId,
    pub study_id: EntityId,
    pub persona_id: EntityId,
    pub task_id: EntityId,
    pub status: SessionStatus,
    pub total_steps: u32,
    pub task_completed: bool,
    pub summary: Option<String>,
    pub emotional_arc: Vec<String>,
    pub ux_score: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    Fill,
    Select,
    Scroll,
    Wait,
    Goto,
    Back,
    Submit,
    GiveUp,
    Done,
}

impl std::str::FromStr for ActionType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "click" => Ok(Self::Click),
            "fill" => Ok(Self::Fill),
            "select" => Ok(Self::Select),
            "scroll" => Ok(Self::Scroll),
            "wait" => Ok(Self::Wait),
            "goto" => Ok(Self::Goto),
            "back" => Ok(Self::Back),
            "submit" => Ok(Self::Submit),
            "give_up" => Ok(Self::GiveUp),
            "done" => Ok(Self::Done),
            other => anyhow::bail!("unknown action type '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAction {
    pub action_type: ActionType,
    pub selector: Option<String>,
    pub value: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    Curious,
    Confident,
    Confused,
    Frustrated,
    Anxious,
    Satisfied,
    Neutral,
}

impl EmotionalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Curious => "curious",
            Self::Confident => "confident",
            Self::Confused => "confused",
            Self::Frustrated => "frustrated",
            Self::Anxious => "anxious",
            Self::Satisfied => "satisfied",
            Self::Neutral => "neutral",
        }
    }

    /// Used by the Navigator's "peak frustration" page computation.
    pub fn is_frustration_family(&self) -> bool {
        matches!(self, Self::Frustrated | Self::Anxious | Self::Confused)
    }
}

impl std::str::FromStr for EmotionalState {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "curious" => Ok(Self::Curious),
            "confident" => Ok(Self::Confident),
            "confused" => Ok(Self::Confused),
            "frustrated" => Ok(Self::Frustrated),
            "anxious" => Ok(Self::Anxious),
            "satisfied" => Ok(Self::Satisfied),
            "neutral" => Ok(Self::Neutral),
            other => anyhow::bail!("unknown emotional state '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: EntityId,
    pub session_id: EntityId,
    pub step_number: u32,
    pub page_url: String,
    pub page_title: Option<String>,
    pub screenshot_ref: Option<String>,
    pub think_aloud: Option<String>,
    pub action: StepAction,
    pub confidence: f32,
    pub task_progress: u8,
    pub emotional_state: EmotionalState,
    pub click_x: Option<f64>,
    pub click_y: Option<f64>,
    pub viewport_w: Option<u32>,
    pub viewport_h: Option<u32>,
    pub scroll_y: Option<f64>,
    pub max_scroll_y: Option<f64>,
    pub load_time_ms: Option<u64>,
    pub first_paint_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Enhancement,
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Enhancement => "enhancement",
        }
    }

    pub fn base_score(&self) -> f64 {
        match self {
            Self::Critical => 40.0,
            Self::Major => 25.0,
            Self::Minor => 10.0,
            Self::Enhancement => 5.0,
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            "enhancement" => Ok(Self::Enhancement),
            other => anyhow::bail!("unknown severity '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Ux,
    Accessibility,
    Error,
    Performance,
}

impl std::str::FromStr for IssueType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ux" => Ok(Self::Ux),
            "accessibility" => Ok(Self::Accessibility),
            "error" => Ok(Self::Error),
            "performance" => Ok(Self::Performance),
            other => anyhow::bail!("unknown issue type '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: EntityId,
    pub study_id: EntityId,
    pub session_id: EntityId,
    pub step_id: Option<EntityId>,
    pub element: Option<String>,
    pub description: String,
    pub severity: Severity,
    pub issue_type: IssueType,
    pub heuristic: Option<String>,
    pub wcag_criterion: Option<String>,
    pub recommendation: Option<String>,
    pub page_url: Option<String>,
    pub times_seen: u32,
    pub is_regression: bool,
    pub priority_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Universal,
    PersonaSpecific,
    Comparative,
    Recommendation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: EntityId,
    pub study_id: EntityId,
    pub insight_type: InsightType,
    pub title: String,
    pub description: String,
    pub severity: Option<Severity>,
    pub impact: Option<String>,
    pub effort: Option<String>,
    pub personas_affected: Vec<String>,
    pub evidence: Vec<String>,
    pub rank: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Deleted,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "deleted" => Ok(Self::Deleted),
            other => anyhow::bail!("unknown schedule status '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: EntityId,
    pub name: String,
    pub url: String,
    pub starting_path: String,
    pub tasks: Vec<String>,
    pub persona_template_ids: Vec<EntityId>,
    pub cron_expression: String,
    pub timezone: String,
    pub status: ScheduleStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_study_id: Option<EntityId>,
    pub run_count: u32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_study_status_transitions_are_monotone() {
        assert!(StudyStatus::Setup.can_transition_to(StudyStatus::Running));
        assert!(StudyStatus::Running.can_transition_to(StudyStatus::Analyzing));
        assert!(StudyStatus::Analyzing.can_transition_to(StudyStatus::Complete));
        assert!(!StudyStatus::Complete.can_transition_to(StudyStatus::Running));
        assert!(!StudyStatus::Running.can_transition_to(StudyStatus::Setup));
    }

    #[test]
    fn functional_severity_ordering_puts_critical_highest() {
        let mut severities = vec![
            Severity::Minor,
            Severity::Critical,
            Severity::Enhancement,
            Severity::Major,
        ];
        severities.sort();
        assert_eq!(severities.last(), Some(&Severity::Critical));
    }

    #[test]
    fn regression_session_status_from_str_rejects_unknown_values() {
        assert!("unstarted".parse::<SessionStatus>().is_err());
        assert_eq!(
            "gave_up".parse::<SessionStatus>().unwrap(),
            SessionStatus::GaveUp
        );
    }
}
