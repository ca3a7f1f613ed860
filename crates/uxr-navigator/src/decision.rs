//! The structured decision an LLM call must return at each navigation step
//! (§4.2 step 2). The raw response is expected to have already passed
//! through the tolerant JSON pipeline (`uxr_llm::json_repair`) by the time
//! it reaches this typed deserialization.

use serde::{Deserialize, Serialize};
use uxr_store::{ActionType, EmotionalState};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecisionAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NavigatorDecision {
    #[serde(default)]
    pub think_aloud: Option<String>,
    pub emotional_state: EmotionalState,
    pub action: DecisionAction,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub task_progress: u8,
    #[serde(default)]
    pub ux_issues: Vec<String>,
}

impl NavigatorDecision {
    pub fn is_done(&self) -> bool {
        self.action.action_type == ActionType::Done || self.task_progress >= 100
    }

    pub fn is_give_up(&self) -> bool {
        self.action.action_type == ActionType::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_deserializes_a_well_formed_decision() {
        let value = json!({
            "think_aloud": "looking for the submit button",
            "emotional_state": "curious",
            "action": {"type": "click", "selector": "#submit", "description": "click submit"},
            "confidence": 0.8,
            "task_progress": 40,
            "ux_issues": ["button label is unclear"],
        });
        let decision: NavigatorDecision = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decision.action.action_type, ActionType::Click);
        assert_eq!(decision.ux_issues.len(), 1);
    }

    #[test]
    fn functional_is_done_when_task_progress_reaches_100_even_without_done_action() {
        let decision = NavigatorDecision {
            think_aloud: None,
            emotional_state: EmotionalState::Satisfied,
            action: DecisionAction { action_type: ActionType::Click, selector: None, value: None, description: None },
            confidence: 0.9,
            task_progress: 100,
            ux_issues: vec![],
        };
        assert!(decision.is_done());
    }

    #[test]
    fn regression_missing_optional_fields_default_rather_than_error() {
        let value = json!({"emotional_state": "neutral", "action": {"type": "wait"}});
        let decision: NavigatorDecision = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.ux_issues.is_empty());
    }
}
