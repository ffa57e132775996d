use std::fmt;

use serde::{Deserialize, Serialize};

/// One natural-language goal flowing through the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTask {
    pub id: String,
    pub text: String,
}

impl PoolTask {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// The action vocabulary the decision service may choose from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Click,
    Type,
    Navigate,
    Scroll,
    Wait,
    WaitUser,
    Complete,
    /// Anything outside the vocabulary; rejected at execution time.
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Click => "click",
            Action::Type => "type",
            Action::Navigate => "navigate",
            Action::Scroll => "scroll",
            Action::Wait => "wait",
            Action::WaitUser => "wait_user",
            Action::Complete => "complete",
            Action::Unknown(raw) => raw,
        }
    }
}

impl From<String> for Action {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "click" => Action::Click,
            "type" => Action::Type,
            "navigate" => Action::Navigate,
            "scroll" => Action::Scroll,
            "wait" => Action::Wait,
            "wait_user" => Action::WaitUser,
            "complete" => Action::Complete,
            _ => Action::Unknown(raw),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step the decision service asks the agent to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub reasoning: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub need_approval: bool,
    #[serde(default)]
    pub completed: bool,
}

impl Decision {
    pub fn new(action: Action, reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            action,
            target: None,
            text: None,
            url: None,
            need_approval: false,
            completed: false,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }

    pub fn target_str(&self) -> &str {
        self.target.as_deref().unwrap_or_default()
    }

    /// History line for this step: `action: target -> reasoning`.
    pub fn summary(&self) -> String {
        format!("{}: {} -> {}", self.action, self.target_str(), self.reasoning)
    }
}

/// A message in the conversation sent to the decision service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// How a task run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    StepLimitReached,
    AbortedByError(String),
    AbortedBySecurity,
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    /// Steps that reached the decision stage.
    pub steps: usize,
    pub outcome: TaskOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parses_with_optional_fields_missing() {
        let decision: Decision =
            serde_json::from_str(r#"{"reasoning":"open it","action":"click","target":"Login"}"#)
                .unwrap();
        assert_eq!(decision.action, Action::Click);
        assert_eq!(decision.target.as_deref(), Some("Login"));
        assert!(!decision.completed);
        assert!(!decision.need_approval);
    }

    #[test]
    fn unknown_action_is_kept_verbatim() {
        let decision: Decision =
            serde_json::from_str(r#"{"reasoning":"?","action":"hover"}"#).unwrap();
        assert_eq!(decision.action, Action::Unknown("hover".into()));
        assert_eq!(decision.action.as_str(), "hover");
    }

    #[test]
    fn summary_uses_history_format() {
        let decision = Decision::new(Action::Click, "open the form").with_target("Login");
        assert_eq!(decision.summary(), "click: Login -> open the form");
    }
}
