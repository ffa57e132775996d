//! Human confirmation for sensitive actions.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Verbs that make an action sensitive when they appear anywhere in its
/// action, target or reasoning.
pub const SENSITIVE_TERMS: &[&str] = &[
    "buy",
    "purchase",
    "pay",
    "order",
    "checkout",
    "delete",
    "remove",
    "cancel",
    "unsubscribe",
    "confirm",
    "submit",
    "send",
    "post",
    "publish",
    "transfer",
    "withdraw",
    "install",
    "download",
];

const AFFIRMATIVE: &str = "y";

/// What the operator is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub action: String,
    pub target: String,
    pub reasoning: String,
    pub matched_term: &'static str,
}

/// Blocking request/response exchange with a human. `None` means no answer.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> Option<String>;
}

/// Keyword-based gate; stateless apart from the confirmation channel.
pub struct SecurityGate {
    terms: Vec<&'static str>,
    confirmer: Box<dyn Confirmer>,
}

impl SecurityGate {
    pub fn new(confirmer: Box<dyn Confirmer>) -> Self {
        Self {
            terms: SENSITIVE_TERMS.to_vec(),
            confirmer,
        }
    }

    /// First sensitive term contained in the combined, lowercased text.
    pub fn sensitive_term(&self, action: &str, target: &str, reasoning: &str) -> Option<&'static str> {
        let combined = format!("{action} {target} {reasoning}").to_lowercase();
        self.terms
            .iter()
            .copied()
            .find(|term| combined.contains(term))
    }

    /// `true` when the action may proceed.
    pub async fn check(&self, action: &str, target: &str, reasoning: &str) -> bool {
        let Some(term) = self.sensitive_term(action, target, reasoning) else {
            return true;
        };

        warn!(action, target, term, "sensitive action requires confirmation");
        let request = ConfirmationRequest {
            action: action.to_string(),
            target: target.to_string(),
            reasoning: reasoning.to_string(),
            matched_term: term,
        };
        let approved = self
            .confirmer
            .confirm(&request)
            .await
            .is_some_and(|reply| is_affirmative(&reply));

        info!(action, target, approved, "confirmation answered");
        approved
    }
}

fn is_affirmative(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case(AFFIRMATIVE)
}

/// Prompts on stdout and reads one line from stdin. Prompts from
/// concurrent workers are serialized.
#[derive(Default)]
pub struct StdinConfirmer {
    turn: Mutex<()>,
}

impl StdinConfirmer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> Option<String> {
        let _turn = self.turn.lock().await;
        let prompt = format!(
            "\nSECURITY ALERT\nAction: {} {}\nReasoning: {}\nThis appears to be a sensitive action ('{}').\nDo you want to proceed? (y/n): ",
            request.action, request.target, request.reasoning, request.matched_term
        );

        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            stdout.write_all(prompt.as_bytes()).ok()?;
            stdout.flush().ok()?;

            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line),
            }
        })
        .await
        .ok()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedConfirmer;

    #[tokio::test]
    async fn harmless_action_passes_without_prompt() {
        let confirmer = ScriptedConfirmer::new(Vec::<Option<&str>>::new());
        let prompts = confirmer.prompts();
        let gate = SecurityGate::new(Box::new(confirmer));

        assert!(gate.check("click", "Login", "open the login form").await);
        assert_eq!(prompts.count(), 0);
    }

    #[tokio::test]
    async fn sensitive_action_needs_exact_yes() {
        for (reply, expected) in [
            (Some("y"), true),
            (Some("Y"), true),
            (Some(" y\n"), true),
            (Some("yes"), false),
            (Some("n"), false),
            (Some(""), false),
            (None, false),
        ] {
            let confirmer = ScriptedConfirmer::new(vec![reply]);
            let prompts = confirmer.prompts();
            let gate = SecurityGate::new(Box::new(confirmer));

            assert_eq!(gate.check("click", "Buy now", "add to cart").await, expected, "{reply:?}");
            assert_eq!(prompts.count(), 1);
        }
    }

    #[test]
    fn keyword_is_found_in_any_field() {
        let gate = SecurityGate::new(Box::new(ScriptedConfirmer::new(Vec::<Option<&str>>::new())));
        assert_eq!(gate.sensitive_term("click", "DELETE account", ""), Some("delete"));
        assert_eq!(gate.sensitive_term("type", "field", "then Submit"), Some("submit"));
        assert_eq!(gate.sensitive_term("scroll", "", "look around"), None);
    }
}
