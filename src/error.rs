//! Error types for the agent.
//!
//! Each concern gets its own enum; [`AgentError`] is what a task run ends
//! with when it does not finish normally.

use thiserror::Error;

/// Failures reported by an observed surface (the browser page).
///
/// The rendered messages carry the signals the recovery classifier keys
/// on, so the wording of the first three variants is load-bearing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element not visible: {0}")]
    NotVisible(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("surface driver error: {0}")]
    Driver(String),
}

/// Element resolution failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Every strategy in the chain missed.
    #[error("no strategy matched '{0}'")]
    NotFound(String),
}

impl From<ResolveError> for SurfaceError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(description) => SurfaceError::ElementNotFound(description),
        }
    }
}

/// Anything that went wrong while asking the decision service.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decision service error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("no choices in decision response")]
    Empty,

    #[error("malformed decision: {0}")]
    Malformed(String),
}

/// Task queue failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is closed")]
    PoolClosed,

    #[error("worker pool already started")]
    AlreadyStarted,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("invalid worker limits: min={min} max={max} current={current}")]
    InvalidWorkers { min: usize, max: usize, current: usize },
}

/// Why a task run stopped before completing.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to decide next action: {0}")]
    Decision(#[from] DecisionError),

    #[error("failed to extract page state: {0}")]
    StateExtraction(SurfaceError),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("action cancelled by user")]
    SecurityDenied,

    #[error("unrecoverable action failure: {0}")]
    Unrecoverable(SurfaceError),

    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_messages_carry_recovery_signals() {
        assert!(
            SurfaceError::ElementNotFound("Login".into())
                .to_string()
                .contains("element not found")
        );
        assert!(
            SurfaceError::NotVisible("Login".into())
                .to_string()
                .contains("not visible")
        );
        assert!(
            SurfaceError::Navigation("timeout".into())
                .to_string()
                .contains("navigation")
        );
    }

    #[test]
    fn resolve_miss_becomes_element_not_found() {
        let err: SurfaceError = ResolveError::NotFound("Buy".into()).into();
        assert_eq!(err, SurfaceError::ElementNotFound("Buy".into()));
    }
}
