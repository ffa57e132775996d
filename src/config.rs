//! Runtime configuration, passed explicitly to every component.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_MAX_STEPS: usize = 50;
pub const DEFAULT_HISTORY_CAPACITY: usize = 15;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Worker counts for the pool. Only `current` workers are spawned; `min`
/// and `max` bound what an operator may configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerLimits {
    pub min: usize,
    pub max: usize,
    pub current: usize,
}

impl WorkerLimits {
    pub fn new(min: usize, max: usize, current: usize) -> Result<Self, ConfigError> {
        let limits = Self { min, max, current };
        limits.validate()?;
        Ok(limits)
    }

    /// A fixed pool of `n` workers.
    pub fn fixed(n: usize) -> Result<Self, ConfigError> {
        Self::new(n, n, n)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min == 0 || self.min > self.max || self.current < self.min || self.current > self.max
        {
            return Err(ConfigError::InvalidWorkers {
                min: self.min,
                max: self.max,
                current: self.current,
            });
        }
        Ok(())
    }
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            min: 1,
            max: 1,
            current: 1,
        }
    }
}

/// Settings for the chat-completions backed decision service.
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// Politeness interval between steps.
    pub step_delay: Duration,
    /// Duration of the `wait` action.
    pub wait_seconds: u64,
    /// Back-off applied when a step fails on navigation.
    pub navigation_wait: u64,
    pub history_capacity: usize,
    pub queue_capacity: usize,
    pub workers: WorkerLimits,
    pub decision: DecisionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            step_delay: Duration::from_secs(2),
            wait_seconds: 3,
            navigation_wait: 5,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: WorkerLimits::default(),
            decision: DecisionConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Build from the process environment (after loading `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `OPENAI_API_KEY` is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.decision.api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        if let Some(model) = lookup("AGENT_MODEL") {
            config.decision.model = model;
        }
        if let Some(base_url) = lookup("AGENT_BASE_URL") {
            config.decision.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("AGENT_MAX_STEPS") {
            config.max_steps = parse("AGENT_MAX_STEPS", &raw)?;
        }
        if let Some(raw) = lookup("AGENT_QUEUE_CAPACITY") {
            config.queue_capacity = parse("AGENT_QUEUE_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("AGENT_STEP_DELAY_MS") {
            config.step_delay = Duration::from_millis(parse("AGENT_STEP_DELAY_MS", &raw)?);
        }
        if let Some(raw) = lookup("AGENT_WORKERS") {
            config.workers = WorkerLimits::fixed(parse("AGENT_WORKERS", &raw)?)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.workers.validate()?;
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid {
                name: "max_steps",
                value: "0".into(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "queue_capacity",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AgentConfig::default();
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.history_capacity, 15);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.step_delay, Duration::from_secs(2));
        assert_eq!(config.workers, WorkerLimits::new(1, 1, 1).unwrap());
    }

    #[test]
    fn api_key_is_required() {
        let err = AgentConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY"));
    }

    #[test]
    fn env_overrides_apply() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("AGENT_MODEL", "gpt-4o"),
            ("AGENT_WORKERS", "3"),
            ("AGENT_STEP_DELAY_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.decision.model, "gpt-4o");
        assert_eq!(config.workers.current, 3);
        assert_eq!(config.step_delay, Duration::from_millis(250));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = AgentConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("AGENT_MAX_STEPS", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "AGENT_MAX_STEPS", .. }));
    }

    #[test]
    fn worker_limits_are_validated() {
        assert!(WorkerLimits::new(0, 1, 1).is_err());
        assert!(WorkerLimits::new(2, 1, 1).is_err());
        assert!(WorkerLimits::new(1, 4, 5).is_err());
        assert!(WorkerLimits::new(1, 4, 2).is_ok());
    }
}
