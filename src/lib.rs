//! Core of an autonomous browser agent: a decision loop that reads the page,
//! asks a language model for the next action, gates sensitive actions on
//! human confirmation and executes them through a [`Surface`].

pub mod auth;
pub mod brain;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod page;
pub mod pool;
pub mod prompts;
pub mod recovery;
pub mod resolver;
pub mod security;
pub mod submit;
pub mod surface;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use brain::{Brain, DecisionService};
pub use config::{AgentConfig, DecisionConfig, WorkerLimits};
pub use error::{AgentError, ConfigError, DecisionError, PoolError, SurfaceError};
pub use events::AgentEvent;
pub use orchestrator::{AgentContext, Orchestrator, TaskRunner};
pub use page::{PageElement, PageSnapshot};
pub use resolver::{ElementResolver, Intent};
pub use security::{Confirmer, SecurityGate, StdinConfirmer};
pub use submit::TaskProvider;
pub use surface::{Surface, SurfaceProvider};
pub use types::{Action, Decision, PoolTask, TaskOutcome, TaskReport};
