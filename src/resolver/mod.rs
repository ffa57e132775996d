//! Maps a natural-language target description to an element on the page.
//!
//! Strategies are tried in a fixed order and the first acceptable match
//! wins; later strategies are never consulted once one succeeds.

mod strategies;

pub use strategies::*;

use tracing::{debug, trace};

use crate::error::ResolveError;
use crate::page::{PageElement, PageSnapshot};

/// What the caller intends to do with the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Click,
    Fill,
}

impl Intent {
    /// Visibility is always required; click targets must also be enabled.
    pub fn accepts(self, element: &PageElement) -> bool {
        match self {
            Intent::Click => element.visible && element.enabled,
            Intent::Fill => element.visible,
        }
    }
}

/// A resolution request, with the description pre-normalised once.
#[derive(Debug, Clone)]
pub struct Query<'d> {
    pub description: &'d str,
    pub lowered: String,
    pub intent: Intent,
}

impl<'d> Query<'d> {
    pub fn new(description: &'d str, intent: Intent) -> Self {
        let description = description.trim();
        Self {
            description,
            lowered: description.to_lowercase(),
            intent,
        }
    }

    /// First element that satisfies `matches` and that the intent accepts.
    pub fn first_match<'a>(
        &self,
        page: &'a PageSnapshot,
        matches: impl Fn(&PageElement) -> bool,
    ) -> Option<&'a PageElement> {
        page.elements
            .iter()
            .find(|&el| self.intent.accepts(el) && matches(el))
    }

    pub fn mentions(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|kw| self.lowered.contains(kw))
    }
}

/// One heuristic in the chain.
pub trait LocateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_resolve<'a>(&self, query: &Query<'_>, page: &'a PageSnapshot) -> Option<&'a PageElement>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub element: &'a PageElement,
    pub strategy: &'static str,
    /// 1-based position of the strategy in the chain.
    pub rank: usize,
}

pub struct ElementResolver {
    strategies: Vec<Box<dyn LocateStrategy>>,
}

impl ElementResolver {
    /// The standard twelve-step chain.
    pub fn new() -> Self {
        Self::with_strategies(default_chain())
    }

    pub fn with_strategies(strategies: Vec<Box<dyn LocateStrategy>>) -> Self {
        Self { strategies }
    }

    /// Append a strategy after the existing ones.
    pub fn push(&mut self, strategy: Box<dyn LocateStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn resolve<'a>(
        &self,
        description: &str,
        intent: Intent,
        page: &'a PageSnapshot,
    ) -> Result<Resolution<'a>, ResolveError> {
        let query = Query::new(description, intent);
        if query.description.is_empty() {
            return Err(ResolveError::NotFound(description.to_string()));
        }

        for (idx, strategy) in self.strategies.iter().enumerate() {
            trace!(strategy = strategy.name(), description, "trying strategy");
            if let Some(element) = strategy.try_resolve(&query, page) {
                debug!(
                    strategy = strategy.name(),
                    eid = %element.eid,
                    description,
                    "resolved element"
                );
                return Ok(Resolution {
                    element,
                    strategy: strategy.name(),
                    rank: idx + 1,
                });
            }
        }

        Err(ResolveError::NotFound(description.to_string()))
    }

    /// Resolve a field to type into; when the chain misses, fall back to
    /// the first visible input or textarea on the page.
    pub fn resolve_fillable<'a>(
        &self,
        description: &str,
        page: &'a PageSnapshot,
    ) -> Result<Resolution<'a>, ResolveError> {
        match self.resolve(description, Intent::Fill, page) {
            Ok(found) => Ok(found),
            Err(err) => page
                .elements
                .iter()
                .find(|el| el.visible && matches!(el.tag.as_str(), "input" | "textarea") && el.is_fillable())
                .map(|element| {
                    debug!(eid = %element.eid, description, "falling back to first input field");
                    Resolution {
                        element,
                        strategy: "first_input",
                        rank: self.strategies.len() + 1,
                    }
                })
                .ok_or(err),
        }
    }
}

impl Default for ElementResolver {
    fn default() -> Self {
        Self::new()
    }
}
