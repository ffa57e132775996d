//! In-memory doubles for the surface, decision service and confirmer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::brain::DecisionService;
use crate::error::{DecisionError, SurfaceError};
use crate::page::PageSnapshot;
use crate::resolver::{ElementResolver, Intent};
use crate::security::{ConfirmationRequest, Confirmer};
use crate::surface::{Surface, SurfaceProvider};
use crate::types::{ChatMessage, Decision};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    ExtractState,
    Navigate(String),
    Click {
        description: String,
        eid: String,
        strategy: &'static str,
    },
    Type {
        description: String,
        eid: String,
        text: String,
    },
    Scroll,
    Wait(u64),
    Close,
}

impl SurfaceCall {
    /// Everything except state extraction.
    pub fn is_action(&self) -> bool {
        !matches!(self, SurfaceCall::ExtractState | SurfaceCall::Close)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Extract,
    Navigate,
    Click,
    Type,
    Scroll,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<SurfaceCall>>>);

impl CallLog {
    fn push(&self, call: SurfaceCall) {
        lock(&self.0).push(call);
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        lock(&self.0).clone()
    }

    pub fn actions(&self) -> Vec<SurfaceCall> {
        self.calls().into_iter().filter(SurfaceCall::is_action).collect()
    }

    pub fn count(&self, call: &SurfaceCall) -> usize {
        lock(&self.0).iter().filter(|c| *c == call).count()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.0).contains(&SurfaceCall::Close)
    }
}

/// A surface backed by a fixed page snapshot. Click and type targets are
/// resolved against the snapshot, so unknown descriptions fail the way a
/// real page would.
pub struct FakeSurface {
    page: PageSnapshot,
    resolver: ElementResolver,
    log: CallLog,
    failures: Arc<Mutex<Vec<(Op, SurfaceError)>>>,
}

impl FakeSurface {
    pub fn new(page: PageSnapshot) -> Self {
        Self {
            page,
            resolver: ElementResolver::new(),
            log: CallLog::default(),
            failures: Arc::default(),
        }
    }

    /// Fail the next `op` with `err`. Failures queue up per operation.
    pub fn fail(self, op: Op, err: SurfaceError) -> Self {
        lock(&self.failures).push((op, err));
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn injected(&self, op: Op) -> Result<(), SurfaceError> {
        let mut failures = lock(&self.failures);
        match failures.iter().position(|(o, _)| *o == op) {
            Some(idx) => Err(failures.remove(idx).1),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Surface for FakeSurface {
    async fn extract_state(&mut self) -> Result<String, SurfaceError> {
        self.log.push(SurfaceCall::ExtractState);
        self.injected(Op::Extract)?;
        Ok(self.page.render())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        self.log.push(SurfaceCall::Navigate(url.to_string()));
        self.injected(Op::Navigate)?;
        self.page.url = url.to_string();
        Ok(())
    }

    async fn click_element(&mut self, description: &str) -> Result<(), SurfaceError> {
        self.injected(Op::Click)?;
        let found = self.resolver.resolve(description, Intent::Click, &self.page)?;
        self.log.push(SurfaceCall::Click {
            description: description.to_string(),
            eid: found.element.eid.clone(),
            strategy: found.strategy,
        });
        Ok(())
    }

    async fn type_text(&mut self, description: &str, text: &str) -> Result<(), SurfaceError> {
        self.injected(Op::Type)?;
        let found = self.resolver.resolve_fillable(description, &self.page)?;
        self.log.push(SurfaceCall::Type {
            description: description.to_string(),
            eid: found.element.eid.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn scroll_page(&mut self) -> Result<(), SurfaceError> {
        self.log.push(SurfaceCall::Scroll);
        self.injected(Op::Scroll)
    }

    async fn wait(&mut self, seconds: u64) {
        self.log.push(SurfaceCall::Wait(seconds));
    }

    async fn close(&mut self) -> Result<(), SurfaceError> {
        self.log.push(SurfaceCall::Close);
        Ok(())
    }
}

/// Hands out a fresh [`FakeSurface`] over the same page per request.
pub struct FakeSurfaceProvider {
    page: PageSnapshot,
    logs: Mutex<Vec<CallLog>>,
    unavailable: bool,
}

impl FakeSurfaceProvider {
    pub fn new(page: PageSnapshot) -> Self {
        Self {
            page,
            logs: Mutex::default(),
            unavailable: false,
        }
    }

    /// Every request fails with a driver error.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(PageSnapshot::default())
        }
    }

    /// One log per surface handed out, in creation order.
    pub fn logs(&self) -> Vec<CallLog> {
        lock(&self.logs).clone()
    }
}

#[async_trait]
impl SurfaceProvider for FakeSurfaceProvider {
    async fn new_surface(&self) -> Result<Box<dyn Surface>, SurfaceError> {
        if self.unavailable {
            return Err(SurfaceError::Driver("no browser available".into()));
        }
        let surface = FakeSurface::new(self.page.clone());
        lock(&self.logs).push(surface.log());
        Ok(Box::new(surface))
    }
}

/// Replays scripted decisions, then either repeats a fallback or reports
/// an empty response.
#[derive(Default)]
pub struct ScriptedBrain {
    script: Mutex<VecDeque<Result<Decision, DecisionError>>>,
    fallback: Option<Decision>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBrain {
    pub fn new(script: Vec<Result<Decision, DecisionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn repeating(decision: Decision) -> Self {
        Self {
            fallback: Some(decision),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Conversations sent so far, oldest first.
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl DecisionService for ScriptedBrain {
    async fn decide(&self, messages: &[ChatMessage]) -> Result<Decision, DecisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(messages.to_vec());
        match lock(&self.script).pop_front() {
            Some(next) => next,
            None => self.fallback.clone().ok_or(DecisionError::Empty),
        }
    }
}

#[derive(Clone, Default)]
pub struct PromptLog(Arc<Mutex<Vec<ConfirmationRequest>>>);

impl PromptLog {
    pub fn count(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn requests(&self) -> Vec<ConfirmationRequest> {
        lock(&self.0).clone()
    }
}

/// Answers confirmation prompts from a list; `None` once it runs out.
pub struct ScriptedConfirmer {
    replies: Mutex<VecDeque<Option<String>>>,
    prompts: PromptLog,
}

impl ScriptedConfirmer {
    pub fn new<S: Into<String>>(replies: Vec<Option<S>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(Into::into)).collect()),
            prompts: PromptLog::default(),
        }
    }

    pub fn prompts(&self) -> PromptLog {
        self.prompts.clone()
    }
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> Option<String> {
        lock(&self.prompts.0).push(request.clone());
        lock(&self.replies).pop_front().flatten()
    }
}
