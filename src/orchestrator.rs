//! Per-task step loop and the service that feeds it from the task queue.
//!
//! Each worker owns a [`TaskRunner`]: one surface handle and one auth
//! cache. History is created fresh for every task, so nothing mutable is
//! shared between concurrently running tasks.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::{self, AuthStateCache};
use crate::brain::DecisionService;
use crate::config::AgentConfig;
use crate::error::{AgentError, PoolError, SurfaceError};
use crate::events::{self, AgentEvent};
use crate::history::HistoryStore;
use crate::pool::{PoolMetrics, Worker, WorkerPool};
use crate::prompts::build_decision_prompt;
use crate::recovery::{self, Recovery};
use crate::security::SecurityGate;
use crate::submit::TaskProvider;
use crate::surface::{Surface, SurfaceProvider, normalize_url};
use crate::types::{Action, Decision, PoolTask, TaskOutcome, TaskReport};

/// Collaborators shared read-only by every worker.
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<AgentConfig>,
    pub brain: Arc<dyn DecisionService>,
    pub gate: Arc<SecurityGate>,
    pub events: broadcast::Sender<AgentEvent>,
    /// Hard cancellation, observed at every checkpoint of the step loop.
    pub cancel: CancellationToken,
}

impl AgentContext {
    pub fn new(config: AgentConfig, brain: Arc<dyn DecisionService>, gate: SecurityGate) -> Self {
        Self {
            config: Arc::new(config),
            brain,
            gate: Arc::new(gate),
            events: events::channel(),
            cancel: CancellationToken::new(),
        }
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Finished(TaskOutcome),
}

enum StepFlow {
    Continue,
    Completed,
    Cancelled,
}

pub struct TaskRunner {
    worker: usize,
    surface: Box<dyn Surface>,
    auth: AuthStateCache,
    /// Domain of the last page this worker observed.
    current_domain: Option<String>,
    ctx: AgentContext,
    state: RunState,
}

impl TaskRunner {
    pub fn new(worker: usize, surface: Box<dyn Surface>, ctx: AgentContext) -> Self {
        Self {
            worker,
            surface,
            auth: AuthStateCache::new(),
            current_domain: None,
            ctx,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn auth(&self) -> &AuthStateCache {
        &self.auth
    }

    /// Run a task with a fresh history.
    pub async fn run_task(&mut self, task: &PoolTask) -> TaskReport {
        let mut history = HistoryStore::new(self.ctx.config.history_capacity);
        self.run_with_history(task, &mut history).await
    }

    /// Run a task, recording steps into `history`.
    pub async fn run_with_history(&mut self, task: &PoolTask, history: &mut HistoryStore) -> TaskReport {
        let max_steps = self.ctx.config.max_steps;
        info!(task_id = %task.id, worker = self.worker, max_steps, text = %task.text, "starting task");
        if auth::requires_auth(&task.text) {
            let domain = self.current_domain.as_deref().unwrap_or_default();
            let state = self.auth.get(domain);
            info!(
                task_id = %task.id,
                domain,
                logged_in = state.is_logged_in,
                "task likely requires an authenticated session"
            );
        }
        self.ctx.emit(AgentEvent::TaskStarted {
            task_id: task.id.clone(),
            worker: self.worker,
        });
        self.state = RunState::Running;

        let (steps, outcome) = self.step_loop(task, history).await;

        match &outcome {
            TaskOutcome::Completed => info!(task_id = %task.id, steps, "task completed"),
            TaskOutcome::StepLimitReached => {
                warn!(task_id = %task.id, steps, "maximum steps reached, task may not be complete")
            }
            TaskOutcome::AbortedBySecurity => info!(task_id = %task.id, steps, "action cancelled by user"),
            TaskOutcome::AbortedByError(message) => {
                error!(task_id = %task.id, steps, error = %message, "task aborted")
            }
            TaskOutcome::Cancelled => warn!(task_id = %task.id, steps, "task cancelled"),
        }

        self.state = RunState::Finished(outcome.clone());
        self.ctx.emit(AgentEvent::TaskFinished {
            task_id: task.id.clone(),
            steps,
            outcome: outcome.clone(),
        });
        TaskReport {
            task_id: task.id.clone(),
            steps,
            outcome,
        }
    }

    async fn step_loop(&mut self, task: &PoolTask, history: &mut HistoryStore) -> (usize, TaskOutcome) {
        let max_steps = self.ctx.config.max_steps;
        let cancel = self.ctx.cancel.clone();

        for step in 1..=max_steps {
            if cancel.is_cancelled() {
                return (step - 1, TaskOutcome::Cancelled);
            }

            match self.run_step(task, step, history).await {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Completed) => return (step, TaskOutcome::Completed),
                Ok(StepFlow::Cancelled) => return (step, TaskOutcome::Cancelled),
                Err(AgentError::SecurityDenied) => return (step, TaskOutcome::AbortedBySecurity),
                Err(err) => return (step, TaskOutcome::AbortedByError(err.to_string())),
            }

            tokio::select! {
                _ = cancel.cancelled() => return (step, TaskOutcome::Cancelled),
                _ = tokio::time::sleep(self.ctx.config.step_delay) => {}
            }

            if step == max_steps {
                warn!(task_id = %task.id, step, "step limit reached");
            }
        }

        (max_steps, TaskOutcome::StepLimitReached)
    }

    async fn run_step(
        &mut self,
        task: &PoolTask,
        step: usize,
        history: &mut HistoryStore,
    ) -> Result<StepFlow, AgentError> {
        let page_state = self
            .surface
            .extract_state()
            .await
            .map_err(AgentError::StateExtraction)?;
        if let Some(domain) = self.auth.observe_page(&page_state) {
            self.current_domain = Some(domain);
        }
        if self.ctx.cancel.is_cancelled() {
            return Ok(StepFlow::Cancelled);
        }

        self.ctx.emit(AgentEvent::Thinking {
            task_id: task.id.clone(),
            step,
        });
        let messages = build_decision_prompt(&task.text, &page_state, &history.render());
        let decision = self.ctx.brain.decide(&messages).await?;
        info!(
            task_id = %task.id,
            step,
            action = %decision.action,
            target = decision.target_str(),
            reasoning = %decision.reasoning,
            "next action"
        );
        if self.ctx.cancel.is_cancelled() {
            return Ok(StepFlow::Cancelled);
        }

        // A confirmation prompt may wait on a human for a long time.
        let allowed = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => return Ok(StepFlow::Cancelled),
            allowed = self
                .ctx
                .gate
                .check(decision.action.as_str(), decision.target_str(), &decision.reasoning) => allowed,
        };
        if self.ctx.cancel.is_cancelled() {
            return Ok(StepFlow::Cancelled);
        }
        if !allowed {
            return Err(AgentError::SecurityDenied);
        }

        self.ctx.emit(AgentEvent::Step {
            task_id: task.id.clone(),
            step,
            description: decision.summary(),
        });

        match self.execute(&decision).await {
            Ok(()) => {}
            Err(AgentError::Surface(err)) => {
                warn!(task_id = %task.id, step, error = %err, "action failed");
                self.ctx.emit(AgentEvent::StepError {
                    task_id: task.id.clone(),
                    step,
                    message: err.to_string(),
                });
                let recovery = recovery::classify(&err.to_string());
                if !recovery.is_retry() {
                    return Err(AgentError::Unrecoverable(err));
                }
                self.recover(recovery).await;
            }
            Err(err) => return Err(err),
        }

        history.append(decision.summary());

        if decision.completed {
            return Ok(StepFlow::Completed);
        }
        Ok(StepFlow::Continue)
    }

    async fn execute(&mut self, decision: &Decision) -> Result<(), AgentError> {
        let target = decision.target_str();
        match &decision.action {
            Action::Click => self.surface.click_element(target).await?,
            Action::Type => {
                let text = decision.text.as_deref().unwrap_or_default();
                self.surface.type_text(target, text).await?;
            }
            Action::Navigate => {
                let url = decision
                    .url
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| SurfaceError::Navigation("no url given".into()))?;
                self.surface.navigate(&normalize_url(url)).await?;
            }
            Action::Scroll => self.surface.scroll_page().await?,
            Action::Wait => self.surface.wait(self.ctx.config.wait_seconds).await,
            Action::WaitUser => info!(worker = self.worker, "waiting for user intervention"),
            Action::Complete => {}
            Action::Unknown(raw) => return Err(AgentError::UnknownAction(raw.clone())),
        }
        Ok(())
    }

    async fn recover(&mut self, recovery: Recovery) {
        match recovery {
            Recovery::Scroll => {
                info!(worker = self.worker, "element not reachable, scrolling");
                if let Err(e) = self.surface.scroll_page().await {
                    warn!(error = %e, "recovery scroll failed");
                }
            }
            Recovery::WaitForNavigation => {
                info!(worker = self.worker, "navigation issue, waiting");
                self.surface.wait(self.ctx.config.navigation_wait).await;
            }
            Recovery::Abort => {}
        }
    }
}

#[async_trait]
impl Worker for TaskRunner {
    async fn run(&mut self, task: PoolTask) {
        self.run_task(&task).await;
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.surface.close().await {
            warn!(worker = self.worker, error = %e, "failed to close surface");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

/// Owns the queue, the workers and their surfaces.
pub struct Orchestrator {
    ctx: AgentContext,
    surfaces: Arc<dyn SurfaceProvider>,
    pool: WorkerPool,
    intake: TaskProvider,
    intake_rx: Mutex<Option<mpsc::Receiver<PoolTask>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Orchestrator {
    pub fn new(ctx: AgentContext, surfaces: Arc<dyn SurfaceProvider>) -> Self {
        let config = ctx.config.clone();
        let (intake, intake_rx) = TaskProvider::new(config.queue_capacity);
        Self {
            pool: WorkerPool::new(config.workers, config.queue_capacity),
            intake: intake.with_events(ctx.events.clone()),
            intake_rx: Mutex::new(Some(intake_rx)),
            lifecycle: Mutex::new(Lifecycle::Idle),
            ctx,
            surfaces,
        }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.ctx.events.subscribe()
    }

    /// A cloneable handle for submitting tasks from elsewhere.
    pub fn submitter(&self) -> TaskProvider {
        self.intake.clone()
    }

    /// Acquire one surface per worker, then begin dispatching. Additional
    /// task sources are merged with the built-in intake.
    pub async fn start(&self, extra_sources: Vec<mpsc::Receiver<PoolTask>>) -> Result<(), AgentError> {
        self.ctx.config.validate()?;
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Err(PoolError::AlreadyStarted.into()),
                Lifecycle::Stopped => return Err(PoolError::PoolClosed.into()),
            }
        }

        let workers = self.pool.limits().current;
        let mut runners = Vec::with_capacity(workers);
        for id in 0..workers {
            match self.surfaces.new_surface().await {
                Ok(surface) => runners.push(TaskRunner::new(id, surface, self.ctx.clone())),
                Err(e) => {
                    error!(worker = id, error = %e, "failed to acquire surface");
                    self.abandon_start(runners, Lifecycle::Idle).await;
                    return Err(e.into());
                }
            }
        }

        if let Err((e, runners)) = self.pool.start(runners) {
            error!(error = %e, "pool refused to start");
            let lifecycle = match e {
                PoolError::PoolClosed => Lifecycle::Stopped,
                _ => Lifecycle::Idle,
            };
            self.abandon_start(runners, lifecycle).await;
            return Err(e.into());
        }

        let mut sources = extra_sources;
        if let Some(intake) = self
            .intake_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sources.insert(0, intake);
        }
        self.pool.attach_sources(sources);
        Ok(())
    }

    /// Release the surfaces of workers that never got to run.
    async fn abandon_start(&self, mut runners: Vec<TaskRunner>, lifecycle: Lifecycle) {
        for runner in &mut runners {
            runner.shutdown().await;
        }
        let mut current = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        // A concurrent stop wins.
        if *current != Lifecycle::Stopped {
            *current = lifecycle;
        }
    }

    /// Queue a task and return its id.
    pub async fn submit(&self, text: impl Into<String>) -> Result<String, PoolError> {
        if self.pool.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        self.intake.submit(text).await
    }

    /// Stop taking tasks, let in-flight tasks finish, close surfaces.
    /// Accepted tasks that never reached a worker are counted in
    /// [`PoolMetrics::discarded`].
    pub async fn stop(&self) {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = Lifecycle::Stopped;
        // Never started: hand the intake to the pool so its backlog is counted.
        let intake = self
            .intake_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(intake) = intake {
            self.pool.attach_sources(vec![intake]);
        }
        self.pool.stop().await;
    }

    /// Interrupt in-flight tasks at their next checkpoint.
    pub fn cancel(&self) {
        self.ctx.cancel.cancel();
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::WorkerLimits;
    use crate::error::{ConfigError, DecisionError};
    use crate::page::{PageElement, PageSnapshot};
    use crate::security::{ConfirmationRequest, Confirmer};
    use crate::test_support::{
        FakeSurface, FakeSurfaceProvider, Op, PromptLog, ScriptedBrain, ScriptedConfirmer, SurfaceCall,
    };

    fn shop_page() -> PageSnapshot {
        PageSnapshot::new("https://shop.example.com/", "Shop")
            .with_element(PageElement::new("e0", "button", "Login"))
            .with_element(PageElement::new("e1", "button", "Buy now"))
            .with_element(PageElement::new("e2", "a", "Log out"))
            .with_element(PageElement::new("e3", "input", "").with_attr("placeholder", "Search"))
    }

    fn config(max_steps: usize) -> AgentConfig {
        AgentConfig {
            max_steps,
            step_delay: Duration::ZERO,
            ..AgentConfig::default()
        }
    }

    struct Harness {
        runner: TaskRunner,
        brain: Arc<ScriptedBrain>,
        prompts: PromptLog,
        log: crate::test_support::CallLog,
        history: HistoryStore,
    }

    impl Harness {
        fn new(max_steps: usize, brain: ScriptedBrain, replies: Vec<Option<&str>>, surface: FakeSurface) -> Self {
            let brain = Arc::new(brain);
            let confirmer = ScriptedConfirmer::new(replies);
            let prompts = confirmer.prompts();
            let ctx = AgentContext::new(config(max_steps), brain.clone(), SecurityGate::new(Box::new(confirmer)));
            let log = surface.log();
            Self {
                runner: TaskRunner::new(0, Box::new(surface), ctx),
                brain,
                prompts,
                log,
                history: HistoryStore::new(crate::config::DEFAULT_HISTORY_CAPACITY),
            }
        }

        fn scripted(max_steps: usize, script: Vec<Result<Decision, DecisionError>>) -> Self {
            Self::new(max_steps, ScriptedBrain::new(script), vec![], FakeSurface::new(shop_page()))
        }

        async fn run(&mut self, text: &str) -> TaskReport {
            let task = PoolTask::new("t-1", text);
            self.runner.run_with_history(&task, &mut self.history).await
        }

        fn history(&self) -> Vec<&str> {
            self.history.entries().collect()
        }
    }

    #[tokio::test]
    async fn navigate_then_complete() {
        let mut h = Harness::scripted(
            10,
            vec![
                Ok(Decision::new(Action::Navigate, "open the site").with_url("example.com")),
                Ok(Decision::new(Action::Complete, "nothing left").completed()),
            ],
        );
        let report = h.run("open example.com").await;

        assert_eq!(report.outcome, TaskOutcome::Completed);
        assert_eq!(report.steps, 2);
        assert_eq!(h.log.actions(), vec![SurfaceCall::Navigate("https://example.com".into())]);
        assert_eq!(h.history().len(), 2);
        assert_eq!(h.prompts.count(), 0);
        assert_eq!(h.runner.state(), &RunState::Finished(TaskOutcome::Completed));
    }

    #[tokio::test]
    async fn click_by_exact_text_is_recorded_and_loop_continues() {
        let mut h = Harness::scripted(
            10,
            vec![
                Ok(Decision::new(Action::Click, "open the sign-in form").with_target("Login")),
                Ok(Decision::new(Action::Complete, "finished").completed()),
            ],
        );
        let report = h.run("click login button").await;

        assert_eq!(
            h.log.actions(),
            vec![SurfaceCall::Click {
                description: "Login".into(),
                eid: "e0".into(),
                strategy: "exact_text",
            }]
        );
        assert_eq!(h.history()[0], "click: Login -> open the sign-in form");
        assert_eq!(h.brain.calls(), 2);
        assert_eq!(report.outcome, TaskOutcome::Completed);
    }

    #[tokio::test]
    async fn default_budget_stops_after_fifty_steps() {
        let brain = ScriptedBrain::repeating(Decision::new(Action::Scroll, "keep looking"));
        let mut h = Harness::new(crate::config::DEFAULT_MAX_STEPS, brain, vec![], FakeSurface::new(shop_page()));
        let report = h.run("find the archive").await;

        assert_eq!(report.outcome, TaskOutcome::StepLimitReached);
        assert_eq!(report.steps, 50);
        assert_eq!(h.brain.calls(), 50);
        assert_eq!(h.log.count(&SurfaceCall::Scroll), 50);
    }

    #[tokio::test]
    async fn denied_sensitive_action_executes_nothing() {
        let mut h = Harness::new(
            10,
            ScriptedBrain::new(vec![Ok(Decision::new(Action::Click, "add to cart").with_target("Buy now"))]),
            vec![Some("n")],
            FakeSurface::new(shop_page()),
        );
        let report = h.run("get me a kettle").await;

        assert_eq!(report.outcome, TaskOutcome::AbortedBySecurity);
        assert_eq!(report.steps, 1);
        assert!(h.log.actions().is_empty());
        assert!(h.history().is_empty());
        assert_eq!(h.prompts.count(), 1);
        assert_eq!(h.prompts.requests()[0].matched_term, "buy");
    }

    #[tokio::test]
    async fn approved_sensitive_action_runs() {
        let mut h = Harness::new(
            10,
            ScriptedBrain::new(vec![Ok(Decision::new(Action::Click, "add to cart")
                .with_target("Buy now")
                .completed())]),
            vec![Some("y")],
            FakeSurface::new(shop_page()),
        );
        let report = h.run("get me a kettle").await;

        assert_eq!(report.outcome, TaskOutcome::Completed);
        assert_eq!(
            h.log.actions(),
            vec![SurfaceCall::Click {
                description: "Buy now".into(),
                eid: "e1".into(),
                strategy: "exact_text",
            }]
        );
    }

    #[tokio::test]
    async fn history_keeps_the_last_fifteen_steps() {
        let script = (1..=16)
            .map(|i| Ok(Decision::new(Action::Scroll, format!("look {i}"))))
            .collect();
        let mut h = Harness::scripted(16, script);
        let report = h.run("read everything").await;

        assert_eq!(report.outcome, TaskOutcome::StepLimitReached);
        assert_eq!(report.steps, 16);
        assert_eq!(h.brain.calls(), 16);
        let history = h.history();
        assert_eq!(history.len(), 15);
        assert_eq!(history[0], "scroll:  -> look 2");
        assert_eq!(history[14], "scroll:  -> look 16");
    }

    #[tokio::test]
    async fn prompt_carries_recent_history() {
        let mut h = Harness::scripted(
            10,
            vec![
                Ok(Decision::new(Action::Scroll, "look around")),
                Ok(Decision::new(Action::Complete, "finished").completed()),
            ],
        );
        h.run("browse").await;

        let prompts = h.brain.prompts();
        assert!(prompts[0][1].content.contains("No recent actions"));
        assert!(prompts[1][1].content.contains("scroll:  -> look around"));
        assert!(prompts[1][1].content.contains("Current URL: https://shop.example.com/"));
    }

    #[tokio::test]
    async fn missing_element_scrolls_and_continues() {
        let surface = FakeSurface::new(shop_page()).fail(Op::Click, SurfaceError::ElementNotFound("Login".into()));
        let mut h = Harness::new(
            10,
            ScriptedBrain::new(vec![
                Ok(Decision::new(Action::Click, "sign in first").with_target("Login")),
                Ok(Decision::new(Action::Complete, "finished").completed()),
            ]),
            vec![],
            surface,
        );
        let report = h.run("log in").await;

        assert_eq!(report.outcome, TaskOutcome::Completed);
        assert_eq!(report.steps, 2);
        assert_eq!(h.log.actions(), vec![SurfaceCall::Scroll]);
        assert_eq!(h.history()[0], "click: Login -> sign in first");
    }

    #[tokio::test]
    async fn navigation_failure_waits_and_continues() {
        let surface = FakeSurface::new(shop_page()).fail(Op::Navigate, SurfaceError::Navigation("timeout".into()));
        let mut h = Harness::new(
            10,
            ScriptedBrain::new(vec![
                Ok(Decision::new(Action::Navigate, "go home").with_url("https://example.com")),
                Ok(Decision::new(Action::Complete, "finished").completed()),
            ]),
            vec![],
            surface,
        );
        let report = h.run("go home").await;

        assert_eq!(report.outcome, TaskOutcome::Completed);
        assert_eq!(
            h.log.actions(),
            vec![SurfaceCall::Navigate("https://example.com".into()), SurfaceCall::Wait(5)]
        );
    }

    #[tokio::test]
    async fn driver_failure_aborts() {
        let surface = FakeSurface::new(shop_page()).fail(Op::Click, SurfaceError::Driver("connection reset".into()));
        let mut h = Harness::new(
            10,
            ScriptedBrain::new(vec![Ok(Decision::new(Action::Click, "sign in first").with_target("Login"))]),
            vec![],
            surface,
        );
        let report = h.run("log in").await;

        let TaskOutcome::AbortedByError(message) = &report.outcome else {
            panic!("unexpected outcome {:?}", report.outcome);
        };
        assert!(message.contains("connection reset"), "{message}");
        assert!(h.history().is_empty());
    }

    #[tokio::test]
    async fn malformed_decision_aborts_without_retry() {
        let mut h = Harness::scripted(
            10,
            vec![
                Ok(Decision::new(Action::Scroll, "look 1")),
                Ok(Decision::new(Action::Scroll, "look 2")),
                Err(DecisionError::Malformed("expected value at line 1".into())),
                Ok(Decision::new(Action::Complete, "never reached").completed()),
            ],
        );
        let report = h.run("browse").await;

        assert!(matches!(report.outcome, TaskOutcome::AbortedByError(_)));
        assert_eq!(report.steps, 3);
        assert_eq!(h.brain.calls(), 3);
        assert_eq!(h.history().len(), 2);
        assert_eq!(h.log.actions(), vec![SurfaceCall::Scroll, SurfaceCall::Scroll]);
    }

    #[tokio::test]
    async fn unknown_action_is_fatal() {
        let mut h = Harness::scripted(10, vec![Ok(Decision::new(Action::Unknown("hover".into()), "hmm"))]);
        let report = h.run("browse").await;

        assert_eq!(report.outcome, TaskOutcome::AbortedByError("unknown action: hover".into()));
        assert!(h.log.actions().is_empty());
        assert!(h.history().is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_aborts_before_deciding() {
        let surface = FakeSurface::new(shop_page()).fail(Op::Extract, SurfaceError::Driver("tab crashed".into()));
        let mut h = Harness::new(10, ScriptedBrain::default(), vec![], surface);
        let report = h.run("browse").await;

        let TaskOutcome::AbortedByError(message) = &report.outcome else {
            panic!("unexpected outcome {:?}", report.outcome);
        };
        assert!(message.starts_with("failed to extract page state"), "{message}");
        assert_eq!(h.brain.calls(), 0);
    }

    #[tokio::test]
    async fn only_the_completed_flag_ends_a_task() {
        let mut h = Harness::scripted(
            2,
            vec![
                Ok(Decision::new(Action::Complete, "looks finished")),
                Ok(Decision::new(Action::Complete, "still looks finished")),
            ],
        );
        let report = h.run("browse").await;

        assert_eq!(report.outcome, TaskOutcome::StepLimitReached);
        assert_eq!(h.history().len(), 2);
    }

    #[tokio::test]
    async fn type_falls_back_to_first_input_and_wait_uses_configured_seconds() {
        let mut h = Harness::scripted(
            10,
            vec![
                Ok(Decision::new(Action::Type, "enter the query")
                    .with_target("query box")
                    .with_text("kettle")),
                Ok(Decision::new(Action::Wait, "let results load")),
                Ok(Decision::new(Action::WaitUser, "captcha shown")),
                Ok(Decision::new(Action::Complete, "finished").completed()),
            ],
        );
        let report = h.run("search for a kettle").await;

        assert_eq!(report.outcome, TaskOutcome::Completed);
        assert_eq!(
            h.log.actions(),
            vec![
                SurfaceCall::Type {
                    description: "query box".into(),
                    eid: "e3".into(),
                    text: "kettle".into(),
                },
                SurfaceCall::Wait(3),
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_no_steps() {
        let mut h = Harness::scripted(10, vec![Ok(Decision::new(Action::Scroll, "look"))]);
        h.runner.ctx.cancel.cancel();
        let report = h.run("browse").await;

        assert_eq!(report.outcome, TaskOutcome::Cancelled);
        assert_eq!(report.steps, 0);
        assert_eq!(h.brain.calls(), 0);
    }

    /// Trips the token while the operator is being asked, then answers.
    struct CancelWhileAsking {
        cancel: CancellationToken,
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl Confirmer for CancelWhileAsking {
        async fn confirm(&self, _request: &ConfirmationRequest) -> Option<String> {
            self.cancel.cancel();
            match self.reply {
                Some(reply) => Some(reply.to_string()),
                None => std::future::pending().await,
            }
        }
    }

    fn runner_with_confirmer(reply: Option<&'static str>) -> (TaskRunner, crate::test_support::CallLog) {
        let brain = ScriptedBrain::new(vec![
            Ok(Decision::new(Action::Click, "purchase the item").with_target("Buy now")),
            Ok(Decision::new(Action::Complete, "bought").completed()),
        ]);
        let cancel = CancellationToken::new();
        let gate = SecurityGate::new(Box::new(CancelWhileAsking {
            cancel: cancel.clone(),
            reply,
        }));
        let ctx = AgentContext {
            cancel,
            ..AgentContext::new(config(10), Arc::new(brain), gate)
        };
        let surface = FakeSurface::new(shop_page());
        let log = surface.log();
        (TaskRunner::new(0, Box::new(surface), ctx), log)
    }

    #[tokio::test]
    async fn cancelled_during_confirmation_skips_the_approved_action() {
        let (mut runner, log) = runner_with_confirmer(Some("y"));
        let report = runner.run_task(&PoolTask::new("t-1", "buy it")).await;

        assert_eq!(report.outcome, TaskOutcome::Cancelled);
        assert_eq!(report.steps, 1);
        assert!(log.actions().is_empty());
    }

    #[tokio::test]
    async fn cancel_interrupts_an_unanswered_confirmation() {
        let (mut runner, log) = runner_with_confirmer(None);
        let report = tokio::time::timeout(Duration::from_secs(5), runner.run_task(&PoolTask::new("t-1", "buy it")))
            .await
            .expect("a pending prompt must not outlive cancellation");

        assert_eq!(report.outcome, TaskOutcome::Cancelled);
        assert!(log.actions().is_empty());
    }

    #[tokio::test]
    async fn auth_cache_tracks_observed_pages() {
        let mut h = Harness::scripted(10, vec![Ok(Decision::new(Action::Complete, "finished").completed())]);
        h.run("check my account").await;

        let state = h.runner.auth().get("shop.example.com");
        assert!(state.is_logged_in);
        assert_eq!(state.domain, "shop.example.com");
    }

    #[tokio::test]
    async fn finished_event_is_published() {
        let mut h = Harness::scripted(10, vec![Ok(Decision::new(Action::Complete, "finished").completed())]);
        let mut events = h.runner.ctx.events.subscribe();
        h.run("browse").await;

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names, vec!["task_started", "thinking", "step", "task_finished"]);
    }

    #[tokio::test]
    async fn orchestrator_start_fails_without_surfaces() {
        let ctx = AgentContext::new(
            config(5),
            Arc::new(ScriptedBrain::default()),
            SecurityGate::new(Box::new(ScriptedConfirmer::new(Vec::<Option<&str>>::new()))),
        );
        let orchestrator = Orchestrator::new(ctx, Arc::new(FakeSurfaceProvider::unavailable()));

        assert!(matches!(orchestrator.start(vec![]).await, Err(AgentError::Surface(_))));
    }

    #[tokio::test]
    async fn orchestrator_refuses_invalid_config() {
        let provider = Arc::new(FakeSurfaceProvider::new(shop_page()));
        let ctx = AgentContext::new(
            config(0),
            Arc::new(ScriptedBrain::default()),
            SecurityGate::new(Box::new(ScriptedConfirmer::new(Vec::<Option<&str>>::new()))),
        );
        let orchestrator = Orchestrator::new(ctx, provider.clone());

        assert!(matches!(
            orchestrator.start(vec![]).await,
            Err(AgentError::Config(ConfigError::Invalid { name: "max_steps", .. }))
        ));
        assert!(provider.logs().is_empty());
    }

    #[tokio::test]
    async fn orchestrator_rejects_second_start_and_late_submits() {
        let mut cfg = config(5);
        cfg.workers = WorkerLimits::fixed(2).unwrap();
        let provider = Arc::new(FakeSurfaceProvider::new(shop_page()));
        let ctx = AgentContext::new(
            cfg,
            Arc::new(ScriptedBrain::default()),
            SecurityGate::new(Box::new(ScriptedConfirmer::new(Vec::<Option<&str>>::new()))),
        );
        let orchestrator = Orchestrator::new(ctx, provider.clone());

        orchestrator.start(vec![]).await.unwrap();
        assert_eq!(provider.logs().len(), 2);
        assert!(matches!(
            orchestrator.start(vec![]).await,
            Err(AgentError::Pool(PoolError::AlreadyStarted))
        ));

        orchestrator.stop().await;
        assert!(provider.logs().iter().all(|log| log.is_closed()));
        assert_eq!(orchestrator.submit("too late").await, Err(PoolError::PoolClosed));
    }

    fn idle_orchestrator(provider: Arc<dyn SurfaceProvider>) -> Orchestrator {
        let ctx = AgentContext::new(
            config(5),
            Arc::new(ScriptedBrain::default()),
            SecurityGate::new(Box::new(ScriptedConfirmer::new(Vec::<Option<&str>>::new()))),
        );
        Orchestrator::new(ctx, provider)
    }

    #[tokio::test]
    async fn stop_counts_submissions_that_never_reached_a_worker() {
        let orchestrator = idle_orchestrator(Arc::new(FakeSurfaceProvider::new(shop_page())));
        let submitter = orchestrator.submitter();
        submitter.submit("first").await.unwrap();
        submitter.submit("second").await.unwrap();

        orchestrator.stop().await;
        assert_eq!(orchestrator.metrics().discarded, 2);
        assert_eq!(orchestrator.metrics().dispatched, 0);
    }

    /// Hands out surfaces only once released, announcing each request.
    struct HeldProvider {
        inner: FakeSurfaceProvider,
        requested: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl SurfaceProvider for HeldProvider {
        async fn new_surface(&self) -> Result<Box<dyn Surface>, SurfaceError> {
            self.requested.notify_one();
            self.release.notified().await;
            self.inner.new_surface().await
        }
    }

    #[tokio::test]
    async fn stop_during_start_releases_acquired_surfaces() {
        let requested = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let provider = Arc::new(HeldProvider {
            inner: FakeSurfaceProvider::new(shop_page()),
            requested: requested.clone(),
            release: release.clone(),
        });
        let orchestrator = Arc::new(idle_orchestrator(provider.clone()));

        let starting = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.start(vec![]).await })
        };
        requested.notified().await;
        orchestrator.stop().await;
        release.notify_one();

        let started = starting.await.unwrap();
        assert!(matches!(started, Err(AgentError::Pool(PoolError::PoolClosed))));
        let logs = provider.inner.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].is_closed());
        assert!(matches!(
            orchestrator.start(vec![]).await,
            Err(AgentError::Pool(PoolError::PoolClosed))
        ));
    }
}
