//! Scenario runner state machine.
//!
//! ```text
//! Init -> Navigating -> (Waiting | Locating | Acting | Asserting | Capturing)* -> Done(Success)
//!   any state after Init -> CapturingFailure -> Done(Failure)
//! ```
//!
//! The runner owns the browser session for the duration of a run and
//! releases it exactly once before entering a terminal state, whatever the
//! outcome. Nothing escapes [`ScenarioRunner::run`] as an error: every
//! failure ends up in the returned [`RunResult`].
//!
//! Retries are limited to one re-resolve-and-retry when an action or
//! assertion finds its target stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionExecutor, ActionOutcome};
use crate::artifact::{snapshot, Artifact, CaptureMode, CaptureOutcome, PreparedFixtures};
use crate::assertion::{check, AssertionOutcome};
use crate::config::HarnessConfig;
use crate::resolver::ResolvedTarget;
use crate::result::{ErrorDetail, FailureKind};
use crate::scenario::{ActStep, AssertStep, CaptureStep, LocateStep, OnTimeout, Scenario, Step, WaitStep};
use crate::selector::{MultiMatchPolicy, SelectorChain};
use crate::session::{Launcher, Page, SessionGuard};
use crate::wait::{await_condition, await_presence, PollOutcome, PresenceMiss, WaitCondition, WaitContext, WaitOutcome};

// =============================================================================
// STATES AND RESULTS
// =============================================================================

/// Overall scenario outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every step passed (advisory timeouts included)
    Success,
    /// The run stopped on a failure of this kind
    Failure(FailureKind),
}

impl Outcome {
    /// Whether the scenario succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Acquiring fixtures and the session
    Init,
    /// Loading a URL
    Navigating,
    /// Bounded wait
    Waiting,
    /// Resolving a selector chain
    Locating,
    /// Performing an action
    Acting,
    /// Checking a condition
    Asserting,
    /// Writing a requested screenshot
    Capturing,
    /// Writing the failure screenshot
    CapturingFailure,
    /// Terminal
    Done(Outcome),
}

impl RunnerState {
    /// Whether this is a terminal state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    const fn for_step(step: &Step) -> Self {
        match step {
            Step::Navigate(_) => Self::Navigating,
            Step::Wait(_) => Self::Waiting,
            Step::Locate(_) => Self::Locating,
            Step::Act(_) => Self::Acting,
            Step::Assert(_) => Self::Asserting,
            Step::Capture(_) => Self::Capturing,
        }
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Navigating => f.write_str("navigating"),
            Self::Waiting => f.write_str("waiting"),
            Self::Locating => f.write_str("locating"),
            Self::Acting => f.write_str("acting"),
            Self::Asserting => f.write_str("asserting"),
            Self::Capturing => f.write_str("capturing"),
            Self::CapturingFailure => f.write_str("capturing-failure"),
            Self::Done(Outcome::Success) => f.write_str("done(success)"),
            Self::Done(Outcome::Failure(kind)) => write!(f, "done(failure: {kind})"),
        }
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step completed
    Passed,
    /// Step timed out under `log_and_continue`
    TimedOutContinued,
    /// Step failed and stopped the run
    Failed,
}

/// Per-step record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Zero-based step index
    pub index: usize,
    /// Step label
    pub label: String,
    /// How the step ended
    pub status: StepStatus,
    /// Wall time spent in the step
    pub duration_ms: u64,
    /// Strategy used, timeout state or failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of one scenario execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Scenario name
    pub scenario_name: String,
    /// Overall outcome
    pub outcome: Outcome,
    /// Written artifacts in capture order
    pub artifacts: Vec<Artifact>,
    /// Failure detail (None on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// State transitions in order, ending in a terminal state
    pub transitions: Vec<RunnerState>,
    /// Per-step records
    pub step_reports: Vec<StepReport>,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Total duration
    pub duration_ms: u64,
}

impl RunResult {
    /// Artifact paths in capture order
    #[must_use]
    pub fn artifact_paths(&self) -> Vec<&Path> {
        self.artifacts.iter().map(|a| a.path.as_path()).collect()
    }

    /// Whether the scenario succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    fn aborted(scenario_name: String, message: &str) -> Self {
        let kind = FailureKind::Internal;
        Self {
            scenario_name,
            outcome: Outcome::Failure(kind),
            artifacts: Vec::new(),
            error: Some(ErrorDetail::new(kind, message)),
            transitions: vec![RunnerState::Init, RunnerState::Done(Outcome::Failure(kind))],
            step_reports: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Receives progress while scenarios run
pub trait RunObserver: Send + Sync {
    /// State entered
    fn on_transition(&self, _scenario: &str, _state: RunnerState) {}

    /// Step finished
    fn on_step(&self, _scenario: &str, _report: &StepReport) {}

    /// Scenario finished
    fn on_finish(&self, _result: &RunResult) {}
}

// =============================================================================
// RUNNER
// =============================================================================

/// Runs scenarios against sessions from a [`Launcher`]
#[derive(Clone)]
pub struct ScenarioRunner {
    config: HarnessConfig,
    launcher: Arc<dyn Launcher>,
    observer: Option<Arc<dyn RunObserver>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ScenarioRunner {
    /// Create a runner
    #[must_use]
    pub fn new(config: HarnessConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report progress to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use an external cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels every run of this runner
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Harness configuration
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one scenario to a terminal state
    pub async fn run(&self, scenario: &Scenario) -> RunResult {
        let result = Run::new(self, scenario).execute().await;
        if let Some(ref observer) = self.observer {
            observer.on_finish(&result);
        }
        result
    }

    /// Run scenarios concurrently, at most `jobs` at a time, each with its
    /// own session. Results keep the input order.
    pub async fn run_all(&self, scenarios: Vec<Scenario>, jobs: usize) -> Vec<RunResult> {
        let permits = Arc::new(Semaphore::new(jobs.max(1)));
        let names: Vec<String> = scenarios.iter().map(|s| s.name.clone()).collect();
        let mut set = JoinSet::new();
        for (index, scenario) in scenarios.into_iter().enumerate() {
            let runner = self.clone();
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                // Inner task so a panic is reported against its scenario
                let joined = tokio::spawn(async move { runner.run(&scenario).await }).await;
                (index, joined)
            });
        }

        let mut slots: Vec<Option<RunResult>> = names.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(result))) => slots[index] = Some(result),
                Ok((index, Err(e))) => {
                    let name = names[index].clone();
                    tracing::error!(scenario = %name, error = %e, "scenario task failed");
                    slots[index] = Some(RunResult::aborted(name, &task_failure(&e)));
                }
                Err(e) => tracing::error!(error = %e, "scenario task failed"),
            }
        }
        slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| RunResult::aborted(name, "scenario task ended without a result"))
            })
            .collect()
    }
}

fn task_failure(e: &tokio::task::JoinError) -> String {
    if e.is_panic() {
        format!("scenario task panicked: {e}")
    } else {
        format!("scenario task was cancelled: {e}")
    }
}

// =============================================================================
// SINGLE RUN
// =============================================================================

/// A located target plus what is needed to locate it again
#[derive(Debug, Clone)]
struct Located {
    target: ResolvedTarget,
    rules: SelectorChain,
    within: Option<String>,
    policy: MultiMatchPolicy,
}

#[derive(Debug)]
enum StepResult {
    Passed(Option<String>),
    Continued(String),
    Failed(ErrorDetail),
}

fn failed(kind: FailureKind, message: impl Into<String>) -> StepResult {
    StepResult::Failed(ErrorDetail::new(kind, message))
}

/// Replace characters that do not belong in a file name
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

struct Run<'r> {
    runner: &'r ScenarioRunner,
    scenario: &'r Scenario,
    config: HarnessConfig,
    wait: WaitContext,
    executor: ActionExecutor,
    transitions: Vec<RunnerState>,
    artifacts: Vec<Artifact>,
    reports: Vec<StepReport>,
    targets: HashMap<String, Located>,
    fixtures: PreparedFixtures,
}

impl<'r> Run<'r> {
    fn new(runner: &'r ScenarioRunner, scenario: &'r Scenario) -> Self {
        let mut config = runner.config.clone();
        if let Some(ref url) = scenario.base_url {
            config.base_url.clone_from(url);
        }
        if let Some(viewport) = scenario.viewport {
            config.browser.viewport = viewport;
        }
        let wait = WaitContext::new(config.poll_interval())
            .with_policy(config.multi_match)
            .with_cancel(runner.cancel.clone());
        let executor = ActionExecutor::new(&config.timeouts, runner.cancel.clone());
        Self {
            runner,
            scenario,
            config,
            wait,
            executor,
            transitions: Vec::new(),
            artifacts: Vec::new(),
            reports: Vec::new(),
            targets: HashMap::new(),
            fixtures: PreparedFixtures::default(),
        }
    }

    fn transition(&mut self, state: RunnerState) {
        if self.transitions.last() == Some(&state) {
            return;
        }
        tracing::info!(scenario = %self.scenario.name, state = %state, "state transition");
        self.transitions.push(state);
        if let Some(ref observer) = self.runner.observer {
            observer.on_transition(&self.scenario.name, state);
        }
    }

    fn report(&mut self, report: StepReport) {
        if let Some(ref observer) = self.runner.observer {
            observer.on_step(&self.scenario.name, &report);
        }
        self.reports.push(report);
    }

    async fn execute(mut self) -> RunResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.transition(RunnerState::Init);

        let error = match PreparedFixtures::prepare(&self.scenario.fixtures).await {
            Ok(fixtures) => {
                self.fixtures = fixtures;
                self.with_session().await
            }
            Err(e) => Some(ErrorDetail::new(FailureKind::IoFailure, e.to_string())),
        };
        self.fixtures.cleanup().await;

        let outcome = error
            .as_ref()
            .map_or(Outcome::Success, |e| Outcome::Failure(e.kind));
        self.transition(RunnerState::Done(outcome));
        match error {
            Some(ref e) => tracing::warn!(scenario = %self.scenario.name, error = %e, "scenario failed"),
            None => tracing::info!(scenario = %self.scenario.name, "scenario passed"),
        }

        RunResult {
            scenario_name: self.scenario.name.clone(),
            outcome,
            artifacts: self.artifacts,
            error,
            transitions: self.transitions,
            step_reports: self.reports,
            started_at,
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Acquire the session, drive it, release it
    async fn with_session(&mut self) -> Option<ErrorDetail> {
        let cancel = self.runner.cancel.clone();
        let launch = self.runner.launcher.launch(&self.config.browser);
        let session = tokio::select! {
            () = cancel.cancelled() => {
                return Some(ErrorDetail::new(FailureKind::Cancelled, "cancelled before launch"));
            }
            launched = tokio::time::timeout(self.config.timeouts.navigation(), launch) => match launched {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => return Some(ErrorDetail::new(FailureKind::NavigationError, e.to_string())),
                Err(_) => {
                    return Some(ErrorDetail::new(
                        FailureKind::NavigationError,
                        "browser did not start in time",
                    ))
                }
            },
        };

        let mut guard = SessionGuard::new(session, self.scenario.name.clone());
        let error = self.in_session(&mut guard).await;
        guard.release().await;
        error
    }

    async fn in_session(&mut self, guard: &mut SessionGuard) -> Option<ErrorDetail> {
        let Some(session) = guard.session_mut() else {
            return Some(ErrorDetail::new(FailureKind::NavigationError, "session already released"));
        };
        let mut context = match session.new_context(self.config.browser.viewport).await {
            Ok(c) => c,
            Err(e) => return Some(ErrorDetail::new(FailureKind::NavigationError, e.to_string())),
        };
        let mut page = match context.new_page().await {
            Ok(p) => p,
            Err(e) => return Some(ErrorDetail::new(FailureKind::NavigationError, e.to_string())),
        };

        let error = self.steps(page.as_mut()).await?;
        self.transition(RunnerState::CapturingFailure);
        self.capture_failure(page.as_ref()).await;
        Some(error)
    }

    async fn steps(&mut self, page: &mut dyn Page) -> Option<ErrorDetail> {
        let scenario = self.scenario;
        for (index, step) in scenario.steps.iter().enumerate() {
            let label = step.label();
            if self.runner.cancel.is_cancelled() {
                return Some(
                    ErrorDetail::new(FailureKind::Cancelled, "run cancelled").at_step(index, label),
                );
            }
            self.transition(RunnerState::for_step(step));
            let started = Instant::now();
            let result = self.step(page, step).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let (status, detail) = match result {
                StepResult::Passed(ref d) => (StepStatus::Passed, d.clone()),
                StepResult::Continued(ref d) => {
                    tracing::warn!(scenario = %scenario.name, step = %label, state = %d, "timed out, continuing");
                    (StepStatus::TimedOutContinued, Some(d.clone()))
                }
                StepResult::Failed(ref e) => (StepStatus::Failed, Some(e.to_string())),
            };
            self.report(StepReport {
                index,
                label: label.clone(),
                status,
                duration_ms,
                detail,
            });
            if let StepResult::Failed(e) = result {
                return Some(e.at_step(index, label));
            }
        }
        None
    }

    async fn step(&mut self, page: &mut dyn Page, step: &Step) -> StepResult {
        match step {
            Step::Navigate(url) => self.navigate(page, url).await,
            Step::Wait(w) => self.wait_for(page, w).await,
            Step::Locate(l) => self.locate(page, l).await,
            Step::Act(a) => self.act(page, a).await,
            Step::Assert(a) => self.assert(page, a).await,
            Step::Capture(c) => self.capture(page, c).await,
        }
    }

    // -------------------------------------------------------------------------
    // Steps
    // -------------------------------------------------------------------------

    async fn navigate(&mut self, page: &mut dyn Page, url: &str) -> StepResult {
        let url = self.config.resolve_url(url);
        match self.executor.perform(page, &Action::Navigate(url.clone())).await {
            ActionOutcome::Done => StepResult::Passed(Some(url)),
            ActionOutcome::Failed { reason, message } => failed(reason.kind(), message),
        }
    }

    async fn wait_for(&mut self, page: &dyn Page, step: &WaitStep) -> StepResult {
        let default_ms = match step.condition {
            WaitCondition::Quiescence => self.config.timeouts.quiescence_ms,
            WaitCondition::Presence { .. } => self.config.timeouts.presence_ms,
        };
        let timeout_ms = step.timeout_ms.unwrap_or(default_ms);
        let timeout = Duration::from_millis(timeout_ms);
        match await_condition(page, &step.condition, timeout, &self.wait).await {
            WaitOutcome::Satisfied { .. } => StepResult::Passed(None),
            WaitOutcome::TimedOut { elapsed, last_state } => {
                let state = last_state.unwrap_or_else(|| "nothing observed".to_string());
                let message = format!(
                    "{} not reached after {}ms ({state})",
                    step.condition.describe(),
                    elapsed.as_millis()
                );
                // A zero bound is a single check, so a miss is a resolution failure as in locate
                let kind = if timeout_ms == 0 && !step.condition.is_advisory() {
                    FailureKind::ResolutionFailure
                } else {
                    FailureKind::TimeoutError
                };
                match step.timeout_policy() {
                    OnTimeout::LogAndContinue => StepResult::Continued(message),
                    OnTimeout::Abort => {
                        StepResult::Failed(ErrorDetail::new(kind, message).with_last_state(state))
                    }
                }
            }
            WaitOutcome::Unresolvable { last_state } => StepResult::Failed(
                ErrorDetail::new(
                    FailureKind::ResolutionFailure,
                    format!("{} could not be resolved", step.condition.describe()),
                )
                .with_last_state(last_state),
            ),
            WaitOutcome::Cancelled => failed(FailureKind::Cancelled, "cancelled while waiting"),
        }
    }

    fn scope_of(&self, within: Option<&String>) -> Result<Option<ResolvedTarget>, StepResult> {
        let Some(name) = within else {
            return Ok(None);
        };
        self.targets.get(name).map(|l| Some(l.target.clone())).ok_or_else(|| {
            failed(
                FailureKind::ResolutionFailure,
                format!("scope '{name}' was not located"),
            )
        })
    }

    async fn locate(&mut self, page: &dyn Page, step: &LocateStep) -> StepResult {
        let scope = match self.scope_of(step.within.as_ref()) {
            Ok(s) => s,
            Err(r) => return r,
        };
        let policy = step.multi_match.unwrap_or(self.config.multi_match);
        let timeout_ms = step.timeout_ms.unwrap_or(self.config.timeouts.presence_ms);
        let ctx = self.wait.clone().with_policy(policy);
        let outcome = await_presence(
            page,
            &step.rules,
            scope.as_ref().map(|s| &s.element),
            Duration::from_millis(timeout_ms),
            &ctx,
        )
        .await;

        match outcome {
            PollOutcome::Ready { value, .. } => {
                if value.match_count > 1 {
                    tracing::warn!(
                        target_name = %step.name,
                        matches = value.match_count,
                        strategy = %value.strategy,
                        "several matches, took the first"
                    );
                }
                let detail = format!("{} ({} match)", value.strategy, value.match_count);
                self.targets.insert(
                    step.name.clone(),
                    Located {
                        target: value,
                        rules: step.rules.clone(),
                        within: step.within.clone(),
                        policy,
                    },
                );
                StepResult::Passed(Some(detail))
            }
            PollOutcome::TimedOut { last, .. } => {
                self.targets.remove(&step.name);
                let state = last.map_or_else(|| "nothing observed".to_string(), |m| m.to_string());
                let kind = if timeout_ms == 0 {
                    FailureKind::ResolutionFailure
                } else {
                    FailureKind::TimeoutError
                };
                let message = format!("'{}' not found within {timeout_ms}ms", step.name);
                match step.on_timeout.unwrap_or(OnTimeout::Abort) {
                    OnTimeout::LogAndContinue => StepResult::Continued(format!("{message}; {state}")),
                    OnTimeout::Abort => {
                        StepResult::Failed(ErrorDetail::new(kind, message).with_last_state(state))
                    }
                }
            }
            PollOutcome::Aborted { last } => {
                self.targets.remove(&step.name);
                let message = match last {
                    PresenceMiss::Unresolved(ref u) if u.ambiguous => {
                        format!("'{}' matched several elements", step.name)
                    }
                    _ => format!("'{}' could not be resolved", step.name),
                };
                StepResult::Failed(
                    ErrorDetail::new(FailureKind::ResolutionFailure, message)
                        .with_last_state(last.to_string()),
                )
            }
            PollOutcome::Cancelled => failed(FailureKind::Cancelled, "cancelled while locating"),
        }
    }

    fn target(&self, name: &str) -> Result<ResolvedTarget, StepResult> {
        self.targets.get(name).map(|l| l.target.clone()).ok_or_else(|| {
            failed(
                FailureKind::ResolutionFailure,
                format!("target '{name}' was not located"),
            )
        })
    }

    /// Locate a stale target again, replacing its binding
    async fn relocate(&mut self, page: &dyn Page, name: &str) -> Option<ResolvedTarget> {
        let located = self.targets.get(name)?.clone();
        let scope = match located.within {
            Some(ref s) => Some(self.targets.get(s)?.target.element.clone()),
            None => None,
        };
        let ctx = self.wait.clone().with_policy(located.policy);
        let timeout = Duration::from_millis(self.config.timeouts.presence_ms);
        match await_presence(page, &located.rules, scope.as_ref(), timeout, &ctx).await {
            PollOutcome::Ready { value, .. } => {
                tracing::info!(target_name = name, strategy = %value.strategy, "re-resolved stale target");
                self.targets.insert(
                    name.to_string(),
                    Located {
                        target: value.clone(),
                        ..located
                    },
                );
                Some(value)
            }
            _ => None,
        }
    }

    fn action_for(&self, step: &ActStep, target: Option<&ResolvedTarget>) -> Result<Action, StepResult> {
        let element = || {
            target
                .map(|t| t.element.clone())
                .ok_or_else(|| failed(FailureKind::ResolutionFailure, "action needs a target"))
        };
        match step {
            ActStep::Click(_) => Ok(Action::Click(element()?)),
            ActStep::WaitFixed(ms) => Ok(Action::WaitFixed(Duration::from_millis(*ms))),
            ActStep::SetFiles(s) => {
                let paths: Vec<PathBuf> = match s.fixture {
                    Some(ref name) => {
                        let path = self.fixtures.path(name).ok_or_else(|| {
                            failed(FailureKind::IoFailure, format!("fixture '{name}' is not prepared"))
                        })?;
                        vec![path.to_path_buf()]
                    }
                    None => s.paths.clone(),
                };
                Ok(Action::SetFiles(element()?, paths))
            }
        }
    }

    async fn act(&mut self, page: &mut dyn Page, step: &ActStep) -> StepResult {
        let target = match step.target() {
            Some(name) => match self.target(name) {
                Ok(t) => Some(t),
                Err(r) => return r,
            },
            None => None,
        };
        let action = match self.action_for(step, target.as_ref()) {
            Ok(a) => a,
            Err(r) => return r,
        };

        let mut outcome = self.executor.perform(page, &action).await;
        if outcome.is_stale() {
            if let Some(name) = step.target() {
                tracing::warn!(target_name = name, "target went stale, retrying once");
                let Some(fresh) = self.relocate(page, name).await else {
                    return failed(
                        FailureKind::ActionFailure,
                        format!("'{name}' went stale and could not be re-resolved"),
                    );
                };
                let retry = match self.action_for(step, Some(&fresh)) {
                    Ok(a) => a,
                    Err(r) => return r,
                };
                outcome = self.executor.perform(page, &retry).await;
            }
        }
        match outcome {
            ActionOutcome::Done => StepResult::Passed(None),
            ActionOutcome::Failed { reason, message } => failed(reason.kind(), message),
        }
    }

    async fn assert(&mut self, page: &dyn Page, step: &AssertStep) -> StepResult {
        let mut target = match self.target(&step.target) {
            Ok(t) => t,
            Err(r) => return r,
        };
        let timeout_ms = step.timeout_ms.unwrap_or(self.config.timeouts.presence_ms);
        let timeout = Duration::from_millis(timeout_ms);
        let mut retried = false;
        loop {
            match check(page, &step.condition, &target, timeout, &self.wait).await {
                AssertionOutcome::Passed { .. } => return StepResult::Passed(None),
                AssertionOutcome::Failed { last_state, .. } => {
                    let message = format!(
                        "'{}' {} not satisfied within {timeout_ms}ms",
                        step.target,
                        step.condition.describe()
                    );
                    return match step.on_timeout.unwrap_or(OnTimeout::Abort) {
                        OnTimeout::LogAndContinue => {
                            StepResult::Continued(format!("{message}; {last_state}"))
                        }
                        OnTimeout::Abort => StepResult::Failed(
                            ErrorDetail::new(FailureKind::TimeoutError, message)
                                .with_last_state(last_state),
                        ),
                    };
                }
                AssertionOutcome::Stale if !retried => {
                    retried = true;
                    match self.relocate(page, &step.target).await {
                        Some(fresh) => target = fresh,
                        None => {
                            return failed(
                                FailureKind::ResolutionFailure,
                                format!("'{}' went stale and could not be re-resolved", step.target),
                            )
                        }
                    }
                }
                AssertionOutcome::Stale => {
                    return failed(
                        FailureKind::ResolutionFailure,
                        format!("'{}' detached again after re-resolving", step.target),
                    )
                }
                AssertionOutcome::Cancelled => {
                    return failed(FailureKind::Cancelled, "cancelled while asserting")
                }
            }
        }
    }

    fn artifact_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.artifact_dir.join(path)
        }
    }

    async fn capture(&mut self, page: &dyn Page, step: &CaptureStep) -> StepResult {
        let path = self.artifact_path(&step.path);
        match snapshot(page, &path, step.mode, false).await {
            CaptureOutcome::Written(artifact) => {
                let detail = format!("{} ({} bytes)", artifact.path.display(), artifact.bytes);
                self.artifacts.push(artifact);
                StepResult::Passed(Some(detail))
            }
            CaptureOutcome::IoFailure(message) => failed(FailureKind::IoFailure, message),
        }
    }

    /// Best effort: errors are logged, never returned over the original failure
    async fn capture_failure(&mut self, page: &dyn Page) {
        let relative = self
            .scenario
            .failure_capture
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}-failure.png", file_stem(&self.scenario.name))));
        let path = self.artifact_path(&relative);
        match snapshot(page, &path, CaptureMode::Viewport, true).await {
            CaptureOutcome::Written(artifact) => self.artifacts.push(artifact),
            CaptureOutcome::IoFailure(message) => {
                tracing::warn!(scenario = %self.scenario.name, error = %message, "failure capture not written");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::assertion::Condition;
    use crate::mock::{Effect, MockApp, MockDocument, MockElement, MockLauncher};
    use crate::selector::SelectorRule;
    use std::sync::Mutex;

    fn app() -> MockApp {
        MockApp::new().route(
            "/home",
            MockDocument::new()
                .element(MockElement::button("open", "Open").on_click(Effect::Reveal("panel".into())))
                .element(MockElement::new("panel").role("region").text("Panel").hidden())
                .element(MockElement::button("flaky", "Flaky").stale_clicks(1))
                .element(MockElement::button("broken", "Broken").stale_clicks(2)),
        )
    }

    fn runner(app: MockApp, dir: &Path) -> (ScenarioRunner, MockLauncher) {
        let launcher = MockLauncher::new(app);
        let config = HarnessConfig::default().with_artifact_dir(dir);
        (ScenarioRunner::new(config, Arc::new(launcher.clone())), launcher)
    }

    fn locate(name: &str, label: &str) -> Step {
        Step::Locate(LocateStep::new(name, SelectorRule::role("button", label)).timeout_ms(1000))
    }

    mod state_machine_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_success_transitions() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, launcher) = runner(app(), dir.path());
            let scenario = Scenario::new("open panel")
                .step(Step::navigate("/home"))
                .step(Step::quiescence(500))
                .step(locate("open", "Open"))
                .step(Step::click("open"))
                .locate(LocateStep::new("panel", SelectorRule::role_only("region")))
                .step(Step::assert_visible("panel"))
                .step(Step::capture("panel.png", CaptureMode::Viewport));
            let result = runner.run(&scenario).await;

            assert_eq!(result.outcome, Outcome::Success, "{:?}", result.error);
            assert_eq!(
                result.transitions,
                vec![
                    RunnerState::Init,
                    RunnerState::Navigating,
                    RunnerState::Waiting,
                    RunnerState::Locating,
                    RunnerState::Acting,
                    RunnerState::Locating,
                    RunnerState::Asserting,
                    RunnerState::Capturing,
                    RunnerState::Done(Outcome::Success),
                ]
            );
            assert_eq!(result.artifact_paths(), vec![dir.path().join("panel.png").as_path()]);
            assert_eq!(result.step_reports.len(), 7);
            assert_eq!(launcher.stats().closes(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_failure_routes_through_failure_capture() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, launcher) = runner(app(), dir.path());
            let scenario = Scenario::new("missing")
                .step(Step::navigate("/home"))
                .step(locate("ghost", "Ghost"));
            let result = runner.run(&scenario).await;

            assert_eq!(result.outcome, Outcome::Failure(FailureKind::TimeoutError));
            let transitions = &result.transitions;
            assert_eq!(transitions[transitions.len() - 2], RunnerState::CapturingFailure);
            assert!(transitions.last().unwrap().is_terminal());
            let error = result.error.unwrap();
            assert_eq!(error.step_index, Some(1));
            assert!(error.last_state.unwrap().contains("Ghost"));
            assert_eq!(result.artifacts.len(), 1);
            assert!(result.artifacts[0].on_failure);
            assert_eq!(result.artifacts[0].path, dir.path().join("missing-failure.png"));
            assert_eq!(launcher.stats().screenshots(), 1);
            assert_eq!(launcher.stats().closes(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_navigation_error() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, _) = runner(app(), dir.path());
            let result = runner.run(&Scenario::new("nav").step(Step::navigate("/nowhere"))).await;
            assert_eq!(result.outcome, Outcome::Failure(FailureKind::NavigationError));
        }

        #[tokio::test(start_paused = true)]
        async fn test_launch_failure_skips_capture() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, launcher) = runner(app().failing_launch(), dir.path());
            let result = runner.run(&Scenario::new("nolaunch").step(Step::navigate("/home"))).await;
            assert!(!result.is_success());
            assert_eq!(
                result.transitions,
                vec![
                    RunnerState::Init,
                    RunnerState::Done(Outcome::Failure(FailureKind::NavigationError))
                ]
            );
            assert_eq!(launcher.stats().closes(), 0);
            assert!(result.artifacts.is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_failure_capture_error_keeps_original_failure() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, _) = runner(app().failing_screenshots(), dir.path());
            let scenario = Scenario::new("nocapture")
                .step(Step::navigate("/home"))
                .step(locate("ghost", "Ghost"));
            let result = runner.run(&scenario).await;
            assert_eq!(result.outcome, Outcome::Failure(FailureKind::TimeoutError));
            assert!(result.artifacts.is_empty());
        }
    }

    mod stale_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_stale_click_retried_once() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, launcher) = runner(app(), dir.path());
            let scenario = Scenario::new("flaky")
                .step(Step::navigate("/home"))
                .step(locate("flaky", "Flaky"))
                .step(Step::click("flaky"));
            let result = runner.run(&scenario).await;
            assert!(result.is_success(), "{:?}", result.error);
            assert_eq!(launcher.stats().clicks(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_stale_twice_is_action_failure() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, launcher) = runner(app(), dir.path());
            let scenario = Scenario::new("broken")
                .step(Step::navigate("/home"))
                .step(locate("broken", "Broken"))
                .step(Step::click("broken"));
            let result = runner.run(&scenario).await;
            assert_eq!(result.outcome, Outcome::Failure(FailureKind::ActionFailure));
            assert_eq!(launcher.stats().clicks(), 2);
        }
    }

    mod continue_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_log_and_continue_locate() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, _) = runner(app(), dir.path());
            let scenario = Scenario::new("optional")
                .step(Step::navigate("/home"))
                .locate(
                    LocateStep::new("banner", SelectorRule::role_only("banner"))
                        .timeout_ms(300)
                        .on_timeout(OnTimeout::LogAndContinue),
                )
                .step(locate("open", "Open"));
            let result = runner.run(&scenario).await;
            assert!(result.is_success());
            assert_eq!(result.step_reports[1].status, StepStatus::TimedOutContinued);
        }

        #[tokio::test(start_paused = true)]
        async fn test_use_of_unlocated_target_fails() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, _) = runner(app(), dir.path());
            let scenario = Scenario::new("optional")
                .step(Step::navigate("/home"))
                .locate(
                    LocateStep::new("banner", SelectorRule::role_only("banner"))
                        .timeout_ms(300)
                        .on_timeout(OnTimeout::LogAndContinue),
                )
                .step(Step::Assert(AssertStep::new("banner", Condition::Visible)));
            let result = runner.run(&scenario).await;
            assert_eq!(result.outcome, Outcome::Failure(FailureKind::ResolutionFailure));
        }
    }

    mod wait_step_tests {
        use super::*;

        fn presence(label: &str, timeout_ms: u64, on_timeout: Option<OnTimeout>) -> Step {
            Step::Wait(WaitStep {
                condition: WaitCondition::Presence {
                    rules: SelectorRule::role("button", label).into(),
                },
                timeout_ms: Some(timeout_ms),
                on_timeout,
            })
        }

        fn two_cancels() -> MockApp {
            MockApp::new().route(
                "/dialog",
                MockDocument::new()
                    .element(MockElement::button("a", "Cancel"))
                    .element(MockElement::button("b", "Cancel")),
            )
        }

        fn rejecting_runner(dir: &Path) -> ScenarioRunner {
            let mut config = HarnessConfig::default().with_artifact_dir(dir);
            config.multi_match = MultiMatchPolicy::Reject;
            ScenarioRunner::new(config, Arc::new(MockLauncher::new(two_cancels())))
        }

        #[tokio::test(start_paused = true)]
        async fn test_presence_found() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, _) = runner(app(), dir.path());
            let scenario = Scenario::new("present")
                .step(Step::navigate("/home"))
                .step(presence("Open", 1000, None));
            let result = runner.run(&scenario).await;
            assert!(result.is_success(), "{:?}", result.error);
        }

        #[tokio::test(start_paused = true)]
        async fn test_presence_timeout_is_timeout_error() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, _) = runner(app(), dir.path());
            let scenario = Scenario::new("absent")
                .step(Step::navigate("/home"))
                .step(presence("Ghost", 1000, None));
            let result = runner.run(&scenario).await;
            assert_eq!(result.outcome, Outcome::Failure(FailureKind::TimeoutError));
            assert!(result.error.unwrap().last_state.unwrap().contains("Ghost"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_zero_bound_matches_locate() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, _) = runner(app(), dir.path());
            let waited = runner
                .run(
                    &Scenario::new("wait once")
                        .step(Step::navigate("/home"))
                        .step(presence("Ghost", 0, None)),
                )
                .await;
            let located = runner
                .run(
                    &Scenario::new("locate once")
                        .step(Step::navigate("/home"))
                        .locate(LocateStep::new("ghost", SelectorRule::role("button", "Ghost")).timeout_ms(0)),
                )
                .await;
            assert_eq!(waited.outcome, Outcome::Failure(FailureKind::ResolutionFailure));
            assert_eq!(waited.outcome, located.outcome);
        }

        #[tokio::test(start_paused = true)]
        async fn test_rejected_ambiguity_is_resolution_failure() {
            let dir = tempfile::tempdir().unwrap();
            let runner = rejecting_runner(dir.path());
            let scenario = Scenario::new("ambiguous")
                .step(Step::navigate("/dialog"))
                .step(presence("Cancel", 2000, None));
            let result = runner.run(&scenario).await;
            assert_eq!(result.outcome, Outcome::Failure(FailureKind::ResolutionFailure));
            let error = result.error.unwrap();
            assert!(error.last_state.unwrap().contains("ambiguous"));
            assert_eq!(error.step_index, Some(1));
        }

        #[tokio::test(start_paused = true)]
        async fn test_rejected_ambiguity_ignores_log_and_continue() {
            let dir = tempfile::tempdir().unwrap();
            let runner = rejecting_runner(dir.path());
            let scenario = Scenario::new("ambiguous optional")
                .step(Step::navigate("/dialog"))
                .step(presence("Cancel", 2000, Some(OnTimeout::LogAndContinue)));
            let result = runner.run(&scenario).await;
            assert_eq!(result.outcome, Outcome::Failure(FailureKind::ResolutionFailure));
        }
    }

    mod observer_tests {
        use super::*;

        #[derive(Default)]
        struct Recorder {
            states: Mutex<Vec<RunnerState>>,
            steps: Mutex<usize>,
            finished: Mutex<usize>,
        }

        impl RunObserver for Recorder {
            fn on_transition(&self, _scenario: &str, state: RunnerState) {
                self.states.lock().unwrap().push(state);
            }

            fn on_step(&self, _scenario: &str, _report: &StepReport) {
                *self.steps.lock().unwrap() += 1;
            }

            fn on_finish(&self, _result: &RunResult) {
                *self.finished.lock().unwrap() += 1;
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_observer_sees_every_transition() {
            let dir = tempfile::tempdir().unwrap();
            let recorder = Arc::new(Recorder::default());
            let (runner, _) = runner(app(), dir.path());
            let runner = runner.with_observer(recorder.clone());
            let result = runner
                .run(&Scenario::new("obs").step(Step::navigate("/home")).step(locate("open", "Open")))
                .await;
            assert_eq!(*recorder.states.lock().unwrap(), result.transitions);
            assert_eq!(*recorder.steps.lock().unwrap(), 2);
            assert_eq!(*recorder.finished.lock().unwrap(), 1);
        }
    }

    mod suite_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_run_all_preserves_order_and_isolates_sessions() {
            let dir = tempfile::tempdir().unwrap();
            let (runner, launcher) = runner(app(), dir.path());
            let scenarios = vec![
                Scenario::new("first").step(Step::navigate("/home")).step(locate("open", "Open")),
                Scenario::new("second").step(Step::navigate("/gone")),
                Scenario::new("third").step(Step::navigate("/home")),
            ];
            let results = runner.run_all(scenarios, 2).await;
            let names: Vec<_> = results.iter().map(|r| r.scenario_name.as_str()).collect();
            assert_eq!(names, vec!["first", "second", "third"]);
            assert!(results[0].is_success());
            assert!(!results[1].is_success());
            assert!(results[2].is_success());
            assert_eq!(launcher.stats().launches(), 3);
            assert_eq!(launcher.stats().closes(), 3);
        }

        struct PanickingLauncher;

        #[async_trait::async_trait]
        impl Launcher for PanickingLauncher {
            async fn launch(
                &self,
                _config: &crate::config::BrowserConfig,
            ) -> crate::result::LookoutResult<Box<dyn crate::session::BrowserSession>> {
                panic!("launcher exploded");
            }
        }

        #[tokio::test]
        async fn test_panicked_task_is_internal_failure() {
            let dir = tempfile::tempdir().unwrap();
            let config = HarnessConfig::default().with_artifact_dir(dir.path());
            let runner = ScenarioRunner::new(config, Arc::new(PanickingLauncher));
            let results = runner
                .run_all(vec![Scenario::new("boom").step(Step::navigate("/home"))], 1)
                .await;
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].scenario_name, "boom");
            assert_eq!(results[0].outcome, Outcome::Failure(FailureKind::Internal));
            let error = results[0].error.as_ref().unwrap();
            assert!(error.message.contains("panicked"));
            assert_eq!(error.kind.as_str(), "InternalError");
        }

        #[test]
        fn test_file_stem() {
            assert_eq!(file_stem("open panel/v2"), "open-panel-v2");
        }
    }
}
