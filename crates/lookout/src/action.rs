//! Single interactions against a live page.
//!
//! [`ActionExecutor::perform`] never returns `Err`: every failure is an
//! [`ActionOutcome::Failed`] with a [`FailureReason`] the runner maps onto the
//! scenario failure taxonomy. A [`FailureReason::StaleTarget`] tells the
//! caller to re-resolve the target; retrying is the caller's decision.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Timeouts;
use crate::result::FailureKind;
use crate::session::{ElementRef, Page, PageError, PageResult};
use crate::wait::pause;

/// An interaction, with its target already resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Navigate to an absolute URL
    Navigate(String),
    /// Click an element
    Click(ElementRef),
    /// Set the files of a file input
    SetFiles(ElementRef, Vec<PathBuf>),
    /// Sleep for a fixed duration
    WaitFixed(Duration),
}

impl Action {
    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Navigate(_) => "navigate",
            Self::Click(_) => "click",
            Self::SetFiles(..) => "set_files",
            Self::WaitFixed(_) => "wait_fixed",
        }
    }
}

/// Why an action failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Target unreachable, or non-2xx without a renderable page
    NavigationError,
    /// Target was detached between resolution and the action
    StaleTarget,
    /// The page refused the interaction
    Rejected,
    /// The action did not complete within its bound
    TimedOut,
    /// Run cancelled during the action
    Cancelled,
}

impl FailureReason {
    /// Scenario failure kind this reason escalates to
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::NavigationError => FailureKind::NavigationError,
            Self::StaleTarget | Self::Rejected | Self::TimedOut => FailureKind::ActionFailure,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Outcome of [`ActionExecutor::perform`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Action completed
    Done,
    /// Action failed
    Failed {
        /// Classification
        reason: FailureReason,
        /// Detail from the page
        message: String,
    },
}

impl ActionOutcome {
    fn failed(reason: FailureReason, message: impl Into<String>) -> Self {
        Self::Failed {
            reason,
            message: message.into(),
        }
    }

    /// Whether the action completed
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Whether the failure calls for re-resolving the target
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                reason: FailureReason::StaleTarget,
                ..
            }
        )
    }
}

/// Performs actions with bounded durations
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    navigation_timeout: Duration,
    action_timeout: Duration,
    cancel: CancellationToken,
}

impl ActionExecutor {
    /// Create an executor from configured timeouts
    #[must_use]
    pub fn new(timeouts: &Timeouts, cancel: CancellationToken) -> Self {
        Self {
            navigation_timeout: timeouts.navigation(),
            action_timeout: timeouts.action(),
            cancel,
        }
    }

    /// Perform `action` on `page`
    pub async fn perform(&self, page: &mut dyn Page, action: &Action) -> ActionOutcome {
        tracing::debug!(action = action.name(), "performing action");
        match action {
            Action::Navigate(url) => {
                let result = self.bounded(self.navigation_timeout, page.goto(url)).await;
                match result {
                    Ok(Ok(())) => ActionOutcome::Done,
                    Ok(Err(e)) => ActionOutcome::failed(FailureReason::NavigationError, e.to_string()),
                    Err(reason) => ActionOutcome::failed(
                        if reason == FailureReason::TimedOut {
                            FailureReason::NavigationError
                        } else {
                            reason
                        },
                        format!("navigation to {url} did not complete"),
                    ),
                }
            }
            Action::Click(element) => {
                let result = self.bounded(self.action_timeout, page.click(element)).await;
                Self::interaction(result, "click")
            }
            Action::SetFiles(element, paths) => {
                let result = self
                    .bounded(self.action_timeout, page.set_files(element, paths))
                    .await;
                Self::interaction(result, "set files")
            }
            Action::WaitFixed(duration) => {
                if pause(*duration, &self.cancel).await {
                    ActionOutcome::Done
                } else {
                    ActionOutcome::failed(FailureReason::Cancelled, "cancelled during fixed wait")
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        limit: Duration,
        fut: impl Future<Output = PageResult<T>>,
    ) -> Result<PageResult<T>, FailureReason> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(FailureReason::Cancelled),
            result = tokio::time::timeout(limit, fut) => result.map_err(|_| FailureReason::TimedOut),
        }
    }

    fn interaction(result: Result<PageResult<()>, FailureReason>, what: &str) -> ActionOutcome {
        match result {
            Ok(Ok(())) => ActionOutcome::Done,
            Ok(Err(PageError::Stale)) => {
                ActionOutcome::failed(FailureReason::StaleTarget, format!("{what}: target is stale"))
            }
            Ok(Err(PageError::Navigation(m))) => {
                ActionOutcome::failed(FailureReason::NavigationError, format!("{what}: {m}"))
            }
            Ok(Err(e @ (PageError::Rejected(_) | PageError::Protocol(_)))) => {
                ActionOutcome::failed(FailureReason::Rejected, format!("{what}: {e}"))
            }
            Err(FailureReason::TimedOut) => {
                ActionOutcome::failed(FailureReason::TimedOut, format!("{what} did not complete"))
            }
            Err(reason) => ActionOutcome::failed(reason, format!("{what} interrupted")),
        }
    }
}
