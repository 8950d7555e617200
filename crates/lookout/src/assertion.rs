//! Polling assertions on resolved targets.
//!
//! Render state is asynchronous relative to the step that triggered it, so
//! a check is never instantaneous: the condition is re-evaluated every poll
//! interval until it holds or the bound elapses. A failed check reports the
//! last value it observed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resolver::ResolvedTarget;
use crate::selector::text_matches_loose;
use crate::session::{Page, PageError};
use crate::wait::{poll_until, PollOutcome, Probe, WaitContext};

/// Observable state expected of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Condition {
    /// Target is rendered and visible
    Visible,
    /// Target's text contains `text` (case-insensitive)
    ContainsText {
        /// Expected text
        text: String,
    },
    /// Target has the given role
    HasRole {
        /// Expected role
        role: String,
    },
    /// The rule that resolved the target matches exactly `equals` elements
    Count {
        /// Expected match count
        equals: usize,
    },
}

impl Condition {
    /// Short description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Visible => "is visible".to_string(),
            Self::ContainsText { text } => format!("contains text {text:?}"),
            Self::HasRole { role } => format!("has role {role}"),
            Self::Count { equals } => format!("count == {equals}"),
        }
    }
}

/// Outcome of [`check`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionOutcome {
    /// Condition held
    Passed {
        /// Time until it held
        elapsed: Duration,
    },
    /// Condition did not hold within the bound
    Failed {
        /// Last observed value
        last_state: String,
        /// Time waited
        elapsed: Duration,
    },
    /// Target detached from the document; re-resolve before checking again
    Stale,
    /// Run cancelled
    Cancelled,
}

impl AssertionOutcome {
    /// Whether the condition held
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

async fn observe(
    page: &dyn Page,
    condition: &Condition,
    target: &ResolvedTarget,
) -> Result<(bool, String), PageError> {
    let element = &target.element;
    match condition {
        Condition::Visible => {
            let visible = page.is_visible(element).await?;
            Ok((visible, format!("visible={visible}")))
        }
        Condition::ContainsText { text } => {
            let actual = page.text_content(element).await?;
            Ok((text_matches_loose(&actual, text), format!("text={actual:?}")))
        }
        Condition::HasRole { role } => {
            let actual = page.role(element).await?;
            let state = format!("role={}", actual.as_deref().unwrap_or("none"));
            Ok((actual.as_deref() == Some(role.as_str()), state))
        }
        Condition::Count { equals } => {
            let count = page.query(&target.rule, target.scope.as_ref()).await?.len();
            Ok((count == *equals, format!("count={count}")))
        }
    }
}

/// Poll `condition` on `target` for at most `timeout`
pub async fn check(
    page: &dyn Page,
    condition: &Condition,
    target: &ResolvedTarget,
    timeout: Duration,
    ctx: &WaitContext,
) -> AssertionOutcome {
    let outcome = poll_until(timeout, ctx.poll_interval, &ctx.cancel, || async {
        match observe(page, condition, target).await {
            Ok((true, _)) => Probe::Ready(()),
            Ok((false, state)) => Probe::Pending(state),
            Err(PageError::Stale) => Probe::Abort("target detached".to_string()),
            Err(e) => Probe::Pending(e.to_string()),
        }
    })
    .await;
    match outcome {
        PollOutcome::Ready { elapsed, .. } => AssertionOutcome::Passed { elapsed },
        PollOutcome::TimedOut { last, elapsed } => AssertionOutcome::Failed {
            last_state: last.unwrap_or_else(|| "not observed".to_string()),
            elapsed,
        },
        PollOutcome::Aborted { .. } => AssertionOutcome::Stale,
        PollOutcome::Cancelled => AssertionOutcome::Cancelled,
    }
}
