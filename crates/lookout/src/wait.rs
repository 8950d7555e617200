//! Bounded waits.
//!
//! Every wait in the harness goes through [`poll_until`]: it probes at a
//! fixed interval until the probe is ready, the bound elapses or the run is
//! cancelled. A timeout is an outcome, never an error; the caller decides
//! whether it is fatal.
//!
//! Two conditions are defined:
//!
//! - **Quiescence** is advisory. Pages that poll or hold websockets never go
//!   idle, so timing out is expected and callers log and continue.
//! - **Presence** protects correctness: a selector chain must resolve within
//!   the bound or the step fails with a timeout.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::resolver::{resolve, Resolution, ResolvedTarget, Unresolved};
use crate::selector::{MultiMatchPolicy, SelectorChain};
use crate::session::{ElementRef, Page, PageError};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Network idle threshold: resource count unchanged for this long
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

// =============================================================================
// POLLING
// =============================================================================

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T, L> {
    /// Condition met
    Ready(T),
    /// Not yet; keep polling. Carries the observed state.
    Pending(L),
    /// Stop polling; the condition can no longer be met
    Abort(L),
}

/// How a bounded poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T, L> {
    /// Probe returned ready
    Ready {
        /// Probe value
        value: T,
        /// Time until ready
        elapsed: Duration,
    },
    /// Bound elapsed
    TimedOut {
        /// Last observed state
        last: Option<L>,
        /// Time waited
        elapsed: Duration,
    },
    /// Probe gave up
    Aborted {
        /// State that made the probe give up
        last: L,
    },
    /// Cancellation token fired
    Cancelled,
}

/// Probe every `interval` until ready, for at most `timeout`.
///
/// The probe always runs at least once, so a zero timeout means a single
/// instantaneous check.
pub async fn poll_until<T, L, F, Fut>(
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> PollOutcome<T, L>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T, L>>,
{
    let start = Instant::now();
    let mut last = None;
    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        match probe().await {
            Probe::Ready(value) => {
                return PollOutcome::Ready {
                    value,
                    elapsed: start.elapsed(),
                }
            }
            Probe::Abort(state) => return PollOutcome::Aborted { last: state },
            Probe::Pending(state) => last = Some(state),
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return PollOutcome::TimedOut { last, elapsed };
        }
        let pause = interval.min(timeout - elapsed);
        tokio::select! {
            () = cancel.cancelled() => return PollOutcome::Cancelled,
            () = tokio::time::sleep(pause) => {}
        }
    }
}

/// Sleep for a fixed duration unless cancelled. Returns `false` on cancel.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

// =============================================================================
// CONDITIONS
// =============================================================================

/// Condition a `Wait` step waits for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "for", rename_all = "snake_case")]
pub enum WaitCondition {
    /// Best-effort "no outstanding network activity"
    Quiescence,
    /// A selector chain becomes resolvable
    Presence {
        /// Chain that must resolve
        rules: SelectorChain,
    },
}

impl WaitCondition {
    /// Advisory conditions time out without failing the scenario
    #[must_use]
    pub const fn is_advisory(&self) -> bool {
        matches!(self, Self::Quiescence)
    }

    /// Short description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Quiescence => "network quiescence".to_string(),
            Self::Presence { rules } => format!("presence of {}", rules.describe()),
        }
    }
}

/// Outcome of [`await_condition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Condition met
    Satisfied {
        /// Time until met
        elapsed: Duration,
    },
    /// Bound elapsed first
    TimedOut {
        /// Time waited
        elapsed: Duration,
        /// Last observed state
        last_state: Option<String>,
    },
    /// Condition can no longer be met, e.g. an ambiguous match the
    /// multi-match policy rejects
    Unresolvable {
        /// Observed state when polling stopped
        last_state: String,
    },
    /// Run cancelled while waiting
    Cancelled,
}

/// Polling parameters shared by waits and assertions
#[derive(Debug, Clone)]
pub struct WaitContext {
    /// Interval between probes
    pub poll_interval: Duration,
    /// Multi-match policy for presence waits
    pub policy: MultiMatchPolicy,
    /// Run cancellation
    pub cancel: CancellationToken,
}

impl WaitContext {
    /// Context with the given interval, default policy, fresh token
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            policy: MultiMatchPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the multi-match policy
    #[must_use]
    pub const fn with_policy(mut self, policy: MultiMatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Wait for `condition` for at most `timeout`.
pub async fn await_condition(
    page: &dyn Page,
    condition: &WaitCondition,
    timeout: Duration,
    ctx: &WaitContext,
) -> WaitOutcome {
    match condition {
        WaitCondition::Quiescence => await_quiescence(page, timeout, ctx).await,
        WaitCondition::Presence { rules } => {
            match await_presence(page, rules, None, timeout, ctx).await {
                PollOutcome::Ready { elapsed, .. } => WaitOutcome::Satisfied { elapsed },
                PollOutcome::TimedOut { last, elapsed } => WaitOutcome::TimedOut {
                    elapsed,
                    last_state: last.map(|m| m.to_string()),
                },
                PollOutcome::Aborted { last } => WaitOutcome::Unresolvable {
                    last_state: last.to_string(),
                },
                PollOutcome::Cancelled => WaitOutcome::Cancelled,
            }
        }
    }
}

/// Why a presence probe has not produced a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceMiss {
    /// Chain evaluated without a usable match
    Unresolved(Unresolved),
    /// Page query failed
    Page(PageError),
}

impl std::fmt::Display for PresenceMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unresolved(u) => f.write_str(&u.describe()),
            Self::Page(e) => write!(f, "{e}"),
        }
    }
}

/// Poll the resolver until `chain` resolves.
///
/// An ambiguous match rejected by policy, or a stale scope, stops the poll
/// immediately: waiting longer cannot fix either.
pub async fn await_presence(
    page: &dyn Page,
    chain: &SelectorChain,
    scope: Option<&ElementRef>,
    timeout: Duration,
    ctx: &WaitContext,
) -> PollOutcome<ResolvedTarget, PresenceMiss> {
    poll_until(timeout, ctx.poll_interval, &ctx.cancel, || async {
        match resolve(page, chain, scope, ctx.policy).await {
            Ok(Resolution::Resolved(target)) => Probe::Ready(target),
            Ok(Resolution::Unresolved(miss)) if miss.ambiguous => {
                Probe::Abort(PresenceMiss::Unresolved(miss))
            }
            Ok(Resolution::Unresolved(miss)) => Probe::Pending(PresenceMiss::Unresolved(miss)),
            Err(PageError::Stale) => Probe::Abort(PresenceMiss::Page(PageError::Stale)),
            Err(e) => Probe::Pending(PresenceMiss::Page(e)),
        }
    })
    .await
}

#[derive(Debug)]
struct IdleTracker {
    resources: Option<usize>,
    since: Instant,
}

async fn await_quiescence(page: &dyn Page, timeout: Duration, ctx: &WaitContext) -> WaitOutcome {
    let threshold = Duration::from_millis(NETWORK_IDLE_THRESHOLD_MS);
    let tracker = Mutex::new(IdleTracker {
        resources: None,
        since: Instant::now(),
    });
    let outcome = poll_until(timeout, ctx.poll_interval, &ctx.cancel, || async {
        let activity = match page.network_activity().await {
            Ok(a) => a,
            Err(e) => return Probe::Pending(e.to_string()),
        };
        if !activity.document_complete {
            return Probe::Pending("document loading".to_string());
        }
        match activity.in_flight {
            Some(0) => Probe::Ready(()),
            Some(n) => Probe::Pending(format!("{n} requests in flight")),
            None => {
                let Ok(mut t) = tracker.lock() else {
                    return Probe::Pending("idle tracker unavailable".to_string());
                };
                if t.resources != Some(activity.resources_seen) {
                    t.resources = Some(activity.resources_seen);
                    t.since = Instant::now();
                }
                if t.since.elapsed() >= threshold {
                    Probe::Ready(())
                } else {
                    Probe::Pending(format!("{} resources, still loading", activity.resources_seen))
                }
            }
        }
    })
    .await;
    match outcome {
        PollOutcome::Ready { elapsed, .. } => WaitOutcome::Satisfied { elapsed },
        PollOutcome::TimedOut { last, elapsed } => WaitOutcome::TimedOut {
            elapsed,
            last_state: last,
        },
        PollOutcome::Aborted { last } => WaitOutcome::TimedOut {
            elapsed: Duration::ZERO,
            last_state: Some(last),
        },
        PollOutcome::Cancelled => WaitOutcome::Cancelled,
    }
}
