//! Lookout: declarative UI verification for web applications.
//!
//! A [`Scenario`] is an ordered list of steps (navigate, wait, locate, act,
//! assert, capture) run against one isolated browser session. Targets are
//! found through fallback [`SelectorChain`]s, every wait is bounded, and the
//! run leaves screenshot evidence behind whether it passes or fails.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────────────────┐
//! │ Scenario     │──►│ ScenarioRunner │──►│ Launcher / Page          │
//! │ (YAML/Rust)  │   │ state machine  │   │ (Chromium CDP or mock)   │
//! └──────────────┘   └───────┬────────┘   └──────────────────────────┘
//!                            │
//!        wait · resolver · action · assertion · artifact
//!                            │
//!                            ▼
//!                   RunResult ──► SuiteReport
//! ```
//!
//! # Example
//!
//! ```
//! use lookout::prelude::*;
//!
//! let scenario = Scenario::new("settings header")
//!     .step(Step::navigate("/settings"))
//!     .locate(
//!         LocateStep::new("header", SelectorRule::css_text("h1", "Settings")).timeout_ms(10_000),
//!     )
//!     .step(Step::assert_visible("header"))
//!     .step(Step::capture("settings_page.png", CaptureMode::FullPage));
//! assert!(scenario.validate().is_ok());
//! ```

#![warn(missing_docs)]

pub mod action;
pub mod artifact;
pub mod assertion;
#[cfg(feature = "browser")]
pub mod browser;
pub mod config;
pub mod mock;
pub mod reporter;
pub mod resolver;
pub mod result;
pub mod runner;
pub mod scenario;
pub mod selector;
pub mod session;
pub mod wait;

pub use action::{Action, ActionExecutor, ActionOutcome, FailureReason};
pub use artifact::{
    Artifact, BuiltinFixture, CaptureMode, CaptureOutcome, Fixture, FixtureSource,
    PreparedFixtures,
};
pub use assertion::{AssertionOutcome, Condition};
#[cfg(feature = "browser")]
pub use browser::ChromiumLauncher;
pub use config::{BrowserConfig, HarnessConfig, Timeouts, Viewport};
pub use reporter::{SuiteReport, SuiteTotals};
pub use resolver::{resolve, Resolution, ResolvedTarget, Unresolved};
pub use result::{ErrorDetail, FailureKind, LookoutError, LookoutResult};
pub use runner::{
    Outcome, RunObserver, RunResult, RunnerState, ScenarioRunner, StepReport, StepStatus,
};
pub use scenario::{
    ActStep, AssertStep, CaptureStep, LocateStep, OnTimeout, Scenario, SetFilesStep, Step,
    WaitStep,
};
pub use selector::{MultiMatchPolicy, SelectorChain, SelectorRule};
pub use session::{BrowserContext, BrowserSession, ElementRef, Launcher, Page, PageError};
pub use wait::{WaitCondition, WaitOutcome};

/// Common imports for writing and running scenarios
pub mod prelude {
    pub use crate::{
        CaptureMode, Condition, Fixture, HarnessConfig, LocateStep, MultiMatchPolicy, OnTimeout,
        Outcome, RunResult, Scenario, ScenarioRunner, SelectorChain, SelectorRule, Step,
        SuiteReport, WaitCondition,
    };
}
