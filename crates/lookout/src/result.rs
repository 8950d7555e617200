//! Result and error types for Lookout.
//!
//! Two layers live here. [`LookoutError`] is the library error returned by
//! fallible setup operations (loading config, parsing scenarios, launching a
//! browser). [`FailureKind`] is the step failure taxonomy a scenario run
//! reports inside its [`crate::RunResult`]; it never escapes the runner as an
//! `Err`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for Lookout operations
pub type LookoutResult<T> = Result<T, LookoutError>;

/// Errors that can occur while preparing or hosting a run
#[derive(Debug, Error)]
pub enum LookoutError {
    /// Browser executable not found
    #[error("Browser not found. Install Chromium or set CHROMIUM_PATH")]
    BrowserNotFound,

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Scenario definition is invalid
    #[error("Invalid scenario '{scenario}': {message}")]
    Scenario {
        /// Scenario name (or file path when the name is unknown)
        scenario: String,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl LookoutError {
    /// Create a scenario definition error
    #[must_use]
    pub fn scenario(scenario: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Scenario {
            scenario: scenario.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Classification of a step failure.
///
/// Advisory-wait timeouts are not represented here: they are logged and the
/// scenario continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Target unreachable or failed to load
    NavigationError,
    /// Selector chain exhausted, or ambiguous match rejected by policy
    ResolutionFailure,
    /// Presence wait or assertion exceeded its bound
    TimeoutError,
    /// Action rejected by the live session, or stale after one retry
    ActionFailure,
    /// Artifact or fixture write failed
    IoFailure,
    /// Run was cancelled from outside
    Cancelled,
    /// Scenario task panicked or ended without a result
    Internal,
}

impl FailureKind {
    /// Stable identifier used in reports and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NavigationError => "NavigationError",
            Self::ResolutionFailure => "ResolutionFailure",
            Self::TimeoutError => "TimeoutError",
            Self::ActionFailure => "ActionFailure",
            Self::IoFailure => "IOFailure",
            Self::Cancelled => "Cancelled",
            Self::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured detail for a failed scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable message
    pub message: String,
    /// Index of the failing step (None when failing before the first step)
    pub step_index: Option<usize>,
    /// Label of the failing step
    pub step_label: Option<String>,
    /// Last observed state (assertion value, tried strategies, ...)
    pub last_state: Option<String>,
}

impl ErrorDetail {
    /// Create a new error detail
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step_index: None,
            step_label: None,
            last_state: None,
        }
    }

    /// Attach the last observed state
    #[must_use]
    pub fn with_last_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = Some(state.into());
        self
    }

    /// Attach the failing step position
    #[must_use]
    pub fn at_step(mut self, index: usize, label: impl Into<String>) -> Self {
        self.step_index = Some(index);
        self.step_label = Some(label.into());
        self
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(ref label) = self.step_label {
            write!(f, " (step: {label})")?;
        }
        Ok(())
    }
}
