//! Scenario definitions.
//!
//! A scenario is an ordered list of steps loaded from YAML:
//!
//! ```yaml
//! name: extractor-upload
//! viewport: { width: 1280, height: 720 }
//! steps:
//!   - navigate: /equipments
//!   - wait: { for: quiescence, timeout_ms: 5000 }
//!   - locate:
//!       as: extract
//!       rules:
//!         - { by: role, role: button, name: Extract Equipment }
//!       timeout_ms: 15000
//!   - act: { click: extract }
//!   - capture: { path: verification/extractor.png }
//! ```
//!
//! Steps refer to located targets by name. [`Scenario::validate`] checks that
//! every reference points at an earlier `locate` and that page steps follow
//! a `navigate`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::artifact::{fixture_file_name, is_plain_file_name, CaptureMode, Fixture, FixtureSource};
use crate::assertion::Condition;
use crate::config::Viewport;
use crate::result::{LookoutError, LookoutResult};
use crate::selector::{MultiMatchPolicy, SelectorChain};
use crate::wait::WaitCondition;

/// What to do when a bounded step times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnTimeout {
    /// Fail the scenario
    Abort,
    /// Log the timeout and run the next step
    LogAndContinue,
}

/// `wait` step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStep {
    /// Condition to wait for
    #[serde(flatten)]
    pub condition: WaitCondition,
    /// Bound in milliseconds (defaults per condition from config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Timeout policy (advisory conditions default to continue)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<OnTimeout>,
}

impl WaitStep {
    /// Effective timeout policy
    #[must_use]
    pub const fn timeout_policy(&self) -> OnTimeout {
        match self.on_timeout {
            Some(policy) => policy,
            None if self.condition.is_advisory() => OnTimeout::LogAndContinue,
            None => OnTimeout::Abort,
        }
    }
}

/// `locate` step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocateStep {
    /// Name later steps use to refer to the target
    #[serde(rename = "as")]
    pub name: String,
    /// Fallback chain
    pub rules: SelectorChain,
    /// Previously located target to search within
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within: Option<String>,
    /// Multi-match policy for this call site (defaults from config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_match: Option<MultiMatchPolicy>,
    /// Presence bound in milliseconds (defaults from config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Timeout policy (defaults to abort)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<OnTimeout>,
    /// Free-form description for reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LocateStep {
    /// Locate step with defaults
    #[must_use]
    pub fn new(name: impl Into<String>, rules: impl Into<SelectorChain>) -> Self {
        Self {
            name: name.into(),
            rules: rules.into(),
            within: None,
            multi_match: None,
            timeout_ms: None,
            on_timeout: None,
            description: None,
        }
    }

    /// Search inside a previously located target
    #[must_use]
    pub fn within(mut self, scope: impl Into<String>) -> Self {
        self.within = Some(scope.into());
        self
    }

    /// Set the presence bound
    #[must_use]
    pub const fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set the timeout policy
    #[must_use]
    pub const fn on_timeout(mut self, policy: OnTimeout) -> Self {
        self.on_timeout = Some(policy);
        self
    }

    /// Set the multi-match policy
    #[must_use]
    pub const fn multi_match(mut self, policy: MultiMatchPolicy) -> Self {
        self.multi_match = Some(policy);
        self
    }
}

/// File payload of a `set_files` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFilesStep {
    /// File input target
    pub target: String,
    /// Fixture name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<String>,
    /// Explicit paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
}

/// `act` step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActStep {
    /// Click a located target
    Click(String),
    /// Set the files of a located file input
    SetFiles(SetFilesStep),
    /// Sleep for a fixed number of milliseconds
    WaitFixed(u64),
}

impl ActStep {
    /// Target the action needs, if any
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Click(t) => Some(t),
            Self::SetFiles(s) => Some(&s.target),
            Self::WaitFixed(_) => None,
        }
    }
}

/// `assert` step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertStep {
    /// Located target to check
    pub target: String,
    /// Expected state
    #[serde(flatten)]
    pub condition: Condition,
    /// Bound in milliseconds (defaults from config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Timeout policy (defaults to abort)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<OnTimeout>,
}

impl AssertStep {
    /// Assert step with defaults
    #[must_use]
    pub fn new(target: impl Into<String>, condition: Condition) -> Self {
        Self {
            target: target.into(),
            condition,
            timeout_ms: None,
            on_timeout: None,
        }
    }
}

/// `capture` step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStep {
    /// Output path; relative paths are joined onto the artifact directory
    pub path: PathBuf,
    /// Capture extent
    #[serde(default)]
    pub mode: CaptureMode,
}

/// One scenario step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative URLs join the base URL)
    Navigate(String),
    /// Bounded wait
    Wait(WaitStep),
    /// Resolve a selector chain and name the target
    Locate(LocateStep),
    /// Interact
    Act(ActStep),
    /// Check a target's state
    Assert(AssertStep),
    /// Write a screenshot
    Capture(CaptureStep),
}

impl Step {
    /// Navigate step
    #[must_use]
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::Navigate(url.into())
    }

    /// Advisory quiescence wait
    #[must_use]
    pub const fn quiescence(timeout_ms: u64) -> Self {
        Self::Wait(WaitStep {
            condition: WaitCondition::Quiescence,
            timeout_ms: Some(timeout_ms),
            on_timeout: None,
        })
    }

    /// Click step
    #[must_use]
    pub fn click(target: impl Into<String>) -> Self {
        Self::Act(ActStep::Click(target.into()))
    }

    /// Set-files step using a fixture
    #[must_use]
    pub fn set_fixture(target: impl Into<String>, fixture: impl Into<String>) -> Self {
        Self::Act(ActStep::SetFiles(SetFilesStep {
            target: target.into(),
            fixture: Some(fixture.into()),
            paths: Vec::new(),
        }))
    }

    /// Visibility assertion with default bound
    #[must_use]
    pub fn assert_visible(target: impl Into<String>) -> Self {
        Self::Assert(AssertStep::new(target, Condition::Visible))
    }

    /// Capture step
    #[must_use]
    pub fn capture(path: impl Into<PathBuf>, mode: CaptureMode) -> Self {
        Self::Capture(CaptureStep {
            path: path.into(),
            mode,
        })
    }

    /// Kind name used in logs and reports
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Navigate(_) => "navigate",
            Self::Wait(_) => "wait",
            Self::Locate(_) => "locate",
            Self::Act(_) => "act",
            Self::Assert(_) => "assert",
            Self::Capture(_) => "capture",
        }
    }

    /// One-line human label
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Navigate(url) => format!("navigate {url}"),
            Self::Wait(w) => format!("wait for {}", w.condition.describe()),
            Self::Locate(l) => match l.description {
                Some(ref d) => format!("locate {} ({d})", l.name),
                None => format!("locate {} by {}", l.name, l.rules.describe()),
            },
            Self::Act(ActStep::Click(t)) => format!("click {t}"),
            Self::Act(ActStep::SetFiles(s)) => format!("set files on {}", s.target),
            Self::Act(ActStep::WaitFixed(ms)) => format!("wait {ms}ms"),
            Self::Assert(a) => format!("assert {} {}", a.target, a.condition.describe()),
            Self::Capture(c) => format!("capture {}", c.path.display()),
        }
    }

    fn needs_page(&self) -> bool {
        match self {
            Self::Navigate(_) => false,
            Self::Act(ActStep::WaitFixed(_)) => false,
            _ => true,
        }
    }
}

/// A named, ordered list of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name (used in reports and failure capture names)
    pub name: String,
    /// Base URL override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Viewport override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    /// Named fixtures
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fixtures: BTreeMap<String, Fixture>,
    /// Failure screenshot path override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_capture: Option<PathBuf>,
    /// Steps in execution order
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Empty scenario
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: None,
            viewport: None,
            fixtures: BTreeMap::new(),
            failure_capture: None,
            steps: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a locate step
    #[must_use]
    pub fn locate(self, locate: LocateStep) -> Self {
        self.step(Step::Locate(locate))
    }

    /// Register a fixture
    #[must_use]
    pub fn fixture(mut self, name: impl Into<String>, fixture: Fixture) -> Self {
        self.fixtures.insert(name.into(), fixture);
        self
    }

    /// Set the viewport
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Some(Viewport::new(width, height));
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Parse and validate a YAML scenario
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the scenario is invalid
    pub fn from_yaml(yaml: &str) -> LookoutResult<Self> {
        let scenario: Self = serde_yaml_ng::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load and validate a scenario file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the scenario is invalid
    pub fn from_file(path: &Path) -> LookoutResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let scenario: Self = serde_yaml_ng::from_str(&text)
            .map_err(|e| LookoutError::scenario(path.display().to_string(), e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Check structural rules.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Scenario`] naming the first offending step.
    pub fn validate(&self) -> LookoutResult<()> {
        let fail = |msg: String| Err(LookoutError::scenario(self.name.clone(), msg));
        if self.name.trim().is_empty() {
            return Err(LookoutError::scenario("<unnamed>", "scenario name is empty"));
        }
        if self.steps.is_empty() {
            return fail("scenario has no steps".to_string());
        }
        if let Some(ref vp) = self.viewport {
            if vp.width == 0 || vp.height == 0 {
                return fail("viewport dimensions must be positive".to_string());
            }
        }

        for (name, fixture) in &self.fixtures {
            if matches!(fixture.source, FixtureSource::Path(_)) {
                continue;
            }
            let file_name = fixture_file_name(name, fixture);
            if !is_plain_file_name(&file_name) {
                return fail(format!(
                    "fixture '{name}': file name '{file_name}' must not contain directories"
                ));
            }
        }

        let mut navigated = false;
        let mut located: HashSet<&str> = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            let at = format!("step {} ({})", i + 1, step.kind());
            if step.needs_page() && !navigated {
                return fail(format!("{at} runs before any navigate step"));
            }
            match step {
                Step::Navigate(url) => {
                    if url.trim().is_empty() {
                        return fail(format!("{at}: empty URL"));
                    }
                    navigated = true;
                }
                Step::Locate(l) => {
                    if l.name.trim().is_empty() {
                        return fail(format!("{at}: target name is empty"));
                    }
                    if let Some(ref scope) = l.within {
                        if !located.contains(scope.as_str()) {
                            return fail(format!("{at}: scope '{scope}' is not located earlier"));
                        }
                    }
                    located.insert(&l.name);
                }
                Step::Act(act) => {
                    if let Some(target) = act.target() {
                        if !located.contains(target) {
                            return fail(format!("{at}: target '{target}' is not located earlier"));
                        }
                    }
                    if let ActStep::SetFiles(s) = act {
                        match (&s.fixture, s.paths.is_empty()) {
                            (Some(f), true) if !self.fixtures.contains_key(f) => {
                                return fail(format!("{at}: unknown fixture '{f}'"));
                            }
                            (Some(_), true) | (None, false) => {}
                            _ => {
                                return fail(format!(
                                    "{at}: set_files needs exactly one of fixture or paths"
                                ));
                            }
                        }
                    }
                }
                Step::Assert(a) => {
                    if !located.contains(a.target.as_str()) {
                        return fail(format!("{at}: target '{}' is not located earlier", a.target));
                    }
                }
                Step::Capture(c) => {
                    if c.path.as_os_str().is_empty() {
                        return fail(format!("{at}: empty capture path"));
                    }
                }
                Step::Wait(_) => {}
            }
        }
        Ok(())
    }

    /// Every scenario file in `path` (a file, or a directory of `.yaml`/`.yml`
    /// files, sorted by name)
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read
    pub fn discover(path: &Path) -> LookoutResult<Vec<PathBuf>> {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let p = entry?.path();
            let is_yaml = p
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if p.is_file() && is_yaml {
                files.push(p);
            }
        }
        files.sort();
        Ok(files)
    }
}
